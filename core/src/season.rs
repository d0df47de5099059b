use crate::{
    config::{EngineConfig, RetryPolicy},
    db::{self, Db},
    error::{Error, Result},
    item::{Item, Season},
    rating,
};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};

/// Name given to the season opened when a rotation finds none running.
pub const INITIAL_SEASON: &str = "Initial Season";

/// A reward for finishing a season at a given rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tier {
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
}

/// Badges for the top of the leaderboard, best first.
pub const TIERS: [Tier; 5] = [
    Tier {
        name: "Season Gold",
        description: "Top 1 in the global ranking",
        icon: "👑",
    },
    Tier {
        name: "Season Silver",
        description: "Top 2 in the global ranking",
        icon: "🥈",
    },
    Tier {
        name: "Season Bronze",
        description: "Top 3 in the global ranking",
        icon: "🥉",
    },
    Tier {
        name: "Season Top 4",
        description: "Top 4 in the global ranking",
        icon: "🏅",
    },
    Tier {
        name: "Season Top 5",
        description: "Top 5 in the global ranking",
        icon: "🏅",
    },
];

/// Result of a season rollover.
#[derive(Clone, Debug)]
pub struct Rollover {
    /// The season that just ended.
    pub closed: Season,
    /// The season that is now running.
    pub opened: Season,
    /// The items that won badges, best first, with the ratings they finished on.
    pub winners: Vec<Item>,
}

/// Opens and closes seasons, and rewards the leaderboard when a season ends.
#[derive(Clone, Debug)]
pub struct SeasonManager {
    db: Db,
    retry: RetryPolicy,
}

impl SeasonManager {
    pub fn new(db: Db, config: &EngineConfig) -> Self {
        Self {
            db,
            retry: config.retry,
        }
    }

    /// Close the running season, if any, and open a new one called `name`.
    pub async fn close_and_rotate(&self, name: &str) -> Result<Season> {
        let season = self
            .retry
            .run("rotate season", || self.try_rotate(name))
            .await?;
        tracing::info!(id = %season.id, name, "opened season");
        Ok(season)
    }

    async fn try_rotate(&self, name: &str) -> Result<Season> {
        let mut tx = self.db.begin().await?;
        let now = Utc::now();
        if let Some(active) = db::get_active_season(&mut tx).await? {
            db::close_season(&mut tx, active.id, now).await?;
        }
        let season = open_named(&mut tx, name, now).await?;
        tx.commit().await?;
        Ok(season)
    }

    /// End the running season: award badges to the top of the leaderboard, reset every rating to
    /// the baseline and open a new season called `name`.
    ///
    /// All of this happens in one transaction. Badge definitions are shared across seasons, but
    /// every rollover produces new awards.
    pub async fn reset_rankings_and_award_badges(&self, name: &str) -> Result<Rollover> {
        let rollover = self
            .retry
            .run("reset rankings", || self.try_rollover(name))
            .await?;
        tracing::info!(
            closed = %rollover.closed.name,
            opened = %rollover.opened.name,
            winners = rollover.winners.len(),
            "season rolled over"
        );
        Ok(rollover)
    }

    async fn try_rollover(&self, name: &str) -> Result<Rollover> {
        let mut tx = self.db.begin().await?;
        let now = Utc::now();

        let current = match db::get_active_season(&mut tx).await? {
            Some(season) => season,
            None => {
                tracing::info!("no season running, opening the initial season");
                open_named(&mut tx, INITIAL_SEASON, now).await?
            }
        };

        let winners = db::top_items(&mut tx, TIERS.len() as u32).await?;
        for (rank, (item, tier)) in winners.iter().zip(&TIERS).enumerate() {
            let badge = db::badge_or_create(&mut tx, tier.name, tier.description, tier.icon).await?;
            db::award_badge(&mut tx, &badge, item, current.id, rank as i64 + 1, now).await?;
        }

        let reset = db::reset_all_ratings(&mut tx, rating::BASELINE).await?;
        tracing::debug!(reset, "reset ratings");

        db::close_season(&mut tx, current.id, now).await?;
        let opened = open_named(&mut tx, name, now).await?;

        tx.commit().await?;
        Ok(Rollover {
            closed: Season {
                ended_at: Some(now),
                is_active: false,
                ..current
            },
            opened,
            winners,
        })
    }
}

async fn open_named<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Season> {
    db::open_season(tx, name, now).await.map_err(|err| match err {
        Error::InvalidArgument(_) => Error::InvalidArgument(format!("season {name} already exists")),
        err => err,
    })
}

/// A default name for a season starting at `now`.
///
/// The trailing epoch timestamp is in microseconds, so resets run back to back still get distinct
/// names.
pub fn season_name(now: DateTime<Utc>) -> String {
    format!("{}_{}", now.format("Season_%Y_%m_%d_%H%M%S"), now.timestamp_micros())
}

use crate::{
    error::{Error, Result},
    item::{
        Award, Badge, Filter, Item, ItemId, NewItem, Season, SeasonId, UserId, Vote,
    },
};
use chrono::{DateTime, Utc};
use futures::stream::{StreamExt, TryStreamExt};
use sqlx::{
    migrate, query, query_as,
    sqlite::{
        Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    },
    Transaction,
};
use std::{collections::HashSet, path::Path, time::Duration};

const ITEM_COLUMNS: &str = "id, kind, gender, category, owner, image_url, rating, times_judged, \
                            times_won, active, approved, version, created_at";

const SEASON_COLUMNS: &str = "id, name, started_at, ended_at, is_active";

const AWARD_QUERY: &str = "
    SELECT a.user, a.badge, b.name AS badge_name, b.icon, a.item, a.season, a.rank, a.awarded_at
    FROM awarded_badge AS a JOIN badge AS b ON b.id = a.badge";

/// Durable storage for items, votes, seasons and badges.
///
/// Cloning a [`Db`] is cheap and shares the underlying connection pool, so independent votes can
/// run concurrently on different connections.
#[derive(Clone, Debug)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        Self::new(
            SqliteConnectOptions::default()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5)),
            SqlitePoolOptions::new(),
        )
        .await
    }

    /// An in-memory database, mostly useful for tests.
    ///
    /// Every connection to `:memory:` is a separate database, so the pool is pinned to a single
    /// connection that is never recycled.
    pub async fn memory() -> anyhow::Result<Self> {
        Self::new(
            Default::default(),
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        )
        .await
    }

    async fn new(opt: SqliteConnectOptions, pool: SqlitePoolOptions) -> anyhow::Result<Self> {
        let pool = pool.connect_with(opt).await?;
        migrate!("db/migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn create_item(&self, item: NewItem) -> Result<Item> {
        let item = query_as(&format!(
            "INSERT INTO item (kind, gender, category, owner, image_url, rating, approved, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(item.kind)
        .bind(item.gender)
        .bind(item.category)
        .bind(item.owner)
        .bind(item.image_url)
        .bind(item.rating)
        .bind(item.approved)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn item(&self, id: ItemId) -> Result<Item> {
        query_as(&format!("SELECT {ITEM_COLUMNS} FROM item WHERE id = $1 LIMIT 1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("item {id}")))
    }

    /// All active, approved items matching `filter`.
    pub async fn eligible(&self, filter: &Filter) -> Result<Vec<Item>> {
        let items = query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM item
             WHERE active AND approved
               AND kind = $1
               AND ($2 IS NULL OR gender = $2)
               AND ($3 IS NULL OR category = $3)
             ORDER BY id"
        ))
        .bind(filter.kind)
        .bind(filter.gender)
        .bind(filter.category)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// The current leaderboard: eligible items matching `filter` by rating, best first.
    pub async fn ranking(&self, filter: &Filter, limit: u32) -> Result<Vec<Item>> {
        let items = query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM item
             WHERE active AND approved
               AND kind = $1
               AND ($2 IS NULL OR gender = $2)
               AND ($3 IS NULL OR category = $3)
             ORDER BY rating DESC, id ASC
             LIMIT $4"
        ))
        .bind(filter.kind)
        .bind(filter.gender)
        .bind(filter.category)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Record the moderation decision for an item.
    pub async fn set_approved(&self, id: ItemId, approved: bool) -> Result<Item> {
        query_as(&format!(
            "UPDATE item SET approved = $1, version = version + 1 WHERE id = $2
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(approved)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("item {id}")))
    }

    /// Soft-delete an item. It keeps its history but is never offered for comparison again.
    pub async fn deactivate(&self, id: ItemId) -> Result<Item> {
        query_as(&format!(
            "UPDATE item SET active = FALSE, version = version + 1 WHERE id = $1
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("item {id}")))
    }

    /// Items awaiting moderation, oldest first. Rejected items are not pending.
    pub async fn pending(&self) -> Result<Vec<Item>> {
        let items = query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM item WHERE active AND NOT approved ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Everything `owner` has submitted, whatever its moderation state.
    pub async fn items_by_owner(&self, owner: UserId) -> Result<Vec<Item>> {
        let items = query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM item WHERE owner = $1 ORDER BY id"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Every item that `voter` has seen on either side of a vote.
    pub async fn judged_by(&self, voter: UserId) -> Result<HashSet<ItemId>> {
        query_as::<_, (ItemId,)>(
            "SELECT winner FROM vote WHERE voter = $1 UNION SELECT loser FROM vote WHERE voter = $1",
        )
        .bind(voter)
        .fetch(&self.pool)
        .map(|res| {
            let (id,) = res?;
            Ok::<ItemId, Error>(id)
        })
        .try_collect()
        .await
    }

    pub async fn votes_by(&self, voter: UserId) -> Result<Vec<Vote>> {
        let votes = query_as(
            "SELECT id, winner, loser, voter, created_at FROM vote WHERE voter = $1 ORDER BY id",
        )
        .bind(voter)
        .fetch_all(&self.pool)
        .await?;
        Ok(votes)
    }

    pub async fn vote_count(&self) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT count(*) FROM vote")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn active_season(&self) -> Result<Option<Season>> {
        let season = query_as(&format!(
            "SELECT {SEASON_COLUMNS} FROM season WHERE is_active LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(season)
    }

    pub async fn seasons(&self) -> Result<Vec<Season>> {
        let seasons = query_as(&format!("SELECT {SEASON_COLUMNS} FROM season ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(seasons)
    }

    /// Badges awarded at the close of `season`, by rank.
    pub async fn awards(&self, season: SeasonId) -> Result<Vec<Award>> {
        let awards = query_as(&format!("{AWARD_QUERY} WHERE a.season = $1 ORDER BY a.rank"))
            .bind(season)
            .fetch_all(&self.pool)
            .await?;
        Ok(awards)
    }

    pub async fn awards_for_user(&self, user: UserId) -> Result<Vec<Award>> {
        let awards = query_as(&format!(
            "{AWARD_QUERY} WHERE a.user = $1 ORDER BY a.season, a.rank"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(awards)
    }

    pub async fn badges(&self) -> Result<Vec<Badge>> {
        let badges = query_as("SELECT id, name, description, icon FROM badge ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(badges)
    }
}

pub(crate) async fn get_item<'c>(tx: &mut Transaction<'c, Sqlite>, id: ItemId) -> Result<Item> {
    query_as(&format!("SELECT {ITEM_COLUMNS} FROM item WHERE id = $1 LIMIT 1"))
        .bind(id)
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or_else(|| Error::NotFound(format!("item {id}")))
}

/// Write a new rating for `item` and count one more judgment (and possibly a win).
///
/// The write only lands if the row still has the version `item` was read at; otherwise another
/// transaction got there first and this one must start over.
pub(crate) async fn apply_rating_update<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    item: &Item,
    rating: i32,
    won: bool,
) -> Result<()> {
    let res = query(
        "UPDATE item
         SET rating = $1,
             times_judged = times_judged + 1,
             times_won = times_won + $2,
             version = version + 1
         WHERE id = $3 AND version = $4",
    )
    .bind(rating)
    .bind(i64::from(won))
    .bind(item.id)
    .bind(item.version)
    .execute(tx.as_mut())
    .await?;
    if res.rows_affected() == 0 {
        return Err(Error::TransientConflict);
    }
    Ok(())
}

pub(crate) async fn append_vote<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    winner: ItemId,
    loser: ItemId,
    voter: Option<UserId>,
) -> Result<Vote> {
    let vote = query_as(
        "INSERT INTO vote (winner, loser, voter, created_at) VALUES ($1, $2, $3, $4)
         RETURNING id, winner, loser, voter, created_at",
    )
    .bind(winner)
    .bind(loser)
    .bind(voter)
    .bind(Utc::now())
    .fetch_one(tx.as_mut())
    .await?;
    Ok(vote)
}

/// Set every item's rating to `baseline`. Judgment counters are history and are left alone.
pub(crate) async fn reset_all_ratings<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    baseline: i32,
) -> Result<u64> {
    let res = query("UPDATE item SET rating = $1, version = version + 1")
        .bind(baseline)
        .execute(tx.as_mut())
        .await?;
    Ok(res.rows_affected())
}

/// The `n` best eligible items. Equal ratings go to the item created first.
pub(crate) async fn top_items<'c>(tx: &mut Transaction<'c, Sqlite>, n: u32) -> Result<Vec<Item>> {
    let items = query_as(&format!(
        "SELECT {ITEM_COLUMNS} FROM item
         WHERE active AND approved
         ORDER BY rating DESC, id ASC
         LIMIT $1"
    ))
    .bind(n)
    .fetch_all(tx.as_mut())
    .await?;
    Ok(items)
}

pub(crate) async fn get_active_season<'c>(
    tx: &mut Transaction<'c, Sqlite>,
) -> Result<Option<Season>> {
    let season = query_as(&format!(
        "SELECT {SEASON_COLUMNS} FROM season WHERE is_active LIMIT 1"
    ))
    .fetch_optional(tx.as_mut())
    .await?;
    Ok(season)
}

pub(crate) async fn close_season<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    id: SeasonId,
    now: DateTime<Utc>,
) -> Result<()> {
    query("UPDATE season SET is_active = FALSE, ended_at = $1 WHERE id = $2")
        .bind(now)
        .bind(id)
        .execute(tx.as_mut())
        .await?;
    Ok(())
}

pub(crate) async fn open_season<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Season> {
    let season = query_as(&format!(
        "INSERT INTO season (name, started_at, is_active) VALUES ($1, $2, TRUE)
         RETURNING {SEASON_COLUMNS}"
    ))
    .bind(name)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;
    Ok(season)
}

pub(crate) async fn badge_or_create<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    name: &str,
    description: &str,
    icon: &str,
) -> Result<Badge> {
    query("INSERT INTO badge (name, description, icon) VALUES ($1, $2, $3) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .bind(description)
        .bind(icon)
        .execute(tx.as_mut())
        .await?;
    let badge = query_as("SELECT id, name, description, icon FROM badge WHERE name = $1 LIMIT 1")
        .bind(name)
        .fetch_one(tx.as_mut())
        .await?;
    Ok(badge)
}

pub(crate) async fn award_badge<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    badge: &Badge,
    item: &Item,
    season: SeasonId,
    rank: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    query(
        "INSERT INTO awarded_badge (user, badge, item, season, rank, awarded_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(item.owner)
    .bind(badge.id)
    .bind(item.id)
    .bind(season)
    .bind(rank)
    .bind(now)
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

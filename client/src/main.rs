use ansi_term::Style;
use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use faceoff_core::{
    admission::{Backend, Gate, Limit},
    config::{EngineConfig, RetryPolicy},
    db::Db,
    item::{CategoryId, Filter, Gender, ItemId, Kind, NewItem, SeasonId, UserId},
    message::{ItemSummary, Report},
    pair::PairSampler,
    season::{self, SeasonManager},
    vote::VotingEngine,
};
use itertools::Itertools;
use rand::Rng;
use std::{
    env,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Faceoff -- which one is better?
///
/// Operator tool for the pairwise ranking engine.
#[derive(Parser)]
struct Options {
    /// SQLite database holding items, votes and seasons.
    #[clap(short, long, env = "FACEOFF_DB")]
    db: Option<PathBuf>,

    /// Shared store for rate limit counters. Limits are per process without one.
    #[clap(short, long, env = "FACEOFF_REDIS_URL")]
    redis_url: Option<Url>,

    /// Votes a single client may submit per window.
    #[clap(long, env = "FACEOFF_VOTE_LIMIT", default_value = "10")]
    vote_limit: u64,

    /// Length of the vote rate limit window, in seconds.
    #[clap(long, env = "FACEOFF_VOTE_WINDOW", default_value = "10")]
    vote_window: u64,

    /// Attempts at a transaction that keeps conflicting with concurrent votes.
    #[clap(long, env = "FACEOFF_MAX_ATTEMPTS", default_value = "20")]
    max_attempts: u32,

    #[clap(subcommand)]
    command: Command,
}

impl Options {
    async fn db(&self) -> anyhow::Result<Db> {
        let db_path = match &self.db {
            Some(path) => path,
            None => &Path::new(&env::var("HOME")?).join(".faceoff/faceoff.sqlite"),
        };
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).context(format!("creating {}", dir.display()))?;
        }
        Db::open(db_path).await
    }

    fn config(&self) -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                ..Default::default()
            },
            vote_limit: Limit::new(self.vote_limit, Duration::from_secs(self.vote_window)),
        }
    }
}

#[derive(Args)]
struct FilterArgs {
    #[clap(short, long, default_value = "real")]
    kind: KindArg,

    #[clap(short, long)]
    gender: Option<GenderArg>,

    #[clap(short, long)]
    category: Option<CategoryId>,
}

impl From<&FilterArgs> for Filter {
    fn from(args: &FilterArgs) -> Self {
        Filter {
            kind: args.kind.into(),
            gender: args.gender.map(Into::into),
            category: args.category,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum KindArg {
    Real,
    Ai,
}

impl From<KindArg> for Kind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Real => Kind::Real,
            KindArg::Ai => Kind::Ai,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum GenderArg {
    Male,
    Female,
    Other,
}

impl From<GenderArg> for Gender {
    fn from(gender: GenderArg) -> Self {
        match gender {
            GenderArg::Male => Gender::Male,
            GenderArg::Female => Gender::Female,
            GenderArg::Other => Gender::Other,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Draw two items to compare.
    Pair {
        #[clap(flatten)]
        filter: FilterArgs,

        /// Skip items this user has already voted on.
        #[clap(short, long)]
        viewer: Option<UserId>,
    },

    /// Vote for `winner` over `loser`.
    Vote {
        winner: ItemId,
        loser: ItemId,

        #[clap(short, long)]
        voter: Option<UserId>,

        /// Identity the rate limit is counted against.
        #[clap(long, default_value = "cli")]
        client: String,
    },

    /// Show the leaderboard.
    Ranking {
        #[clap(flatten)]
        filter: FilterArgs,

        #[clap(short, long, default_value = "100")]
        limit: u32,
    },

    /// Award badges to the top 5, reset all ratings and start a new season.
    Reset {
        /// Name of the new season. Defaults to one derived from the current time.
        name: Option<String>,
    },

    /// Close the running season and open a new one, without awards or resets.
    Rotate { name: String },

    /// List seasons.
    Seasons,

    /// Show awarded badges for a season or a user.
    Awards {
        #[clap(long, conflicts_with = "user")]
        season: Option<SeasonId>,

        #[clap(long)]
        user: Option<UserId>,
    },

    /// Submit a new item. It is hidden until approved.
    Submit {
        image_url: String,

        #[clap(short, long, default_value = "real")]
        kind: KindArg,

        #[clap(short, long)]
        gender: GenderArg,

        #[clap(short, long)]
        category: Option<CategoryId>,

        #[clap(short, long)]
        owner: Option<UserId>,
    },

    /// List submissions awaiting moderation.
    Pending,

    /// List everything a user has submitted.
    Owned { owner: UserId },

    /// Make an item visible for comparison.
    Approve { id: ItemId },

    /// Hide an item for good.
    Reject { id: ItemId },

    /// Add approved synthetic items with randomized ratings, unless some already exist.
    Seed {
        #[clap(short, long, default_value = "10")]
        count: usize,
    },
}

impl Command {
    async fn run(&self, opt: &Options, db: Db) -> anyhow::Result<()> {
        let config = opt.config();
        match self {
            Self::Pair { filter, viewer } => {
                let pair = PairSampler::new(db).pair(&filter.into(), *viewer).await?;
                print(&Report::from(pair))?;
            }
            Self::Vote {
                winner,
                loser,
                voter,
                client,
            } => {
                let gate = Gate::new(Backend::connect(opt.redis_url.as_ref().map(Url::as_str)).await);
                let vote = VotingEngine::new(db, &config)
                    .submit_vote(&gate, client, *winner, *loser, *voter)
                    .await?;
                print(&Report::Vote { vote })?;
            }
            Self::Ranking { filter, limit } => {
                let items = db.ranking(&filter.into(), *limit).await?;
                println!("{}", leaderboard(items.into_iter().map(Into::into)));
            }
            Self::Reset { name } => {
                let name = name.clone().unwrap_or_else(|| season::season_name(Utc::now()));
                let rollover = SeasonManager::new(db, &config)
                    .reset_rankings_and_award_badges(&name)
                    .await?;
                print(&Report::from(rollover))?;
            }
            Self::Rotate { name } => {
                let season = SeasonManager::new(db, &config).close_and_rotate(name).await?;
                println!("{}. {} (started {})", season.id, season.name, season.started_at);
            }
            Self::Seasons => {
                for season in db.seasons().await? {
                    let status = match season.ended_at {
                        Some(ended) => format!("ended {ended}"),
                        None => "running".into(),
                    };
                    println!("{}. {} (started {}, {status})", season.id, season.name, season.started_at);
                }
            }
            Self::Awards { season, user } => {
                let awards = match (season, user) {
                    (Some(season), _) => db.awards(*season).await?,
                    (None, Some(user)) => db.awards_for_user(*user).await?,
                    (None, None) => {
                        let season = db
                            .seasons()
                            .await?
                            .into_iter()
                            .rev()
                            .find(|season| !season.is_active)
                            .context("no season has ended yet")?;
                        db.awards(season.id).await?
                    }
                };
                print(&Report::Awards { awards })?;
            }
            Self::Submit {
                image_url,
                kind,
                gender,
                category,
                owner,
            } => {
                let mut item = NewItem::new((*kind).into(), (*gender).into(), image_url);
                item.category = *category;
                item.owner = *owner;
                let item = db.create_item(item).await?;
                println!("submitted item {}, pending approval", item.id);
            }
            Self::Pending => {
                for item in db.pending().await? {
                    println!("{}. {} ({}, {})", item.id, item.image_url, item.kind, item.gender);
                }
            }
            Self::Owned { owner } => {
                for item in db.items_by_owner(*owner).await? {
                    let status = match (item.active, item.approved) {
                        (false, _) => "rejected",
                        (true, false) => "pending",
                        (true, true) => "live",
                    };
                    println!("{}. {} {status}, rating {}", item.id, item.image_url, item.rating);
                }
            }
            Self::Approve { id } => {
                db.set_approved(*id, true).await?;
                println!("approved item {id}");
            }
            Self::Reject { id } => {
                db.deactivate(*id).await?;
                println!("deactivated item {id}");
            }
            Self::Seed { count } => {
                let existing = db.ranking(&Filter::kind(Kind::Ai), 1).await?;
                if !existing.is_empty() {
                    println!("synthetic items already exist, skipping");
                    return Ok(());
                }
                for i in 0..*count {
                    let gender = if i % 2 == 0 { Gender::Female } else { Gender::Male };
                    let rating = rand::thread_rng().gen_range(1100..=1300);
                    let item = NewItem::new(Kind::Ai, gender, format!("https://picsum.photos/seed/{i}/400"))
                        .rating(rating)
                        .approved();
                    db.create_item(item).await?;
                }
                println!("seeded {count} synthetic items");
            }
        }
        Ok(())
    }
}

fn print(report: &Report) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn leaderboard(items: impl Iterator<Item = ItemSummary>) -> String {
    items
        .enumerate()
        .map(|(i, item)| {
            let line = format!(
                "{:>3}. {:>5}  item {} ({} judged, {} won)",
                i + 1,
                item.rating,
                item.id,
                item.times_judged,
                item.times_won
            );
            if i < 3 {
                Style::new().bold().paint(line).to_string()
            } else {
                line
            }
        })
        .join("\n")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
    let opt = Options::parse();

    let db = match opt.db().await {
        Ok(db) => db,
        Err(err) => {
            eprintln!("failed to open database: {err:#}");
            exit(1);
        }
    };

    if let Err(err) = opt.command.run(&opt, db).await {
        eprintln!("{err:#}");
        exit(1);
    }
}

use crate::rating;
use chrono::{DateTime, Utc};
use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            Debug,
            Display,
            From,
            FromStr,
            Into,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Deserialize,
            Serialize,
            Type,
        )]
        #[display("{_0}")]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(i64);
    };
}

id_type!(
    /// Identifies a rateable item.
    ItemId
);
id_type!(
    /// An opaque user identifier issued by the authentication layer.
    UserId
);
id_type!(CategoryId);
id_type!(VoteId);
id_type!(SeasonId);
id_type!(BadgeId);

/// Where an item came from.
#[derive(Clone, Copy, Debug, Display, Default, PartialEq, Eq, Hash, Deserialize, Serialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Kind {
    /// Submitted by a person.
    #[default]
    #[display("real")]
    Real,
    /// Generated.
    #[display("ai")]
    Ai,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Deserialize, Serialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Gender {
    #[display("male")]
    Male,
    #[display("female")]
    Female,
    #[display("other")]
    Other,
}

/// A rateable entity.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, FromRow)]
pub struct Item {
    pub id: ItemId,
    pub kind: Kind,
    pub gender: Gender,
    pub category: Option<CategoryId>,
    /// The user who submitted this item. Informational only.
    pub owner: Option<UserId>,
    pub image_url: String,
    pub rating: i32,
    pub times_judged: i64,
    pub times_won: i64,
    pub active: bool,
    pub approved: bool,
    /// Bumped on every write to the row, for optimistic concurrency control.
    #[serde(skip)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Whether this item may be shown in a comparison.
    pub fn is_eligible(&self) -> bool {
        self.active && self.approved
    }
}

/// The fields supplied when an item is submitted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewItem {
    pub kind: Kind,
    pub gender: Gender,
    pub category: Option<CategoryId>,
    pub owner: Option<UserId>,
    pub image_url: String,
    pub rating: i32,
    /// Submissions wait for moderation; seeded items may be approved up front.
    pub approved: bool,
}

impl NewItem {
    pub fn new(kind: Kind, gender: Gender, image_url: impl Into<String>) -> Self {
        Self {
            kind,
            gender,
            category: None,
            owner: None,
            image_url: image_url.into(),
            rating: rating::BASELINE,
            approved: false,
        }
    }

    pub fn category(mut self, category: CategoryId) -> Self {
        self.category = Some(category);
        self
    }

    pub fn owner(mut self, owner: UserId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn rating(mut self, rating: i32) -> Self {
        self.rating = rating;
        self
    }

    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }
}

/// Which items a pair or ranking request draws from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Filter {
    pub kind: Kind,
    pub gender: Option<Gender>,
    pub category: Option<CategoryId>,
}

impl Filter {
    pub fn kind(kind: Kind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    pub fn category(mut self, category: CategoryId) -> Self {
        self.category = Some(category);
        self
    }
}

/// The immutable record of one comparison.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, FromRow)]
pub struct Vote {
    pub id: VoteId,
    pub winner: ItemId,
    pub loser: ItemId,
    /// Absent for anonymous visitors.
    pub voter: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, FromRow)]
pub struct Season {
    pub id: SeasonId,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, FromRow)]
pub struct Badge {
    pub id: BadgeId,
    pub name: String,
    pub description: String,
    pub icon: String,
}

/// A badge earned by an item's owner for finishing a season at `rank`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, FromRow)]
pub struct Award {
    pub user: Option<UserId>,
    pub badge: BadgeId,
    pub badge_name: String,
    pub icon: String,
    pub item: ItemId,
    pub season: SeasonId,
    pub rank: i64,
    pub awarded_at: DateTime<Utc>,
}

use crate::{
    error::Error,
    item::{Award, CategoryId, Gender, Item, ItemId, Kind, Season, Vote},
    season::Rollover,
};
use serde::{Deserialize, Serialize};

/// What a client is shown about an item.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ItemSummary {
    pub id: ItemId,
    pub kind: Kind,
    pub gender: Gender,
    pub category: Option<CategoryId>,
    pub image_url: String,
    pub rating: i32,
    pub times_judged: i64,
    pub times_won: i64,
}

impl From<Item> for ItemSummary {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            kind: item.kind,
            gender: item.gender,
            category: item.category,
            image_url: item.image_url,
            rating: item.rating,
            times_judged: item.times_judged,
            times_won: item.times_won,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Report {
    /// Response to a pair request.
    Pair { items: [ItemSummary; 2] },

    /// Response to a vote.
    Vote { vote: Vote },

    /// Current leaderboard.
    Ranking { items: Vec<ItemSummary> },

    /// Response to a season reset: the badge winners, with their final ratings.
    Rollover {
        closed: Season,
        opened: Season,
        winners: Vec<ItemSummary>,
    },

    /// Badge history.
    Awards { awards: Vec<Award> },

    /// A failed request.
    Error { status: u16, message: String },
}

impl From<(Item, Item)> for Report {
    fn from((a, b): (Item, Item)) -> Self {
        Self::Pair {
            items: [a.into(), b.into()],
        }
    }
}

impl From<Rollover> for Report {
    fn from(rollover: Rollover) -> Self {
        Self::Rollover {
            closed: rollover.closed,
            opened: rollover.opened,
            winners: rollover.winners.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<&Error> for Report {
    fn from(err: &Error) -> Self {
        Self::Error {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

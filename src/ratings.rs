use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Ms, UserId};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// One user's score for a space, usually given after checking out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub id: Ulid,
    pub space_id: Ulid,
    pub user_id: UserId,
    pub score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub at: Ms,
}

/// Per-space rating store, in the order ratings were given.
pub struct Ratings {
    by_space: DashMap<Ulid, Vec<Rating>>,
}

impl Default for Ratings {
    fn default() -> Self {
        Self::new()
    }
}

impl Ratings {
    pub fn new() -> Self {
        Self {
            by_space: DashMap::new(),
        }
    }

    pub fn record(&self, rating: Rating) {
        self.by_space.entry(rating.space_id).or_default().push(rating);
    }

    pub fn for_space(&self, space_id: &Ulid) -> Vec<Rating> {
        self.by_space
            .get(space_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }
}

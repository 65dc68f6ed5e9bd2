use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Deserialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::ratings::Rating;
use crate::slot::{self, TimeSlot};

use super::{Engine, EngineError};

/// Filters for `search`. Unset filters match everything. The busy-slot
/// exclusion applies only when both `slot` and `date` are given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpaceQuery {
    pub building: Option<String>,
    pub floor: Option<i32>,
    pub kind: Option<String>,
    pub slot: Option<String>,
    pub date: Option<NaiveDate>,
    pub page: usize,
    pub limit: usize,
}

impl Default for SpaceQuery {
    fn default() -> Self {
        Self {
            building: None,
            floor: None,
            kind: None,
            slot: None,
            date: None,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SpaceQuery {
    fn matches(&self, space: &Space) -> bool {
        self.building.as_ref().is_none_or(|b| *b == space.building)
            && self.floor.is_none_or(|f| f == space.floor)
            && self.kind.as_ref().is_none_or(|k| *k == space.kind)
    }
}

fn check_page(page: usize, limit: usize) -> Result<(), EngineError> {
    if page == 0 {
        return Err(EngineError::LimitExceeded("page must be >= 1"));
    }
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(EngineError::LimitExceeded("limit must be 1..=100"));
    }
    Ok(())
}

impl Engine {
    pub async fn get_space(&self, id: Ulid) -> Result<Space, EngineError> {
        self.registry.get(&id).await
    }

    /// Every space, ordered by building, floor, name.
    pub async fn list_spaces(&self) -> Vec<Space> {
        self.registry.snapshot_all().await
    }

    /// Status of each configured slot of `date`. A slot shows the space's
    /// status only when the current claim is for that slot on that day.
    pub async fn schedule(
        &self,
        space_id: Ulid,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, SpaceStatus>, EngineError> {
        let space = self.registry.get(&space_id).await?;
        let day = slot::day_start(date);
        let claimed = space
            .claim()
            .filter(|c| c.reserved_at >= day && c.reserved_at < day + DAY_MS);

        Ok(self
            .config()
            .time_slots
            .iter()
            .map(|s| {
                let status = match claimed {
                    Some(c) if c.slot_label == s.label() => space.status(),
                    _ => SpaceStatus::Empty,
                };
                (s.label().to_string(), status)
            })
            .collect())
    }

    /// Spaces `viewer` may see: empty ones plus the viewer's own claims,
    /// minus spaces with a booking overlapping the requested slot.
    pub async fn search(&self, query: &SpaceQuery, viewer: &UserId) -> Result<Page<Space>, EngineError> {
        check_page(query.page, query.limit)?;

        let busy: BTreeSet<Ulid> = match (&query.slot, query.date) {
            (Some(label), Some(date)) => {
                let slot = TimeSlot::parse(label).map_err(|e| EngineError::InvalidSlot(e.0))?;
                self.ledger
                    .spaces_busy_during(slot.start_on(date), slot.end_on(date))
                    .into_iter()
                    .collect()
            }
            _ => BTreeSet::new(),
        };

        let visible: Vec<Space> = self
            .registry
            .snapshot_all()
            .await
            .into_iter()
            .filter(|s| query.matches(s))
            .filter(|s| match s.claimant() {
                None => true,
                Some(owner) => owner == viewer,
            })
            .filter(|s| !busy.contains(&s.id))
            .collect();

        Ok(Page::slice(visible, query.page, query.limit))
    }

    /// Distinct buildings, floors and kinds, sorted.
    pub async fn options(&self) -> SpaceOptions {
        let mut buildings = BTreeSet::new();
        let mut floors = BTreeSet::new();
        let mut kinds = BTreeSet::new();
        for s in self.registry.snapshot_all().await {
            buildings.insert(s.building);
            floors.insert(s.floor);
            kinds.insert(s.kind);
        }
        SpaceOptions {
            buildings: buildings.into_iter().collect(),
            floors: floors.into_iter().collect(),
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Spaces currently booked or in use by `user_id`.
    pub async fn claims_for_user(&self, user_id: &UserId) -> Vec<Space> {
        self.registry
            .snapshot_all()
            .await
            .into_iter()
            .filter(|s| s.claimant() == Some(user_id))
            .collect()
    }

    /// The user's ledger rows, newest first.
    pub fn history_for_user(
        &self,
        user_id: &UserId,
        page: usize,
        limit: usize,
    ) -> Result<Page<Booking>, EngineError> {
        check_page(page, limit)?;
        let mut rows = self.ledger.for_user(user_id);
        rows.reverse();
        Ok(Page::slice(rows, page, limit))
    }

    /// Ratings given to a space, oldest first.
    pub fn ratings_for_space(&self, space_id: Ulid) -> Result<Vec<Rating>, EngineError> {
        if self.registry.shared(&space_id).is_none() {
            return Err(EngineError::NotFound(space_id));
        }
        Ok(self.ratings.for_space(&space_id))
    }

    /// Every ledger row of a space, newest first.
    pub fn history_for_space(&self, space_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        if self.registry.shared(&space_id).is_none() {
            return Err(EngineError::NotFound(space_id));
        }
        let mut rows = self.ledger.for_space(&space_id);
        rows.reverse();
        Ok(rows)
    }

    /// The user's most recent notifications, newest first.
    pub fn notifications(&self, user_id: &UserId) -> Vec<Notification> {
        self.inbox.recent(user_id)
    }
}

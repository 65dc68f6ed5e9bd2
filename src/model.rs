use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type inside the engine.
pub type Ms = i64;

pub const SECOND_MS: Ms = 1_000;
pub const MINUTE_MS: Ms = 60 * SECOND_MS;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Opaque user identity handed to us by the session layer. Trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpaceStatus {
    Empty,
    Booked,
    InUse,
}

impl SpaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceStatus::Empty => "empty",
            SpaceStatus::Booked => "booked",
            SpaceStatus::InUse => "in-use",
        }
    }
}

impl fmt::Display for SpaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (user, slot) pair currently holding a space, from booking to checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub user_id: UserId,
    /// Ledger row opened for this claim.
    pub booking_id: Ulid,
    pub slot_label: String,
    pub reserved_at: Ms,
    /// `reserved_at` truncated to the start of its day.
    pub reserved_date: Ms,
}

/// Occupancy of a space. The claimant exists exactly when the space is not
/// empty, and the check-in deadline exists exactly while it is booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Occupancy {
    Empty,
    Booked { claim: Claim, check_in_deadline: Ms },
    InUse { claim: Claim },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub name: String,
    pub kind: String,
    pub building: String,
    pub floor: i32,
    pub occupancy: Occupancy,
    /// Bumped on every committed transition.
    pub version: u64,
}

impl Space {
    pub fn new(id: Ulid, name: String, kind: String, building: String, floor: i32) -> Self {
        Self {
            id,
            name,
            kind,
            building,
            floor,
            occupancy: Occupancy::Empty,
            version: 0,
        }
    }

    pub fn status(&self) -> SpaceStatus {
        match self.occupancy {
            Occupancy::Empty => SpaceStatus::Empty,
            Occupancy::Booked { .. } => SpaceStatus::Booked,
            Occupancy::InUse { .. } => SpaceStatus::InUse,
        }
    }

    pub fn claim(&self) -> Option<&Claim> {
        match &self.occupancy {
            Occupancy::Empty => None,
            Occupancy::Booked { claim, .. } | Occupancy::InUse { claim } => Some(claim),
        }
    }

    pub fn claimant(&self) -> Option<&UserId> {
        self.claim().map(|c| &c.user_id)
    }

    pub fn check_in_deadline(&self) -> Option<Ms> {
        match self.occupancy {
            Occupancy::Booked { check_in_deadline, .. } => Some(check_in_deadline),
            _ => None,
        }
    }
}

/// Why a ledger row was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Cancelled,
    Expired,
    CheckedOut,
    ForcedCheckOut,
}

/// One claim lifecycle in the reservation ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: UserId,
    pub space_id: Ulid,
    pub reserved_at: Ms,
    pub reserved_date: Ms,
    pub slot_label: String,
    pub checked_in_at: Option<Ms>,
    pub checked_out_at: Option<Ms>,
    pub closed_by: Option<CloseReason>,
}

impl Booking {
    pub fn is_open(&self) -> bool {
        self.checked_out_at.is_none()
    }
}

/// The event types, flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpaceProvisioned {
        id: Ulid,
        name: String,
        kind: String,
        building: String,
        floor: i32,
    },
    SpaceBooked {
        space_id: Ulid,
        booking_id: Ulid,
        user_id: UserId,
        slot_label: String,
        reserved_at: Ms,
        reserved_date: Ms,
        check_in_deadline: Ms,
    },
    SpaceCheckedIn {
        space_id: Ulid,
        booking_id: Ulid,
        at: Ms,
    },
    ClaimReleased {
        space_id: Ulid,
        booking_id: Ulid,
        at: Ms,
        reason: CloseReason,
    },
}

impl Event {
    pub fn space_id(&self) -> Ulid {
        match self {
            Event::SpaceProvisioned { id, .. } => *id,
            Event::SpaceBooked { space_id, .. }
            | Event::SpaceCheckedIn { space_id, .. }
            | Event::ClaimReleased { space_id, .. } => *space_id,
        }
    }
}

// ── Fan-out payloads ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    SpaceStatus,
    Notifications,
}

/// A user-facing notification as stored by the inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub message: String,
    pub at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Published {
    SpaceUpdated { space_id: Ulid, status: SpaceStatus },
    Notification(Notification),
}

impl Published {
    pub fn topic(&self) -> Topic {
        match self {
            Published::SpaceUpdated { .. } => Topic::SpaceStatus,
            Published::Notification(_) => Topic::Notifications,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Result of a successful claim transition: the space as committed plus the
/// message sent to the claimant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub space: Space,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// Slice `all` into the 1-based `page` of size `limit`.
    pub fn slice(all: Vec<T>, page: usize, limit: usize) -> Self {
        let total = all.len();
        // A page past the end is empty, however large the number.
        let skip = page.saturating_sub(1).saturating_mul(limit);
        let items = all.into_iter().skip(skip).take(limit).collect();
        Self {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpaceOptions {
    pub buildings: Vec<String>,
    pub floors: Vec<i32>,
    pub kinds: Vec<String>,
}

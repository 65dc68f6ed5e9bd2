use thiserror::Error;
use ulid::Ulid;

use crate::model::{Ms, SpaceStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("space not found: {0}")]
    NotFound(Ulid),
    #[error("space already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid time: slot starts at {reserved_at}, now is {now}")]
    InvalidTime { reserved_at: Ms, now: Ms },
    #[error("invalid time slot: {0:?}")]
    InvalidSlot(String),
    #[error("space {space_id} is {actual}, expected {expected}")]
    WrongState {
        space_id: Ulid,
        expected: SpaceStatus,
        actual: SpaceStatus,
    },
    #[error("user {user_id} does not hold the claim on space {space_id}")]
    NotOwner { space_id: Ulid, user_id: UserId },
    /// Lost a race: the space changed between read and write.
    #[error("conflict: space {0} changed concurrently")]
    Conflict(Ulid),
    #[error("check-in deadline {deadline} passed for space {space_id}")]
    Expired { space_id: Ulid, deadline: Ms },
    #[error("space {0} is not due for a forced transition")]
    NotDue(Ulid),
    #[error("no open booking matches the claim on space {0}")]
    MissingBooking(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code for transports.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidTime { .. } => "invalid_time",
            EngineError::InvalidSlot(_) => "invalid_slot",
            EngineError::WrongState { .. } => "wrong_state",
            EngineError::NotOwner { .. } => "not_owner",
            EngineError::Conflict(_) => "conflict",
            EngineError::Expired { .. } => "expired",
            EngineError::NotDue(_) => "not_due",
            EngineError::MissingBooking(_) => "missing_booking",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "internal",
        }
    }
}

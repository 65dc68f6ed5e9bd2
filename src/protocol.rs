//! Newline-delimited JSON requests and replies.
//!
//! One request object per line, tagged by `op`:
//!
//! ```text
//! {"op":"book","space_id":"01J...","user_id":"u1","slot":"08:00-10:00","date":"2025-05-01"}
//! ```
//!
//! Replies are `{"ok":true,"data":...}` or
//! `{"ok":false,"error":{"code":"...","message":"..."}}`. Events pushed to a
//! subscribed connection carry an `event` field instead of `ok`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::LinesCodecError;
use ulid::Ulid;

use crate::engine::{EngineError, SpaceQuery};
use crate::limits::DEFAULT_PAGE_SIZE;
use crate::model::{Topic, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Provision {
        name: String,
        kind: String,
        building: String,
        floor: i32,
    },
    Book {
        space_id: Ulid,
        user_id: UserId,
        slot: String,
        date: NaiveDate,
    },
    CheckIn {
        space_id: Ulid,
        user_id: UserId,
    },
    Cancel {
        space_id: Ulid,
        user_id: UserId,
    },
    CheckOut {
        space_id: Ulid,
        user_id: UserId,
    },
    GetSpace {
        space_id: Ulid,
    },
    ListSpaces,
    Schedule {
        space_id: Ulid,
        date: NaiveDate,
    },
    Search {
        user_id: UserId,
        #[serde(flatten)]
        query: SpaceQuery,
    },
    Options,
    MyClaims {
        user_id: UserId,
    },
    History {
        user_id: UserId,
        #[serde(default = "first_page")]
        page: usize,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    SpaceHistory {
        space_id: Ulid,
    },
    Notifications {
        user_id: UserId,
    },
    Rate {
        space_id: Ulid,
        user_id: UserId,
        score: u8,
        #[serde(default)]
        comment: Option<String>,
    },
    Ratings {
        space_id: Ulid,
    },
    Subscribe {
        topics: Vec<Topic>,
    },
}

fn first_page() -> usize {
    1
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn data<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                data: Some(value),
                error: None,
            },
            Err(e) => Self::error("internal", e.to_string()),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

impl From<EngineError> for Reply {
    fn from(e: EngineError) -> Self {
        Self::error(e.code(), e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("request line too long")]
    LineTooLong,
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Empty | ProtocolError::BadRequest(_) => "bad_request",
            ProtocolError::LineTooLong => "line_too_long",
            ProtocolError::Encode(_) | ProtocolError::Io(_) => "internal",
        }
    }
}

impl From<LinesCodecError> for ProtocolError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::LineTooLong,
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(line).map_err(|e| ProtocolError::BadRequest(e.to_string()))
}

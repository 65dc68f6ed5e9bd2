//! Input bounds enforced at the engine boundary.

pub const MAX_SPACES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_ATTRIBUTE_LEN: usize = 64;
pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_COMMENT_LEN: usize = 500;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// Notifications retained per user, newest first.
pub const INBOX_CAPACITY: usize = 50;

/// Longest request line the transport accepts.
pub const MAX_LINE_LEN: usize = 16 * 1024;

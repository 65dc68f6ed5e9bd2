use std::collections::VecDeque;

use dashmap::DashMap;

use crate::limits::INBOX_CAPACITY;
use crate::model::{Notification, UserId};

/// Per-user notification store. Keeps the newest `INBOX_CAPACITY` entries.
pub struct Inbox {
    by_user: DashMap<UserId, VecDeque<Notification>>,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
        }
    }

    pub fn record(&self, notification: Notification) {
        let mut queue = self.by_user.entry(notification.user_id.clone()).or_default();
        queue.push_front(notification);
        queue.truncate(INBOX_CAPACITY);
    }

    /// Newest first.
    pub fn recent(&self, user_id: &UserId) -> Vec<Notification> {
        self.by_user
            .get(user_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

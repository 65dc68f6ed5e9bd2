use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Reservation ledger: one row per claim lifecycle, never deleted.
///
/// Rows for a space are only written while that space's write lock is held,
/// which keeps "at most one open row per space" true without a lock of its own.
pub struct Ledger {
    bookings: DashMap<Ulid, Booking>,
    /// Booking ids in creation order.
    by_space: DashMap<Ulid, Vec<Ulid>>,
    by_user: DashMap<UserId, Vec<Ulid>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            by_space: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|b| b.value().clone())
    }

    // ── Writes (space lock held) ─────────────────────────────

    pub(super) fn open(&self, booking: Booking) {
        debug_assert!(
            self.open_for_space(&booking.space_id).is_none(),
            "space {} already has an open booking",
            booking.space_id
        );
        self.by_space.entry(booking.space_id).or_default().push(booking.id);
        self.by_user.entry(booking.user_id.clone()).or_default().push(booking.id);
        self.bookings.insert(booking.id, booking);
    }

    /// Set `checked_in_at` once. Returns false if the row is missing, closed,
    /// or already checked in.
    pub(super) fn check_in(&self, id: &Ulid, at: Ms) -> bool {
        match self.bookings.get_mut(id) {
            Some(mut b) if b.is_open() && b.checked_in_at.is_none() => {
                b.checked_in_at = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Set `checked_out_at` once. Returns false if the row is missing or
    /// already closed.
    pub(super) fn close(&self, id: &Ulid, at: Ms, reason: CloseReason) -> bool {
        match self.bookings.get_mut(id) {
            Some(mut b) if b.is_open() => {
                b.checked_out_at = Some(at);
                b.closed_by = Some(reason);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn forget(&self, id: &Ulid) {
        self.bookings.remove(id);
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn open_for_space(&self, space_id: &Ulid) -> Option<Booking> {
        let ids = self.by_space.get(space_id)?;
        let open = ids
            .iter()
            .rev()
            .filter_map(|id| self.bookings.get(id))
            .find(|b| b.is_open())
            .map(|b| b.value().clone());
        open
    }

    /// All rows for a space, oldest first.
    pub fn for_space(&self, space_id: &Ulid) -> Vec<Booking> {
        self.collect(self.by_space.get(space_id).map(|ids| ids.value().clone()))
    }

    /// All rows for a user, oldest first.
    pub fn for_user(&self, user_id: &UserId) -> Vec<Booking> {
        self.collect(self.by_user.get(user_id).map(|ids| ids.value().clone()))
    }

    /// Spaces with a booking that starts no later than `end` and is still
    /// open, or closed at or after `start`.
    pub fn spaces_busy_during(&self, start: Ms, end: Ms) -> Vec<Ulid> {
        let mut busy: Vec<Ulid> = self
            .bookings
            .iter()
            .filter(|b| b.reserved_at <= end && b.checked_out_at.is_none_or(|out| out >= start))
            .map(|b| b.space_id)
            .collect();
        busy.sort();
        busy.dedup();
        busy
    }

    fn collect(&self, ids: Option<Vec<Ulid>>) -> Vec<Booking> {
        ids.unwrap_or_default()
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }
}

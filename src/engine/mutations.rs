use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::ratings::{MAX_SCORE, MIN_SCORE, Rating};
use crate::slot::{self, TimeSlot};

use super::registry::{Expected, Observed};
use super::{Engine, EngineError, messages};

/// A booked space whose check-in deadline is coming up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub space_id: Ulid,
    pub space_name: String,
    pub booking_id: Ulid,
    pub user_id: UserId,
    pub check_in_deadline: Ms,
}

/// The caller's claim on `space`, checked in error-priority order: a space
/// with no claim is in the wrong state, then ownership, then status.
fn authorize<'a>(
    space: &'a Space,
    user_id: &UserId,
    expected: SpaceStatus,
) -> Result<&'a Claim, EngineError> {
    let claim = space.claim().ok_or(EngineError::WrongState {
        space_id: space.id,
        expected,
        actual: SpaceStatus::Empty,
    })?;
    if &claim.user_id != user_id {
        return Err(EngineError::NotOwner {
            space_id: space.id,
            user_id: user_id.clone(),
        });
    }
    require_status(space, expected)?;
    Ok(claim)
}

fn require_status(space: &Space, expected: SpaceStatus) -> Result<(), EngineError> {
    if space.status() != expected {
        return Err(EngineError::WrongState {
            space_id: space.id,
            expected,
            actual: space.status(),
        });
    }
    Ok(())
}

/// A precondition that fails only because of a transition this request
/// waited behind is a lost race, not a wrong request.
fn raced_into_conflict(e: EngineError, raced: bool) -> EngineError {
    match e {
        EngineError::WrongState { space_id, .. } | EngineError::NotOwner { space_id, .. } if raced => {
            EngineError::Conflict(space_id)
        }
        e => e,
    }
}

fn check_user_id(user_id: &UserId) -> Result<(), EngineError> {
    if user_id.as_str().is_empty() || user_id.as_str().len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id must be 1..=128 bytes"));
    }
    Ok(())
}

fn observe<T>(op: &'static str, result: Result<T, EngineError>) -> Result<T, EngineError> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "op" => op, "outcome" => outcome)
        .increment(1);
    result
}

impl Engine {
    // ── Provisioning ─────────────────────────────────────────

    pub async fn provision_space(
        &self,
        name: &str,
        kind: &str,
        building: &str,
        floor: i32,
    ) -> Result<Space, EngineError> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("space name must be 1..=128 bytes"));
        }
        if kind.len() > MAX_ATTRIBUTE_LEN || building.len() > MAX_ATTRIBUTE_LEN {
            return Err(EngineError::LimitExceeded("space attribute too long"));
        }
        if self.registry.len() >= MAX_SPACES {
            return Err(EngineError::LimitExceeded("too many spaces"));
        }

        let id = Ulid::new();
        self.registry.claim_name(name, id)?;
        let event = Event::SpaceProvisioned {
            id,
            name: name.to_string(),
            kind: kind.to_string(),
            building: building.to_string(),
            floor,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.registry.release_name(name);
            return Err(e);
        }

        let space = Space::new(id, name.to_string(), kind.to_string(), building.to_string(), floor);
        self.registry.insert(space.clone());
        self.notify.publish(Published::SpaceUpdated {
            space_id: id,
            status: SpaceStatus::Empty,
        });
        info!(space = %id, name, "space provisioned");
        Ok(space)
    }

    /// Provision building A, floors 1-5, five self-study rooms and three
    /// group rooms per floor. Does nothing unless the registry is empty.
    pub async fn seed_sample_spaces(&self) -> Result<usize, EngineError> {
        if !self.registry.is_empty() {
            return Ok(0);
        }
        let mut created = 0;
        for floor in 1..=5 {
            for i in 1..=5 {
                let name = format!("Study Room {floor}0{i}");
                self.provision_space(&name, "self-study", "A", floor).await?;
                created += 1;
            }
            for i in 1..=3 {
                let name = format!("Group Room {floor}0{i}");
                self.provision_space(&name, "group-study", "A", floor).await?;
                created += 1;
            }
        }
        info!("seeded {created} sample spaces");
        Ok(created)
    }

    // ── Ratings ──────────────────────────────────────────────

    /// Record a 1-5 score for a space, with an optional comment.
    pub async fn rate(
        &self,
        space_id: Ulid,
        user_id: &UserId,
        score: u8,
        comment: Option<String>,
    ) -> Result<Rating, EngineError> {
        check_user_id(user_id)?;
        if self.registry.shared(&space_id).is_none() {
            return Err(EngineError::NotFound(space_id));
        }
        if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return Err(EngineError::LimitExceeded("rating must be 1..=5"));
        }
        let comment = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        if comment.as_ref().is_some_and(|c| c.len() > MAX_COMMENT_LEN) {
            return Err(EngineError::LimitExceeded("comment must be at most 500 bytes"));
        }

        let rating = Rating {
            id: Ulid::new(),
            space_id,
            user_id: user_id.clone(),
            score,
            comment,
            at: self.now(),
        };
        self.ratings.record(rating.clone());
        info!(space = %space_id, user = %user_id, score, "space rated");
        Ok(rating)
    }

    // ── User transitions ─────────────────────────────────────

    pub async fn book(
        &self,
        space_id: Ulid,
        user_id: &UserId,
        slot_label: &str,
        date: NaiveDate,
    ) -> Result<Transition, EngineError> {
        observe("book", self.book_inner(space_id, user_id, slot_label, date).await)
    }

    async fn book_inner(
        &self,
        space_id: Ulid,
        user_id: &UserId,
        slot_label: &str,
        date: NaiveDate,
    ) -> Result<Transition, EngineError> {
        check_user_id(user_id)?;
        let Observed { space, raced } = self.registry.observe(&space_id).await?;
        let slot = TimeSlot::parse(slot_label).map_err(|e| EngineError::InvalidSlot(e.0))?;
        require_status(&space, SpaceStatus::Empty).map_err(|e| raced_into_conflict(e, raced))?;

        let now = self.now();
        let reserved_at = slot.start_on(date);
        if reserved_at < now {
            return Err(EngineError::InvalidTime { reserved_at, now });
        }
        let check_in_deadline = reserved_at + self.config().check_in_grace;
        let booking_id = Ulid::new();

        let committed = self
            .compare_and_transition(space_id, Expected::of(&space), |_| Event::SpaceBooked {
                space_id,
                booking_id,
                user_id: user_id.clone(),
                slot_label: slot.label().to_string(),
                reserved_at,
                reserved_date: slot::day_start(date),
                check_in_deadline,
            })
            .await?;

        info!(space = %space_id, user = %user_id, slot = slot.label(), %date, "booked");
        let message = messages::booked(&committed.name, check_in_deadline);
        self.deliver(user_id, &message, now);
        Ok(Transition {
            space: committed,
            message,
        })
    }

    /// Check in to a booked space. Past the deadline the booking is expired
    /// instead and the caller gets `Expired`.
    pub async fn check_in(&self, space_id: Ulid, user_id: &UserId) -> Result<Transition, EngineError> {
        observe("check_in", self.check_in_inner(space_id, user_id).await)
    }

    async fn check_in_inner(&self, space_id: Ulid, user_id: &UserId) -> Result<Transition, EngineError> {
        let Observed { space, raced } = self.registry.observe(&space_id).await?;
        let claim =
            authorize(&space, user_id, SpaceStatus::Booked).map_err(|e| raced_into_conflict(e, raced))?;
        let booking_id = claim.booking_id;
        let now = self.now();

        if let Some(deadline) = space.check_in_deadline()
            && now > deadline
        {
            self.expire_observed(&space).await?;
            return Err(EngineError::Expired { space_id, deadline });
        }

        let committed = self
            .compare_and_transition(space_id, Expected::of(&space), |_| Event::SpaceCheckedIn {
                space_id,
                booking_id,
                at: now,
            })
            .await?;

        info!(space = %space_id, user = %user_id, "checked in");
        let message = messages::checked_in(&committed.name);
        self.deliver(user_id, &message, now);
        Ok(Transition {
            space: committed,
            message,
        })
    }

    pub async fn cancel(&self, space_id: Ulid, user_id: &UserId) -> Result<Transition, EngineError> {
        observe("cancel", self.cancel_inner(space_id, user_id).await)
    }

    async fn cancel_inner(&self, space_id: Ulid, user_id: &UserId) -> Result<Transition, EngineError> {
        let Observed { space, raced } = self.registry.observe(&space_id).await?;
        authorize(&space, user_id, SpaceStatus::Booked).map_err(|e| raced_into_conflict(e, raced))?;
        let now = self.now();
        let committed = self.release(&space, CloseReason::Cancelled, now).await?;

        info!(space = %space_id, user = %user_id, "booking cancelled");
        let message = messages::cancelled(&committed.name);
        self.deliver(user_id, &message, now);
        Ok(Transition {
            space: committed,
            message,
        })
    }

    pub async fn check_out(&self, space_id: Ulid, user_id: &UserId) -> Result<Transition, EngineError> {
        observe("check_out", self.check_out_inner(space_id, user_id).await)
    }

    async fn check_out_inner(&self, space_id: Ulid, user_id: &UserId) -> Result<Transition, EngineError> {
        let Observed { space, raced } = self.registry.observe(&space_id).await?;
        authorize(&space, user_id, SpaceStatus::InUse).map_err(|e| raced_into_conflict(e, raced))?;
        let now = self.now();
        let committed = self.release(&space, CloseReason::CheckedOut, now).await?;

        info!(space = %space_id, user = %user_id, "checked out");
        let message = messages::checked_out(&committed.name);
        self.deliver(user_id, &message, now);
        Ok(Transition {
            space: committed,
            message,
        })
    }

    // ── System transitions ───────────────────────────────────

    /// Expire a booking whose check-in deadline has passed.
    pub async fn expire(&self, space_id: Ulid) -> Result<Transition, EngineError> {
        let space = self.registry.get(&space_id).await?;
        self.expire_observed(&space).await
    }

    /// Expire `observed`, committing only if the space is still exactly as
    /// observed.
    pub async fn expire_observed(&self, observed: &Space) -> Result<Transition, EngineError> {
        observe("expire", self.expire_inner(observed).await)
    }

    async fn expire_inner(&self, observed: &Space) -> Result<Transition, EngineError> {
        require_status(observed, SpaceStatus::Booked)?;
        let now = self.now();
        let (Some(claim), Some(deadline)) = (observed.claim(), observed.check_in_deadline()) else {
            return Err(EngineError::MissingBooking(observed.id));
        };
        if now <= deadline {
            return Err(EngineError::NotDue(observed.id));
        }
        let committed = self.release(observed, CloseReason::Expired, now).await?;

        info!(space = %observed.id, user = %claim.user_id, "booking expired");
        let message = messages::expired(&committed.name);
        self.deliver(&claim.user_id, &message, now);
        Ok(Transition {
            space: committed,
            message,
        })
    }

    /// End an occupancy that has run past the maximum duration.
    pub async fn force_check_out(&self, space_id: Ulid) -> Result<Transition, EngineError> {
        let space = self.registry.get(&space_id).await?;
        self.force_check_out_observed(&space).await
    }

    pub async fn force_check_out_observed(&self, observed: &Space) -> Result<Transition, EngineError> {
        observe("force_check_out", self.force_check_out_inner(observed).await)
    }

    async fn force_check_out_inner(&self, observed: &Space) -> Result<Transition, EngineError> {
        require_status(observed, SpaceStatus::InUse)?;
        let claim = observed.claim().ok_or(EngineError::MissingBooking(observed.id))?;
        let checked_in_at = self
            .ledger
            .get(&claim.booking_id)
            .filter(|b| b.is_open())
            .and_then(|b| b.checked_in_at)
            .ok_or(EngineError::MissingBooking(observed.id))?;

        let now = self.now();
        let max = self.config().max_occupancy;
        if now - checked_in_at <= max {
            return Err(EngineError::NotDue(observed.id));
        }
        let committed = self.release(observed, CloseReason::ForcedCheckOut, now).await?;

        info!(space = %observed.id, user = %claim.user_id, "forced check-out");
        let message = messages::force_checked_out(&committed.name, max);
        self.deliver(&claim.user_id, &message, now);
        Ok(Transition {
            space: committed,
            message,
        })
    }

    /// Send the check-in reminder for `due`. Delivers nothing if the claim
    /// has moved on since it was collected.
    pub async fn remind(&self, due: &DueReminder) -> Result<(), EngineError> {
        let space = self.registry.get(&due.space_id).await?;
        match space.claim() {
            Some(c) if c.booking_id == due.booking_id && space.status() == SpaceStatus::Booked => {
                let message = messages::reminder(&due.space_name, due.check_in_deadline);
                self.deliver(&due.user_id, &message, self.now());
                debug!(space = %due.space_id, user = %due.user_id, "reminder sent");
                Ok(())
            }
            _ => Err(EngineError::Conflict(due.space_id)),
        }
    }

    /// Empty the space and close its open ledger row.
    async fn release(
        &self,
        observed: &Space,
        reason: CloseReason,
        at: Ms,
    ) -> Result<Space, EngineError> {
        let claim = observed.claim().ok_or(EngineError::MissingBooking(observed.id))?;
        let booking_id = claim.booking_id;
        let space_id = observed.id;
        self.compare_and_transition(space_id, Expected::of(observed), |_| Event::ClaimReleased {
            space_id,
            booking_id,
            at,
            reason,
        })
        .await
    }

    // ── Sweep collectors ─────────────────────────────────────
    //
    // Each scans with try_read and skips spaces that are locked right now;
    // they are picked up again on the next tick.

    /// Booked spaces whose check-in deadline falls in `[now, now + lookahead]`.
    pub fn collect_due_reminders(&self, now: Ms) -> Vec<DueReminder> {
        let horizon = now + self.config().reminder_lookahead;
        self.registry
            .try_snapshot_all()
            .into_iter()
            .filter_map(|s| match &s.occupancy {
                Occupancy::Booked {
                    claim,
                    check_in_deadline,
                } if (now..=horizon).contains(check_in_deadline) => Some(DueReminder {
                    space_id: s.id,
                    space_name: s.name.clone(),
                    booking_id: claim.booking_id,
                    user_id: claim.user_id.clone(),
                    check_in_deadline: *check_in_deadline,
                }),
                _ => None,
            })
            .collect()
    }

    /// Booked spaces past their check-in deadline.
    pub fn collect_lapsed_claims(&self, now: Ms) -> Vec<Space> {
        self.registry
            .try_snapshot_all()
            .into_iter()
            .filter(|s| s.check_in_deadline().is_some_and(|d| d < now))
            .collect()
    }

    /// In-use spaces occupied for longer than the maximum, plus in-use spaces
    /// with no matching checked-in ledger row (those fail with
    /// `MissingBooking` when forced).
    pub fn collect_overdue_occupancies(&self, now: Ms) -> Vec<Space> {
        let max = self.config().max_occupancy;
        self.registry
            .try_snapshot_all()
            .into_iter()
            .filter(|s| match &s.occupancy {
                Occupancy::InUse { claim } => match self.ledger.get(&claim.booking_id) {
                    Some(b) if b.is_open() => b.checked_in_at.is_none_or(|at| now - at > max),
                    _ => true,
                },
                _ => false,
            })
            .collect()
    }
}

mod error;
mod ledger;
mod messages;
mod mutations;
mod queries;
mod registry;

pub use error::EngineError;
pub use ledger::Ledger;
pub use mutations::DueReminder;
pub use queries::SpaceQuery;
pub use registry::{Expected, Observed, SharedSpace, SpaceRegistry};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::inbox::Inbox;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::ratings::Ratings;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

struct WalAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Drain every append already queued behind it (the batch window).
/// 3. One flush + fsync for the whole batch.
/// 4. Answer every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalAppend>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for append in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = append.response.send(r);
        }
    }
    tracing::debug!("WAL writer stopped after {} appends", wal.appended());
}

fn flush_batch(wal: &mut Wal, batch: &[WalAppend]) -> io::Result<()> {
    let mut append_err = None;
    for append in batch {
        if let Err(e) = wal.append_buffered(&append.event) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    // Every caller in the batch is told it failed, so none of its bytes may
    // reach a later flush.
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        tracing::warn!("WAL rollback after failed batch: {e}");
    }
    result
}

/// The claim engine: sole writer of the space registry and the ledger.
pub struct Engine {
    pub(super) registry: SpaceRegistry,
    pub(super) ledger: Ledger,
    wal_tx: mpsc::Sender<WalAppend>,
    pub notify: Arc<NotifyHub>,
    pub inbox: Inbox,
    pub ratings: Ratings,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

/// Apply a committed event to the space (caller holds its write lock) and to
/// the ledger.
fn apply_event(space: &mut Space, ledger: &Ledger, event: &Event) {
    match event {
        Event::SpaceBooked {
            space_id,
            booking_id,
            user_id,
            slot_label,
            reserved_at,
            reserved_date,
            check_in_deadline,
        } => {
            ledger.open(Booking {
                id: *booking_id,
                user_id: user_id.clone(),
                space_id: *space_id,
                reserved_at: *reserved_at,
                reserved_date: *reserved_date,
                slot_label: slot_label.clone(),
                checked_in_at: None,
                checked_out_at: None,
                closed_by: None,
            });
            space.occupancy = Occupancy::Booked {
                claim: Claim {
                    user_id: user_id.clone(),
                    booking_id: *booking_id,
                    slot_label: slot_label.clone(),
                    reserved_at: *reserved_at,
                    reserved_date: *reserved_date,
                },
                check_in_deadline: *check_in_deadline,
            };
        }
        Event::SpaceCheckedIn { booking_id, at, .. } => {
            if let Occupancy::Booked { claim, .. } = &space.occupancy {
                space.occupancy = Occupancy::InUse { claim: claim.clone() };
            }
            ledger.check_in(booking_id, *at);
        }
        Event::ClaimReleased {
            booking_id,
            at,
            reason,
            ..
        } => {
            space.occupancy = Occupancy::Empty;
            ledger.close(booking_id, *at, *reason);
        }
        // Handled at the registry level, not here
        Event::SpaceProvisioned { .. } => return,
    }
    space.version += 1;
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            registry: SpaceRegistry::new(),
            ledger: Ledger::new(),
            wal_tx,
            notify,
            inbox: Inbox::new(),
            ratings: Ratings::new(),
            clock,
            config,
        };

        // Replay. Nobody else holds these locks yet, so try_write always
        // succeeds; never block here, we may already be inside a runtime.
        for event in &events {
            match event {
                Event::SpaceProvisioned { id, name, kind, building, floor } => {
                    engine.registry.insert(Space::new(
                        *id,
                        name.clone(),
                        kind.clone(),
                        building.clone(),
                        *floor,
                    ));
                }
                other => {
                    if let Some(shared) = engine.registry.shared(&other.space_id()) {
                        let mut guard = shared
                            .try_write()
                            .map_err(|_| io::Error::other("replay: space lock contended"))?;
                        apply_event(&mut guard, &engine.ledger, other);
                    }
                }
            }
        }
        if !events.is_empty() {
            info!(
                "replayed {} events: {} spaces, {} bookings",
                events.len(),
                engine.registry.len(),
                engine.ledger.len()
            );
        }

        Ok(engine)
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalAppend {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// The only write path for a provisioned space.
    ///
    /// Takes the space's write lock, fails with `Conflict` unless the space
    /// still matches `expected`, builds the event from the locked state, makes
    /// it durable, then applies it to registry and ledger together. If the WAL
    /// append fails nothing is applied.
    pub async fn compare_and_transition<F>(
        &self,
        space_id: Ulid,
        expected: Expected,
        mutation: F,
    ) -> Result<Space, EngineError>
    where
        F: FnOnce(&Space) -> Event,
    {
        let mut guard = self.registry.lock_expected(&space_id, expected).await?;
        let event = mutation(&guard);
        debug_assert_eq!(event.space_id(), space_id);
        self.wal_append(&event).await?;
        apply_event(&mut guard, &self.ledger, &event);
        self.notify.publish(Published::SpaceUpdated {
            space_id,
            status: guard.status(),
        });
        Ok(guard.clone())
    }

    /// Store a notification for `user_id` and fan it out.
    pub(super) fn deliver(&self, user_id: &UserId, message: &str, at: Ms) {
        let notification = Notification {
            user_id: user_id.clone(),
            message: message.to_string(),
            at,
        };
        self.inbox.record(notification.clone());
        self.notify.publish(Published::Notification(notification));
    }
}

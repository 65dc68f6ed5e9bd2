use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub type SharedSpace = Arc<RwLock<Space>>;

/// What a writer believes the space looks like. A transition commits only if
/// the space still matches when its write lock is taken.
///
/// The version makes a status that changed and changed back (Booked by one
/// user, cancelled, Booked by another) count as a different space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub status: SpaceStatus,
    pub version: u64,
}

impl Expected {
    pub fn of(space: &Space) -> Self {
        Self {
            status: space.status(),
            version: space.version,
        }
    }
}

/// A read taken before a transition.
#[derive(Debug, Clone)]
pub struct Observed {
    pub space: Space,
    /// The read had to wait for a writer.
    pub raced: bool,
}

/// Canonical current state of every space, one lock per space.
pub struct SpaceRegistry {
    spaces: DashMap<Ulid, SharedSpace>,
    names: DashMap<String, Ulid>,
}

impl Default for SpaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SpaceRegistry {
    pub fn new() -> Self {
        Self {
            spaces: DashMap::new(),
            names: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn shared(&self, id: &Ulid) -> Option<SharedSpace> {
        self.spaces.get(id).map(|e| e.value().clone())
    }

    /// Reserve `name` for `id`. Fails if another space already holds it.
    pub(super) fn claim_name(&self, name: &str, id: Ulid) -> Result<(), EngineError> {
        match self.names.entry(name.to_string()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(name.to_string())),
            Entry::Vacant(v) => {
                v.insert(id);
                Ok(())
            }
        }
    }

    pub(super) fn release_name(&self, name: &str) {
        self.names.remove(name);
    }

    pub(super) fn insert(&self, space: Space) {
        self.names.insert(space.name.clone(), space.id);
        self.spaces.insert(space.id, Arc::new(RwLock::new(space)));
    }

    /// Consistent copy of one space, taken under its read lock.
    pub async fn get(&self, id: &Ulid) -> Result<Space, EngineError> {
        let shared = self.shared(id).ok_or(EngineError::NotFound(*id))?;
        let space = shared.read().await.clone();
        Ok(space)
    }

    /// Like `get`, but also reports whether a writer held the lock when the
    /// read began. A space read after waiting out a transition reflects that
    /// transition, not the state the caller acted on.
    pub async fn observe(&self, id: &Ulid) -> Result<Observed, EngineError> {
        let shared = self.shared(id).ok_or(EngineError::NotFound(*id))?;
        if let Ok(guard) = shared.try_read() {
            return Ok(Observed {
                space: guard.clone(),
                raced: false,
            });
        }
        let space = shared.read().await.clone();
        Ok(Observed { space, raced: true })
    }

    /// Copies of every space, each consistent on its own.
    pub async fn snapshot_all(&self) -> Vec<Space> {
        let shared: Vec<SharedSpace> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for s in shared {
            out.push(s.read().await.clone());
        }
        out.sort_by(|a, b| {
            (&a.building, a.floor, &a.name).cmp(&(&b.building, b.floor, &b.name))
        });
        out
    }

    /// Like `snapshot_all` but skips spaces whose lock is held right now.
    /// A space mid-transition is picked up on a later sweep.
    pub fn try_snapshot_all(&self) -> Vec<Space> {
        self.spaces
            .iter()
            .filter_map(|e| e.value().try_read().ok().map(|g| g.clone()))
            .collect()
    }

    /// Take the space's write lock and verify it still matches `expected`.
    pub async fn lock_expected(
        &self,
        id: &Ulid,
        expected: Expected,
    ) -> Result<OwnedRwLockWriteGuard<Space>, EngineError> {
        let shared = self.shared(id).ok_or(EngineError::NotFound(*id))?;
        let guard = shared.write_owned().await;
        if Expected::of(&guard) != expected {
            return Err(EngineError::Conflict(*id));
        }
        Ok(guard)
    }
}

//! Per-project occupancy table.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::RunKind;

/// A run currently holding a project key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRun {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// Kind of the run.
    pub kind: RunKind,
    /// Fingerprint of the request that started it.
    pub fingerprint: String,
    /// When the run was admitted.
    pub started_at: DateTime<Utc>,
}

/// Why an admission was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// The occupied project key.
    pub project: String,
    /// Kind of run that was requested.
    pub requested_kind: RunKind,
    /// The run holding the key.
    pub active: ActiveRun,
}

impl Rejection {
    /// Returns true if the refused request has the same fingerprint as the
    /// active one.
    ///
    /// The guard itself never acts on this; callers use it to absorb repeats
    /// of an in-flight request and surface conflicting ones.
    #[must_use]
    pub fn is_same_request(&self, fingerprint: &str) -> bool {
        self.active.fingerprint == fingerprint
    }
}

/// Result of [`DedupGuard::admit`].
#[derive(Debug)]
pub enum Admission {
    /// The key was free; the permit holds it until dropped.
    Admitted(RunPermit),
    /// The key is held by another run.
    Rejected(Rejection),
}

/// Tracks which project keys have an active run.
///
/// Cloning shares the same table. Admission is atomic per key, so concurrent
/// callers racing for one project see exactly one `Admitted`.
#[derive(Debug, Clone, Default)]
pub struct DedupGuard {
    active: Arc<DashMap<String, ActiveRun>>,
}

impl DedupGuard {
    /// Creates an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a run for `key` if no run is active for it.
    pub fn admit(&self, key: &str, kind: RunKind, fingerprint: impl Into<String>) -> Admission {
        let fingerprint = fingerprint.into();
        match self.active.entry(key.to_string()) {
            Entry::Occupied(entry) => Admission::Rejected(Rejection {
                project: key.to_string(),
                requested_kind: kind,
                active: entry.get().clone(),
            }),
            Entry::Vacant(entry) => {
                let run = ActiveRun {
                    run_id: Uuid::new_v4(),
                    kind,
                    fingerprint,
                    started_at: Utc::now(),
                };
                entry.insert(run.clone());
                tracing::debug!(project = key, run_id = %run.run_id, %kind, "Run admitted");
                Admission::Admitted(RunPermit {
                    table: Arc::clone(&self.active),
                    key: key.to_string(),
                    run,
                })
            }
        }
    }

    /// Returns true if a run is active for `key`.
    #[must_use]
    pub fn is_active(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    /// Returns the run active for `key`, if any.
    #[must_use]
    pub fn active_run(&self, key: &str) -> Option<ActiveRun> {
        self.active.get(key).map(|run| run.clone())
    }

    /// Returns the number of occupied keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns true if no key is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Occupancy of one project key.
///
/// Dropping the permit releases the key, whether the run succeeded, failed,
/// panicked, or its task was abandoned.
pub struct RunPermit {
    table: Arc<DashMap<String, ActiveRun>>,
    key: String,
    run: ActiveRun,
}

impl std::fmt::Debug for RunPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPermit")
            .field("key", &self.key)
            .field("run_id", &self.run.run_id)
            .field("kind", &self.run.kind)
            .finish()
    }
}

impl RunPermit {
    /// Returns the occupied project key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the run id assigned on admission.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run.run_id
    }

    /// Returns the admitted run.
    #[must_use]
    pub fn run(&self) -> &ActiveRun {
        &self.run
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let run_id = self.run.run_id;
        self.table.remove_if(&self.key, |_, active| active.run_id == run_id);
        tracing::debug!(project = %self.key, %run_id, "Run released");
    }
}

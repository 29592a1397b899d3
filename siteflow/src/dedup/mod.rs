//! Dedup guard preventing overlapping runs for one project.
//!
//! The guard is a concurrency-safe occupancy table keyed by project. It only
//! tracks whether a key is occupied; request fingerprints let the caller tell
//! a repeat of the in-flight request from a conflicting one.

mod fingerprint;
mod guard;

pub use fingerprint::fingerprint_request;
pub use guard::{ActiveRun, Admission, DedupGuard, Rejection, RunPermit};

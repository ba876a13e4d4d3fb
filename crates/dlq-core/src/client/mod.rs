//! Client mirror and reconciler.
//!
//! The client keeps its own copy of the server's jobs, refreshed by polling.
//! Each cycle merges the full server list into the mirror and materializes
//! every completed job into the permanent library exactly once; the
//! `materialized` flag is the only state the server never sees.

mod error;
mod library;
mod mirror;
mod poll;
mod reconcile;

pub use error::{MaterializationError, MirrorError, ReconcileError};
pub use library::{DirLibrary, Library};
pub use mirror::{ApplyReport, MirrorDb, MirrorEntry};
pub use poll::{PollState, PollWaker, Poller};
pub use reconcile::{ReconcileReport, Reconciler};

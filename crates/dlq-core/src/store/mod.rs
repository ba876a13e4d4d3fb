//! Durable job store (SQLite via sqlx).
//!
//! Holds every queue job with its request, status, progress, retry and
//! timestamp fields. All writes go through a store-wide write gate plus a
//! transaction, so read-modify-write sequences (claim, update) are atomic with
//! respect to every other writer in the process.

mod db;
mod error;
mod jobs;
mod types;

pub use db::JobStore;
pub(crate) use db::path_to_sqlite_uri;
pub use error::StoreError;
pub use jobs::Insertion;
pub use types::*;

#[cfg(test)]
mod tests;

//! Job scheduler.
//!
//! Pure functions over a store snapshot: the scheduling order
//! `(priority rank, queued_at, id)`, derived queue positions, and which
//! pending jobs may start under `max_concurrent`. The worker pool acts on the
//! plan through the store's atomic claim, so a stale plan can never push the
//! number of downloading jobs past the limit.

mod order;
mod plan;

pub use order::{assign_positions, is_eligible, schedule_order};
pub use plan::{SchedulePlan, Scheduler};

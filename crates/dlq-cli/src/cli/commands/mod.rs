//! CLI command handlers, one file per command.

mod add;
mod cancel;
mod clear;
mod pause;
mod priority;
mod remove;
mod resume;
mod retry;
mod run;
mod show;
mod stats;
mod status;
mod sync;

pub use add::run_add;
pub use cancel::run_cancel;
pub use clear::run_clear;
pub use pause::run_pause;
pub use priority::run_priority;
pub use remove::run_remove;
pub use resume::run_resume;
pub use retry::run_retry;
pub use run::run_server;
pub use show::run_show;
pub use stats::run_stats;
pub use status::{format_progress, run_status};
pub use sync::run_sync;

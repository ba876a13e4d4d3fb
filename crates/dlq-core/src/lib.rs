pub mod clock;
pub mod config;
pub mod logging;

pub mod checksum;
pub mod client;
pub mod control;
pub mod executor;
pub mod retry;
pub mod scheduler;
pub mod scratch;
pub mod service;
pub mod store;
pub mod worker;

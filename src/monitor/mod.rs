//! Monitoring runtime: work queue, consensus, event policy and the workers
//! that tie capture, recognition and storage together.

pub mod event;
pub mod pipeline;
pub mod queue;
pub mod runner;
pub mod state;
pub mod vote;
pub mod worker;

pub use runner::run_monitor;

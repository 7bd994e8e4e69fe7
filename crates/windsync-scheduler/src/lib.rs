//! Position-synchronized event scheduler for windsync.
//!
//! This crate provides a scheduler that:
//! - Holds an immutable, deduplicated table of timed values
//! - Extrapolates playback position from periodic samples and a wall clock
//! - Fires each value change once, when it becomes due
//! - Tolerates polling jitter and small drift without resyncing
//! - Always returns to the default value on stop or forced disposal

mod error;
mod scheduler;
mod table;
mod types;

pub use error::SchedulerError;
pub use scheduler::Scheduler;
pub use table::EventTable;
pub use types::{
    DEFAULT_SAMPLE_TOLERANCE, Delivery, LONG_WAIT_FRACTION, LONG_WAIT_THRESHOLD, Tolerance,
    TimedValue, timer_interval,
};

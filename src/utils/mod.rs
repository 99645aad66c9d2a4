//! Utility functions and helpers
//!
//! Atomic file replacement and timestamp/bucketing helpers shared by the
//! event store and the change log manager.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write, atomic_write_with, cleanup_temp_files, safe_rename};
pub use time::{day_key, hour_bucket, now_millis, HOUR_MS};

//! Retry policy for outbound authenticated calls
//!
//! Classifies the outcome of one HTTP attempt as retryable or terminal and
//! drives a bounded exponential backoff around it. The classification is a
//! pure function; the executor never invents an outcome, it hands the last
//! attempt back to the caller unchanged once retries stop.

pub mod classify;
pub mod policy;

pub use classify::{Classify, Outcome, RetryDecision, TERMINAL_STATUSES, classify, classify_status};
pub use policy::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, RetryPolicy};

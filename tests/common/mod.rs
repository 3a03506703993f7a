//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::thread;
use std::time::{Duration, Instant};

/// Generous upper bound for anything a pipeline thread should finish
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Integer payloads of `tokens`, in order
pub fn ints(tokens: &[ratflow::Token]) -> Vec<i64> {
    tokens.iter().filter_map(|t| t.payload().as_int()).collect()
}

//! Correlation ids for commands and requests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing request-id source.
///
/// Ids start at `1` and are rendered as decimal strings. One generator is
/// usually shared by `Arc` between an [`ApiClient`](crate::api::ApiClient)
/// and the notify sessions it creates; tests can build independent ones.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: AtomicU64,
}

impl RequestIdGenerator {
    /// Creates a generator whose first id is `1`.
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Creates a generator whose first id is `last + 1`.
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Returns the next id as a number.
    pub fn next_value(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the next id.
    pub fn next_id(&self) -> String {
        self.next_value().to_string()
    }
}

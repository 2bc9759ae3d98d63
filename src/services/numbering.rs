use chrono::{Datelike, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates document numbers of the form `PREFIX-YYYY-NNNNNN`.
///
/// The sequence is process-local; callers that require global uniqueness
/// check the generated candidate against their index and ask for a fresh
/// one on collision before surfacing a duplicate error.
pub struct NumberSequence {
    prefix: String,
    counter: AtomicU64,
}

impl NumberSequence {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}-{:06}", self.prefix, Utc::now().year(), seq)
    }
}

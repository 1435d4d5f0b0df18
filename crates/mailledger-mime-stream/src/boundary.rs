//! Multipart boundary generator.
//!
//! Boundaries have the form `==<Prefix>Boundary:<n>.`. A `=` followed by
//! `=` never appears in Quoted-Printable or Base64 output, so a generated
//! boundary cannot collide with an encoded part.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default boundary prefix.
pub const DEFAULT_PREFIX: &str = "Mailledger";

static SHARED: LazyLock<BoundaryGenerator> = LazyLock::new(|| {
    tracing::debug!("starting shared boundary generator");
    BoundaryGenerator::default()
});

/// Generator of unique multipart boundaries.
///
/// Safe to share between threads; every call to [`BoundaryGenerator::next`]
/// returns a token never returned before by the same generator.
#[derive(Debug)]
pub struct BoundaryGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl BoundaryGenerator {
    /// Creates a new generator with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            counter: AtomicU64::new(0),
            prefix: prefix.into(),
        }
    }

    /// Returns the process-wide generator, used by multipart messages
    /// created without an explicit boundary or generator.
    #[must_use]
    pub fn shared() -> &'static Self {
        &SHARED
    }

    /// Generates the next boundary.
    #[must_use]
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("=={}Boundary:{n}.", self.prefix)
    }
}

impl Default for BoundaryGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_boundary_format() {
        let generator = BoundaryGenerator::default();
        assert_eq!(generator.next(), "==MailledgerBoundary:0.");
        assert_eq!(generator.next(), "==MailledgerBoundary:1.");
    }

    #[test]
    fn test_custom_prefix() {
        let generator = BoundaryGenerator::new("Test");
        assert_eq!(generator.next(), "==TestBoundary:0.");
    }

    #[test]
    fn test_shared_is_single_instance() {
        assert!(std::ptr::eq(
            BoundaryGenerator::shared(),
            BoundaryGenerator::shared()
        ));
        let a = BoundaryGenerator::shared().next();
        let b = BoundaryGenerator::shared().next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_concurrent_uniqueness() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;

        let generator = BoundaryGenerator::default();
        let tokens: Vec<String> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| s.spawn(|| (0..PER_THREAD).map(|_| generator.next()).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let seen: HashSet<_> = tokens.iter().cloned().collect();
        assert_eq!(seen.len(), THREADS * PER_THREAD);

        // No gaps: exactly the tokens a single thread would have produced
        let expected: HashSet<_> = (0..THREADS * PER_THREAD)
            .map(|n| format!("==MailledgerBoundary:{n}."))
            .collect();
        assert_eq!(seen, expected);
    }
}

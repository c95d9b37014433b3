//! Lamport clock for tombstone versioning.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic version counter shared by every writer of a process.
///
/// `tick` folds an observed version into the clock and hands out a version
/// strictly greater than both the observation and anything handed out
/// before. The index uses it to stamp deletion tombstones so that a
/// deletion always supersedes the versions other peers still hold.
#[derive(Debug, Default)]
pub struct Clock {
    now: AtomicU64,
}

impl Clock {
    /// Creates a clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a version greater than `version` and than every version
    /// returned so far.
    pub fn tick(&self, version: u64) -> u64 {
        let mut current = self.now.load(Ordering::Relaxed);
        loop {
            let next = current.max(version) + 1;
            match self
                .now
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_strictly_monotonic() {
        let clock = Clock::new();
        assert_eq!(clock.tick(1000), 1001);
        assert_eq!(clock.tick(0), 1002);
        assert_eq!(clock.tick(5000), 5001);
        assert_eq!(clock.tick(4999), 5002);
    }

    #[test]
    fn tick_from_threads_never_repeats() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let clock = Arc::new(Clock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..1000).map(|i| clock.tick(i)).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for version in handle.join().unwrap() {
                assert!(seen.insert(version), "version {version} handed out twice");
            }
        }
    }
}

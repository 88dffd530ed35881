//! Lock-free counter shared between submitters and dispatch tasks.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicUsize,
}

impl AtomicCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n`, returning the new value.
    pub fn add(&self, n: usize) -> usize {
        self.value.fetch_add(n, Ordering::AcqRel) + n
    }

    /// Subtract `n`, returning the new value. Saturates at zero.
    pub fn sub(&self, n: usize) -> usize {
        let prev = self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(n))
            })
            .unwrap_or_else(|v| v);
        prev.saturating_sub(n)
    }

    pub fn read(&self) -> usize {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_concurrent_add() {
        let counter = AtomicCounter::new();
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10_000 {
                        counter.add(1);
                    }
                });
            }
        });
        assert_eq!(counter.read(), 80_000);
    }

    #[test]
    fn test_concurrent_sub_returns_to_zero() {
        let counter = AtomicCounter::new();
        counter.add(80_000);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10_000 {
                        counter.sub(1);
                    }
                });
            }
        });
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_sub_saturates() {
        let counter = AtomicCounter::new();
        counter.add(2);
        assert_eq!(counter.sub(5), 0);
        assert_eq!(counter.read(), 0);
    }
}

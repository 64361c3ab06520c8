//! Versioned copy-on-write snapshots
//!
//! State read on the decision path (weight table, active ruleset) lives in a
//! `SnapshotCell`. Readers take an `Arc` to one complete version and keep it
//! for the whole round; background jobs publish a new version with an atomic
//! swap. A reader never observes a partially written value.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// A value tagged with the generation it was published at
#[derive(Debug)]
pub struct Versioned<T> {
    pub generation: u64,
    pub value: T,
}

impl<T> std::ops::Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

pub struct SnapshotCell<T> {
    inner: ArcSwap<Versioned<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: ArcSwap::from_pointee(Versioned {
                generation: 0,
                value: initial,
            }),
        }
    }

    /// Current snapshot handle
    pub fn load(&self) -> Arc<Versioned<T>> {
        self.inner.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.inner.load().generation
    }
}

impl<T: Clone> SnapshotCell<T> {
    /// Publish `value` as the next generation; returns that generation.
    pub fn publish(&self, value: T) -> u64 {
        let mut published = 0;
        self.inner.rcu(|current| {
            published = current.generation + 1;
            Versioned {
                generation: published,
                value: value.clone(),
            }
        });
        published
    }

    /// Derive the next generation from the current one.
    pub fn update<F>(&self, mut f: F) -> u64
    where
        F: FnMut(&T) -> T,
    {
        let mut published = 0;
        self.inner.rcu(|current| {
            published = current.generation + 1;
            Versioned {
                generation: published,
                value: f(&current.value),
            }
        });
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_keeps_old_snapshot_after_publish() {
        let cell = SnapshotCell::new(vec![1, 2, 3]);
        let before = cell.load();
        let generation = cell.publish(vec![4, 5]);

        assert_eq!(generation, 1);
        assert_eq!(before.value, vec![1, 2, 3]);
        assert_eq!(before.generation, 0);
        assert_eq!(cell.load().value, vec![4, 5]);
    }

    #[test]
    fn test_update_increments_generation() {
        let cell = SnapshotCell::new(10u32);
        cell.update(|v| v + 1);
        cell.update(|v| v * 2);
        let snap = cell.load();
        assert_eq!(snap.generation, 2);
        assert_eq!(**snap, 22);
    }
}

//! Bounded history of model snapshots used as extra adversarial opponents.
//!
//! The last slot of a queue always tracks the latest model state. Every
//! `increment` steps the latest snapshot is appended as a new slot instead,
//! evicting the oldest entry first when the queue is full.

use std::sync::Arc;

use candle_core::{Device, Tensor};

use crate::error::{GanError, Result};

/// What an [`SnapshotQueue::update`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// A new slot was appended.
    Inserted {
        /// The oldest entry was dropped to make room.
        evicted: bool,
    },
    /// The last slot was overwritten in place.
    Refreshed,
}

/// Bounded snapshot queue.
///
/// ```rust
/// use sunset_gan::queue::{QueueEvent, SnapshotQueue};
///
/// # fn main() -> sunset_gan::Result<()> {
/// let mut queue = SnapshotQueue::new("s0", 2, 2, 2)?;
/// assert_eq!(queue.update("s1", 1), QueueEvent::Refreshed);
/// assert_eq!(queue.update("s2", 2), QueueEvent::Inserted { evicted: false });
/// assert_eq!(queue.update("s4", 4), QueueEvent::Inserted { evicted: true });
/// let entries: Vec<&str> = queue.iter().map(|s| **s).collect();
/// assert_eq!(entries, ["s2", "s4"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotQueue<S> {
    entries: Vec<Arc<S>>,
    next_insert_t: u64,
    capacity: usize,
    increment: u64,
}

impl<S> SnapshotQueue<S> {
    /// Create a queue holding `initial`, first appending at step `first_insert_t`.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Config`] if `capacity` or `increment` is zero.
    pub fn new(initial: S, capacity: usize, increment: u64, first_insert_t: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(GanError::Config("snapshot queue capacity must be > 0".into()));
        }
        if increment == 0 {
            return Err(GanError::Config("snapshot queue increment must be > 0".into()));
        }
        Ok(Self {
            entries: vec![Arc::new(initial)],
            next_insert_t: first_insert_t,
            capacity,
            increment,
        })
    }

    /// Record the latest snapshot at global step `t`.
    pub fn update(&mut self, snapshot: S, t: u64) -> QueueEvent {
        let snapshot = Arc::new(snapshot);
        if t == self.next_insert_t {
            let evicted = self.entries.len() >= self.capacity;
            if evicted {
                self.entries.remove(0);
            }
            self.entries.push(snapshot);
            self.next_insert_t += self.increment;
            QueueEvent::Inserted { evicted }
        } else {
            match self.entries.last_mut() {
                Some(last) => *last = snapshot,
                None => self.entries.push(snapshot),
            }
            QueueEvent::Refreshed
        }
    }

    /// Number of snapshots held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A queue always holds at least one snapshot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of snapshots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Step of the next append.
    #[must_use]
    pub fn next_insert_t(&self) -> u64 {
        self.next_insert_t
    }

    /// Snapshots from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<S>> {
        self.entries.iter()
    }

    /// The live slot.
    #[must_use]
    pub fn latest(&self) -> Option<&Arc<S>> {
        self.entries.last()
    }
}

/// Generator training targets, one label per discriminator in the opponent
/// queue. All labels are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorTargets {
    labels: Vec<f32>,
}

impl GeneratorTargets {
    /// `len` zero labels.
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self {
            labels: vec![0.0; len],
        }
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Rebuild to `len` zero labels. Returns whether the length changed.
    pub fn resize(&mut self, len: usize) -> bool {
        if self.labels.len() == len {
            return false;
        }
        *self = Self::zeros(len);
        true
    }

    /// Fail with [`GanError::LabelMismatch`] unless there is one label per opponent.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn check(&self, opponents: usize) -> Result<()> {
        if self.labels.len() == opponents {
            Ok(())
        } else {
            Err(GanError::LabelMismatch {
                targets: self.labels.len(),
                opponents,
            })
        }
    }

    /// Labels broadcast over a batch: shape `(len, batch, 1)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor cannot be built.
    pub fn to_tensor(&self, batch: usize, device: &Device) -> Result<Tensor> {
        let len = self.labels.len();
        Ok(Tensor::from_slice(&self.labels, (len, 1, 1), device)?
            .broadcast_as((len, batch, 1))?
            .contiguous()?)
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_bounded_and_periodic(
            capacity in 1usize..40,
            increment in 1u64..20,
            extra in 1u64..10,
        ) {
            let mut queue = SnapshotQueue::new(0u64, capacity, increment, increment).unwrap();
            let total = capacity as u64 + extra * increment;
            for t in 1..=total {
                let before: Vec<u64> = queue.iter().map(|s| **s).collect();
                let event = queue.update(t, t);
                let after: Vec<u64> = queue.iter().map(|s| **s).collect();

                prop_assert!(queue.len() <= capacity);
                if t % increment == 0 {
                    let inserted = matches!(event, QueueEvent::Inserted { .. });
                    prop_assert!(inserted, "no insertion at t={}", t);
                } else {
                    prop_assert_eq!(event, QueueEvent::Refreshed);
                    prop_assert_eq!(&before[..before.len() - 1], &after[..after.len() - 1]);
                    prop_assert_eq!(*after.last().unwrap(), t);
                }
            }
        }
    }
}

//! Exclusion between secret rotations and compute layer operations
//!
//! A rotation rolls revisions out on the compute layer without moving the
//! layer through a transient state, so the store's compare-and-set never sees
//! it. Any number of rotations, or any number of lifecycle operations, may
//! occupy the compute layer at once, never both. Lifecycle operations still
//! exclude each other through the store.

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Counts {
    rotations: usize,
    operations: usize,
}

#[derive(Debug, Clone, Copy)]
enum Holder {
    Rotation,
    Operation,
}

/// Who currently occupies the compute layer
#[derive(Debug, Default)]
pub(crate) struct ComputeOccupancy {
    counts: Mutex<Counts>,
}

impl ComputeOccupancy {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enter for a lifecycle operation; `None` while a rotation is in flight
    pub(crate) fn enter_operation(&self) -> Option<Occupied<'_>> {
        let mut counts = self.counts.lock();
        if counts.rotations > 0 {
            return None;
        }
        counts.operations += 1;
        Some(Occupied {
            owner: self,
            holder: Holder::Operation,
        })
    }

    /// Enter for a rotation; `None` while a lifecycle operation is in flight
    pub(crate) fn enter_rotation(&self) -> Option<Occupied<'_>> {
        let mut counts = self.counts.lock();
        if counts.operations > 0 {
            return None;
        }
        counts.rotations += 1;
        Some(Occupied {
            owner: self,
            holder: Holder::Rotation,
        })
    }
}

/// Releases its hold on drop
#[must_use]
#[derive(Debug)]
pub(crate) struct Occupied<'a> {
    owner: &'a ComputeOccupancy,
    holder: Holder,
}

impl Drop for Occupied<'_> {
    fn drop(&mut self) {
        let mut counts = self.owner.counts.lock();
        match self.holder {
            Holder::Rotation => counts.rotations = counts.rotations.saturating_sub(1),
            Holder::Operation => counts.operations = counts.operations.saturating_sub(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotations_and_operations_exclude_each_other() {
        let occupancy = ComputeOccupancy::new();

        let a = occupancy.enter_rotation().expect("free");
        let b = occupancy.enter_rotation().expect("rotations share");
        assert!(occupancy.enter_operation().is_none());

        drop(a);
        assert!(occupancy.enter_operation().is_none());
        drop(b);

        let op = occupancy.enter_operation().expect("free again");
        assert!(occupancy.enter_operation().is_some());
        assert!(occupancy.enter_rotation().is_none());
        drop(op);
    }
}

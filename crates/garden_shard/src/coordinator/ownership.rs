//! Which worker owns which plant.

use crate::table::Table;
use crate::types::{Point, WorkerId};

/// Point to owning worker. Held only by the coordinator.
///
/// Every live worker's plants have exactly one entry here. A persisted plant
/// without an entry is an orphan waiting to be reassigned.
#[derive(Debug, Default)]
pub struct OwnershipMap {
    owners: Table<WorkerId>,
}

impl OwnershipMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `worker` as the owner of `point`, returning the previous owner.
    pub fn claim(&mut self, point: Point, worker: WorkerId) -> Option<WorkerId> {
        self.owners.set(point.x, point.y, worker)
    }

    pub fn claim_all<I>(&mut self, points: I, worker: WorkerId)
    where
        I: IntoIterator<Item = Point>,
    {
        for point in points {
            self.claim(point, worker);
        }
    }

    /// Drops the entry only if `worker` still owns `point`.
    pub fn release_if_owner(&mut self, point: Point, worker: WorkerId) -> bool {
        if self.owner(point) == Some(worker) {
            self.owners.remove(point.x, point.y)
        } else {
            false
        }
    }

    /// Removes and returns every point owned by `worker`.
    pub fn reclaim(&mut self, worker: WorkerId) -> Vec<Point> {
        let released = self.owners.remove_if(|_, owner| *owner == worker);
        released.keys().collect()
    }

    pub fn owner(&self, point: Point) -> Option<WorkerId> {
        self.owners.get(point.x, point.y).copied()
    }

    pub fn is_owned(&self, point: Point) -> bool {
        self.owners.has(point.x, point.y)
    }

    pub fn owned_by(&self, worker: WorkerId) -> usize {
        self.owners.get_all().filter(|owner| **owner == worker).count()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

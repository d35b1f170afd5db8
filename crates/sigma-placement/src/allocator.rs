//! Per-worker resource budgets.
//!
//! Every worker has a fixed `capacity` and a mutable `available` vector.
//! `reserve` and `release` are the only ways to change `available`, and both
//! are checked: a reservation that does not fit and a release of more than
//! is reserved are rejected with the budget left untouched. That keeps
//! `available = capacity - reserved` with no component below zero.

use sigma_core::{Resources, WorkerId};
use tracing::{debug, info};

use crate::error::{PlacementError, PlacementResult};

/// Capacity bookkeeping for one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerBudget {
    pub capacity: Resources,
    pub available: Resources,
    /// Excluded workers are never offered for placement.
    pub excluded: bool,
}

impl WorkerBudget {
    pub fn new(capacity: Resources) -> Self {
        Self {
            capacity,
            available: capacity,
            excluded: false,
        }
    }

    /// Sum of outstanding reservations.
    pub fn reserved(&self) -> Resources {
        self.capacity
            .checked_sub(self.available)
            .unwrap_or(Resources::ZERO)
    }
}

/// Budgets for the whole fleet, indexed by [`WorkerId`].
#[derive(Debug, Clone, Default)]
pub struct Allocator {
    budgets: Vec<WorkerBudget>,
}

impl Allocator {
    /// One budget per capacity, with worker ids assigned in order.
    pub fn new(capacities: impl IntoIterator<Item = Resources>) -> Self {
        Self {
            budgets: capacities.into_iter().map(WorkerBudget::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.budgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }

    pub fn budget(&self, worker: WorkerId) -> PlacementResult<&WorkerBudget> {
        self.budgets
            .get(worker)
            .ok_or(PlacementError::UnknownWorker(worker))
    }

    fn budget_mut(&mut self, worker: WorkerId) -> PlacementResult<&mut WorkerBudget> {
        self.budgets
            .get_mut(worker)
            .ok_or(PlacementError::UnknownWorker(worker))
    }

    pub fn available(&self, worker: WorkerId) -> PlacementResult<Resources> {
        Ok(self.budget(worker)?.available)
    }

    pub fn capacity(&self, worker: WorkerId) -> PlacementResult<Resources> {
        Ok(self.budget(worker)?.capacity)
    }

    pub fn is_excluded(&self, worker: WorkerId) -> bool {
        self.budgets.get(worker).is_none_or(|b| b.excluded)
    }

    /// Remove a worker from all future placement. Existing reservations stay.
    pub fn exclude(&mut self, worker: WorkerId) -> PlacementResult<()> {
        let budget = self.budget_mut(worker)?;
        if !budget.excluded {
            budget.excluded = true;
            info!(worker, "worker excluded from placement");
        }
        Ok(())
    }

    /// Ids of every worker still eligible for placement.
    pub fn usable(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.budgets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.excluded)
            .map(|(id, _)| id)
    }

    /// Whether `worker` is eligible and has room for `cost` right now.
    pub fn can_host(&self, worker: WorkerId, cost: Resources) -> bool {
        self.budgets
            .get(worker)
            .is_some_and(|b| !b.excluded && cost.fits_within(b.available))
    }

    /// Take `cost` out of `worker`'s available budget.
    pub fn reserve(&mut self, worker: WorkerId, cost: Resources) -> PlacementResult<()> {
        let budget = self.budget_mut(worker)?;
        if budget.excluded {
            return Err(PlacementError::Excluded(worker));
        }
        let remaining =
            budget
                .available
                .checked_sub(cost)
                .ok_or(PlacementError::Insufficient {
                    worker,
                    requested: cost,
                    available: budget.available,
                })?;
        budget.available = remaining;
        debug!(worker, %cost, available = %remaining, "reserved");
        Ok(())
    }

    /// Give `cost` back to `worker`. Allowed on excluded workers.
    pub fn release(&mut self, worker: WorkerId, cost: Resources) -> PlacementResult<()> {
        let budget = self.budget_mut(worker)?;
        let reserved = budget.reserved();
        if !cost.fits_within(reserved) {
            return Err(PlacementError::OverRelease {
                worker,
                released: cost,
                reserved,
            });
        }
        budget.available = budget.available + cost;
        debug!(worker, %cost, available = %budget.available, "released");
        Ok(())
    }
}

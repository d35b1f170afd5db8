//! Least-loaded-first bin-packing pass.
//!
//! For each requested job the placer pops the worker with the most headroom,
//! reserves the job's cost on it and pushes it back with its new key. A
//! worker that cannot fit the cost is dropped for the rest of the pass: all
//! jobs in one pass cost the same and budgets only shrink. When the heap
//! runs dry the remaining jobs become the plan's deficit.

use std::collections::BinaryHeap;

use sigma_core::{Resources, WorkerId};
use tracing::debug;

use crate::allocator::Allocator;
use crate::scorer::Candidate;

/// Result of one placement pass for a single job kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementPlan {
    /// One worker per placed job, in placement order. Each entry already
    /// holds a reservation of the job's cost.
    pub assignments: Vec<WorkerId>,
    /// Jobs that no worker could accept.
    pub deficit: u32,
}

impl PlacementPlan {
    pub fn is_complete(&self) -> bool {
        self.deficit == 0
    }
}

/// Place `count` jobs of `cost` onto the `eligible` workers.
///
/// Reservations are committed in `allocator` as the pass goes. The caller
/// owns them from here on and must `release` any it does not use.
pub fn place(
    allocator: &mut Allocator,
    eligible: &[WorkerId],
    cost: Resources,
    count: u32,
) -> PlacementPlan {
    let mut heap: BinaryHeap<Candidate> = eligible
        .iter()
        .filter(|&&w| !allocator.is_excluded(w))
        .filter_map(|&w| {
            let available = allocator.available(w).ok()?;
            Some(Candidate::new(w, available, cost))
        })
        .collect();

    let mut plan = PlacementPlan::default();
    'jobs: for _ in 0..count {
        while let Some(candidate) = heap.pop() {
            if allocator.reserve(candidate.worker, cost).is_err() {
                continue;
            }
            plan.assignments.push(candidate.worker);
            if let Ok(available) = allocator.available(candidate.worker) {
                heap.push(Candidate::new(candidate.worker, available, cost));
            }
            debug!(worker = candidate.worker, %cost, "placed job");
            continue 'jobs;
        }
        plan.deficit += 1;
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAINING: Resources = Resources::new(1, 1);
    const SELFPLAY: Resources = Resources::new(1, 0);

    #[test]
    fn single_worker_capacity_rejection() {
        let mut alloc = Allocator::new([Resources::new(2, 1)]);

        let training = place(&mut alloc, &[0], TRAINING, 1);
        assert_eq!(training.assignments, vec![0]);
        assert_eq!(alloc.available(0).unwrap(), Resources::new(1, 0));

        let selfplay = place(&mut alloc, &[0], SELFPLAY, 2);
        assert_eq!(selfplay.assignments, vec![0]);
        assert_eq!(selfplay.deficit, 1);
        assert!(!selfplay.is_complete());
        assert_eq!(alloc.available(0).unwrap(), Resources::ZERO);
    }

    #[test]
    fn spreads_to_least_loaded_worker() {
        let mut alloc = Allocator::new([Resources::new(4, 0), Resources::new(4, 0)]);
        let plan = place(&mut alloc, &[0, 1], SELFPLAY, 4);
        // Ties go to worker 0, then the heap alternates as headroom shrinks.
        assert_eq!(plan.assignments, vec![0, 1, 0, 1]);
        assert!(plan.is_complete());
    }

    #[test]
    fn skips_workers_missing_a_component() {
        // Worker 0 has lots of cpu but no gpu; the gpu job must go to 1.
        let mut alloc = Allocator::new([Resources::new(16, 0), Resources::new(1, 1)]);
        let plan = place(&mut alloc, &[0, 1], TRAINING, 2);
        assert_eq!(plan.assignments, vec![1]);
        assert_eq!(plan.deficit, 1);
        assert_eq!(alloc.available(0).unwrap(), Resources::new(16, 0));
    }

    #[test]
    fn only_eligible_workers_are_considered() {
        let mut alloc = Allocator::new([Resources::new(8, 0), Resources::new(1, 0)]);
        let plan = place(&mut alloc, &[1], SELFPLAY, 2);
        assert_eq!(plan.assignments, vec![1]);
        assert_eq!(plan.deficit, 1);
    }

    #[test]
    fn excluded_workers_are_skipped() {
        let mut alloc = Allocator::new([Resources::new(8, 0), Resources::new(1, 0)]);
        alloc.exclude(0).unwrap();
        let plan = place(&mut alloc, &[0, 1], SELFPLAY, 1);
        assert_eq!(plan.assignments, vec![1]);
    }

    #[test]
    fn placement_is_deterministic() {
        let capacities = [Resources::new(3, 1), Resources::new(5, 0), Resources::new(3, 1)];
        let run = || {
            let mut alloc = Allocator::new(capacities);
            let t = place(&mut alloc, &[0, 1, 2], TRAINING, 2);
            let s = place(&mut alloc, &[0, 1, 2], SELFPLAY, 6);
            (t, s)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn zero_count_places_nothing() {
        let mut alloc = Allocator::new([Resources::new(1, 0)]);
        assert_eq!(place(&mut alloc, &[0], SELFPLAY, 0), PlacementPlan::default());
    }
}

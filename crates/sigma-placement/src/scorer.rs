//! Worker ordering for least-loaded-first placement.
//!
//! A worker's priority is its headroom for the resource the job needs:
//! GPU jobs compare `(gpu, cpu)` available, everything else `(cpu, gpu)`.
//! More headroom wins. Equal headroom goes to the worker listed first in
//! the fleet, which makes placement deterministic.

use std::cmp::Ordering;

use sigma_core::{Resources, WorkerId};

/// Lexicographic headroom of `available` for a job costing `cost`.
pub fn headroom_key(available: Resources, cost: Resources) -> (u32, u32) {
    if cost.gpu > 0 {
        (available.gpu, available.cpu)
    } else {
        (available.cpu, available.gpu)
    }
}

/// A heap entry. `BinaryHeap<Candidate>` pops the best worker first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub key: (u32, u32),
    pub worker: WorkerId,
}

impl Candidate {
    pub fn new(worker: WorkerId, available: Resources, cost: Resources) -> Self {
        Self {
            key: headroom_key(available, cost),
            worker,
        }
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.worker.cmp(&self.worker))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    const CPU_JOB: Resources = Resources::new(1, 0);
    const GPU_JOB: Resources = Resources::new(1, 1);

    #[test]
    fn key_depends_on_job_kind() {
        let available = Resources::new(6, 2);
        assert_eq!(headroom_key(available, CPU_JOB), (6, 2));
        assert_eq!(headroom_key(available, GPU_JOB), (2, 6));
    }

    #[test]
    fn most_headroom_pops_first() {
        let mut heap = BinaryHeap::from([
            Candidate::new(0, Resources::new(2, 0), CPU_JOB),
            Candidate::new(1, Resources::new(8, 0), CPU_JOB),
            Candidate::new(2, Resources::new(4, 4), CPU_JOB),
        ]);
        let order: Vec<_> = std::iter::from_fn(|| heap.pop().map(|c| c.worker)).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn gpu_jobs_prefer_gpu_headroom() {
        let mut heap = BinaryHeap::from([
            Candidate::new(0, Resources::new(16, 1), GPU_JOB),
            Candidate::new(1, Resources::new(2, 2), GPU_JOB),
        ]);
        assert_eq!(heap.pop().map(|c| c.worker), Some(1));
    }

    #[test]
    fn ties_go_to_lower_worker_index() {
        let mut heap = BinaryHeap::from([
            Candidate::new(3, Resources::new(4, 0), CPU_JOB),
            Candidate::new(1, Resources::new(4, 0), CPU_JOB),
            Candidate::new(2, Resources::new(4, 0), CPU_JOB),
        ]);
        let order: Vec<_> = std::iter::from_fn(|| heap.pop().map(|c| c.worker)).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}

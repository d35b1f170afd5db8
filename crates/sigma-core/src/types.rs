//! Shared types used across SigmaGrid crates.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Index of a worker in fleet order.
pub type WorkerId = usize;

/// Identifier of a single job incarnation. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// The two kinds of long-lived worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Consumes replay bytes and emits checkpoints.
    Training,
    /// Plays games with the current model and emits replay bytes.
    Selfplay,
}

impl JobKind {
    /// Placement order: trainers first.
    pub const ALL: [JobKind; 2] = [JobKind::Training, JobKind::Selfplay];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Training => "training",
            JobKind::Selfplay => "selfplay",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical job slot. Respawned jobs keep the slot of the job they replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    pub kind: JobKind,
    pub index: u32,
}

impl SlotId {
    pub fn new(kind: JobKind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.index)
    }
}

/// A `(cpu, gpu)` resource vector.
///
/// Ordering is componentwise: `a <= b` holds only when both components of
/// `a` are at most those of `b`, so two vectors may be incomparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: u32,
    pub gpu: u32,
}

impl Resources {
    pub const ZERO: Resources = Resources { cpu: 0, gpu: 0 };

    pub const fn new(cpu: u32, gpu: u32) -> Self {
        Self { cpu, gpu }
    }

    /// Whether `self` can be carved out of `budget`.
    pub fn fits_within(self, budget: Resources) -> bool {
        self.cpu <= budget.cpu && self.gpu <= budget.gpu
    }

    /// Componentwise subtraction, `None` if any component would go negative.
    pub fn checked_sub(self, rhs: Resources) -> Option<Resources> {
        Some(Resources {
            cpu: self.cpu.checked_sub(rhs.cpu)?,
            gpu: self.gpu.checked_sub(rhs.gpu)?,
        })
    }

    /// Componentwise addition, `None` on overflow.
    pub fn checked_add(self, rhs: Resources) -> Option<Resources> {
        Some(Resources {
            cpu: self.cpu.checked_add(rhs.cpu)?,
            gpu: self.gpu.checked_add(rhs.gpu)?,
        })
    }

    pub fn is_zero(self) -> bool {
        self == Resources::ZERO
    }
}

impl PartialOrd for Resources {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.cpu.cmp(&other.cpu), self.gpu.cmp(&other.gpu)) {
            (a, b) if a == b => Some(a),
            (Ordering::Equal, b) => Some(b),
            (a, Ordering::Equal) => Some(a),
            _ => None,
        }
    }
}

/// Saturates at `u32::MAX` per component.
impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            cpu: self.cpu.saturating_add(rhs.cpu),
            gpu: self.gpu.saturating_add(rhs.gpu),
        }
    }
}

impl Sum for Resources {
    fn sum<I: Iterator<Item = Resources>>(iter: I) -> Resources {
        iter.fold(Resources::ZERO, Add::add)
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(cpu={}, gpu={})", self.cpu, self.gpu)
    }
}

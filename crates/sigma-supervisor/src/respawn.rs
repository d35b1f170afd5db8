//! Crash-loop protection for logical job slots.
//!
//! Every slot owns a [`RespawnTracker`]. Each death is recorded with the
//! uptime of the job that died: a job that stayed up for at least
//! `stable_after` was healthy and clears the slot's count, anything shorter
//! counts as a flap. Once the count would exceed `max_respawns` the slot is
//! abandoned.

use std::time::Duration;

use tracing::{debug, warn};

/// Respawn limits shared by every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlapGuard {
    /// Consecutive short-lived deaths tolerated per slot.
    pub max_respawns: u32,
    /// Uptime after which a death no longer counts as flapping.
    pub stable_after: Duration,
}

impl Default for FlapGuard {
    fn default() -> Self {
        Self {
            max_respawns: 5,
            stable_after: Duration::from_secs(600),
        }
    }
}

/// What to do with a slot after one of its jobs died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespawnDecision {
    /// Place a replacement. `attempt` is the slot's flap count so far.
    Respawn { attempt: u32 },
    /// Give up on the slot.
    Abandon { respawns: u32 },
}

/// Death bookkeeping for a single slot.
#[derive(Debug, Clone)]
pub struct RespawnTracker {
    guard: FlapGuard,
    /// Deaths since the last stable run.
    respawns: u32,
    /// Total deaths over the slot's lifetime.
    deaths: u64,
    abandoned: bool,
}

impl RespawnTracker {
    pub fn new(guard: FlapGuard) -> Self {
        Self {
            guard,
            respawns: 0,
            deaths: 0,
            abandoned: false,
        }
    }

    /// Record a death after `uptime` and decide whether to respawn.
    ///
    /// Once abandoned, the slot stays abandoned.
    pub fn record_death(&mut self, uptime: Duration) -> RespawnDecision {
        self.deaths += 1;
        if self.abandoned {
            return RespawnDecision::Abandon {
                respawns: self.respawns,
            };
        }

        if uptime >= self.guard.stable_after {
            if self.respawns > 0 {
                debug!(?uptime, previous = self.respawns, "stable run, respawn count reset");
            }
            self.respawns = 0;
            return RespawnDecision::Respawn { attempt: 0 };
        }

        if self.respawns >= self.guard.max_respawns {
            self.abandoned = true;
            warn!(
                respawns = self.respawns,
                max = self.guard.max_respawns,
                "slot is flapping, abandoning"
            );
            return RespawnDecision::Abandon {
                respawns: self.respawns,
            };
        }

        self.respawns += 1;
        RespawnDecision::Respawn {
            attempt: self.respawns,
        }
    }

    pub fn respawns(&self) -> u32 {
        self.respawns
    }

    pub fn deaths(&self) -> u64 {
        self.deaths
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }
}

//! Checkpoint merge strategies.

use sigma_core::MergeKind;

use crate::checkpoint::ModelCheckpoint;

/// Decides which staged checkpoint becomes the new merged model.
///
/// `staged` is in the order the trainers reported during the round.
pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn merge<'a>(&self, staged: &'a [ModelCheckpoint]) -> Option<&'a ModelCheckpoint>;
}

/// The first trainer to report in the round wins.
///
/// Trainer versions count signals per trainer and are not comparable
/// across trainers, so they play no part in the choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepLatest;

impl MergeStrategy for KeepLatest {
    fn name(&self) -> &'static str {
        "keep-latest"
    }

    fn merge<'a>(&self, staged: &'a [ModelCheckpoint]) -> Option<&'a ModelCheckpoint> {
        staged.first()
    }
}

pub fn from_kind(kind: MergeKind) -> Box<dyn MergeStrategy> {
    match kind {
        MergeKind::KeepLatest => Box::new(KeepLatest),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use sigma_core::{JobKind, SlotId};

    use super::*;

    fn staged(index: u32, version: u64) -> ModelCheckpoint {
        ModelCheckpoint {
            path: PathBuf::from(format!("/stage/training-{index}.ckpt")),
            version,
            trainer: SlotId::new(JobKind::Training, index),
        }
    }

    #[test]
    fn first_reporter_wins() {
        let round = [staged(2, 1), staged(0, 4), staged(1, 9)];
        assert_eq!(KeepLatest.merge(&round).map(|c| c.trainer.index), Some(2));
    }

    #[test]
    fn busier_trainer_does_not_outrank_first_reporter() {
        let round = [staged(0, 1), staged(1, 7)];
        assert_eq!(KeepLatest.merge(&round).map(|c| c.trainer.index), Some(0));
    }

    #[test]
    fn empty_round_merges_nothing() {
        assert!(KeepLatest.merge(&[]).is_none());
    }

    #[test]
    fn kind_selects_strategy() {
        assert_eq!(from_kind(MergeKind::KeepLatest).name(), "keep-latest");
    }
}

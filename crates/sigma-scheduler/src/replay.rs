//! Replay stream fabric: one pipe per trainer.
//!
//! Every training slot gets an anonymous pipe when the scheduler is built.
//! Selfplay slots are dealt out to those pipes round-robin and every job
//! incarnation receives a duplicate of its side: trainers read, producers
//! write. Concurrent producer writes interleave at the byte level; nothing
//! frames them.
//!
//! The fabric keeps both ends of every pipe open for its whole lifetime, so
//! bytes written before a trainer restart are still there for the next
//! incarnation. A side is only considered closed when the last slot
//! referencing it is abandoned, and closing one side while the other is
//! still referenced is fatal.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, PipeReader, PipeWriter};
use std::process::Stdio;

use sigma_core::{JobKind, SlotId};
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult, StreamSide};

pub struct ReplayStream {
    trainer: SlotId,
    reader: PipeReader,
    writer: PipeWriter,
    trainer_attached: bool,
    producers: BTreeSet<SlotId>,
}

impl ReplayStream {
    pub fn open(trainer: SlotId) -> SchedulerResult<Self> {
        let (reader, writer) = io::pipe().map_err(|source| SchedulerError::Pipe {
            stream: trainer,
            source,
        })?;
        Ok(Self {
            trainer,
            reader,
            writer,
            trainer_attached: true,
            producers: BTreeSet::new(),
        })
    }

    pub fn trainer(&self) -> SlotId {
        self.trainer
    }

    pub fn producers(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.producers.iter().copied()
    }

    pub fn reader_stdio(&self) -> io::Result<Stdio> {
        Ok(self.reader.try_clone()?.into())
    }

    pub fn writer_stdio(&self) -> io::Result<Stdio> {
        Ok(self.writer.try_clone()?.into())
    }

    fn detach_trainer(&mut self) -> SchedulerResult<()> {
        if !self.producers.is_empty() {
            return Err(SchedulerError::PipeClosed {
                stream: self.trainer,
                abandoned: self.trainer,
                still_attached: StreamSide::Producers,
            });
        }
        self.trainer_attached = false;
        Ok(())
    }

    fn detach_producer(&mut self, producer: SlotId) -> SchedulerResult<()> {
        self.producers.remove(&producer);
        if self.producers.is_empty() && self.trainer_attached {
            return Err(SchedulerError::PipeClosed {
                stream: self.trainer,
                abandoned: producer,
                still_attached: StreamSide::Trainer,
            });
        }
        Ok(())
    }
}

/// All replay streams plus the producer → stream assignment.
#[derive(Default)]
pub struct ReplayFabric {
    streams: BTreeMap<SlotId, ReplayStream>,
    assignment: BTreeMap<SlotId, SlotId>,
    /// Round-robin position over `streams`.
    cursor: usize,
}

impl ReplayFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the pipe a training slot will read from.
    pub fn open(&mut self, trainer: SlotId) -> SchedulerResult<()> {
        let stream = ReplayStream::open(trainer)?;
        self.streams.insert(trainer, stream);
        debug!(%trainer, "replay stream opened");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn stream(&self, trainer: SlotId) -> Option<&ReplayStream> {
        self.streams.get(&trainer)
    }

    /// Attach a producer to the next stream in round-robin order.
    ///
    /// Returns `None` when there are no streams at all.
    pub fn assign(&mut self, producer: SlotId) -> Option<SlotId> {
        if self.streams.is_empty() {
            return None;
        }
        let idx = self.cursor % self.streams.len();
        self.cursor = self.cursor.wrapping_add(1);
        let (&trainer, stream) = self.streams.iter_mut().nth(idx)?;
        stream.producers.insert(producer);
        self.assignment.insert(producer, trainer);
        debug!(%producer, %trainer, "producer assigned to replay stream");
        Some(trainer)
    }

    /// The trainer whose stream `producer` writes to.
    pub fn stream_of(&self, producer: SlotId) -> Option<SlotId> {
        self.assignment.get(&producer).copied()
    }

    /// Stdin for a new incarnation of `trainer`.
    pub fn stdin_for(&self, trainer: SlotId) -> io::Result<Stdio> {
        match self.streams.get(&trainer) {
            Some(stream) => stream.reader_stdio(),
            None => Ok(Stdio::null()),
        }
    }

    /// Stdout for a new incarnation of `producer`. Unassigned producers
    /// write to the null device.
    pub fn stdout_for(&self, producer: SlotId) -> io::Result<Stdio> {
        match self
            .stream_of(producer)
            .and_then(|trainer| self.streams.get(&trainer))
        {
            Some(stream) => stream.writer_stdio(),
            None => Ok(Stdio::null()),
        }
    }

    /// Drop `slot`'s reference to its stream for good.
    pub fn abandon(&mut self, slot: SlotId) -> SchedulerResult<()> {
        match slot.kind {
            JobKind::Training => match self.streams.get_mut(&slot) {
                Some(stream) => stream.detach_trainer(),
                None => Ok(()),
            },
            JobKind::Selfplay => {
                let Some(trainer) = self.assignment.remove(&slot) else {
                    return Ok(());
                };
                match self.streams.get_mut(&trainer) {
                    Some(stream) => stream.detach_producer(slot),
                    None => {
                        warn!(%slot, %trainer, "producer assigned to a missing stream");
                        Ok(())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn training(i: u32) -> SlotId {
        SlotId::new(JobKind::Training, i)
    }

    fn selfplay(i: u32) -> SlotId {
        SlotId::new(JobKind::Selfplay, i)
    }

    fn fabric(trainers: u32) -> ReplayFabric {
        let mut fabric = ReplayFabric::new();
        for i in 0..trainers {
            fabric.open(training(i)).unwrap();
        }
        fabric
    }

    #[test]
    fn producers_are_dealt_round_robin() {
        let mut fabric = fabric(2);
        let assigned: Vec<_> = (0..5).map(|i| fabric.assign(selfplay(i)).unwrap()).collect();
        assert_eq!(
            assigned,
            vec![training(0), training(1), training(0), training(1), training(0)]
        );
        assert_eq!(fabric.stream_of(selfplay(3)), Some(training(1)));
        assert_eq!(
            fabric.stream(training(0)).unwrap().producers().collect::<Vec<_>>(),
            vec![selfplay(0), selfplay(2), selfplay(4)]
        );
    }

    #[test]
    fn no_trainers_means_no_assignment() {
        let mut fabric = fabric(0);
        assert_eq!(fabric.assign(selfplay(0)), None);
        assert!(fabric.stdout_for(selfplay(0)).is_ok());
        assert!(fabric.abandon(selfplay(0)).is_ok());
    }

    #[test]
    fn bytes_flow_from_writer_to_reader() {
        let fabric = fabric(1);
        let stream = fabric.stream(training(0)).unwrap();
        let mut writer = stream.writer.try_clone().unwrap();
        let mut reader = stream.reader.try_clone().unwrap();

        writer.write_all(b"game-record").unwrap();
        let mut buf = [0u8; 11];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"game-record");
    }

    #[test]
    fn abandoning_trainer_with_producers_is_fatal() {
        let mut fabric = fabric(1);
        fabric.assign(selfplay(0));
        let err = fabric.abandon(training(0)).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::PipeClosed {
                still_attached: StreamSide::Producers,
                ..
            }
        ));
    }

    #[test]
    fn abandoning_last_producer_is_fatal() {
        let mut fabric = fabric(1);
        fabric.assign(selfplay(0));
        fabric.assign(selfplay(1));

        fabric.abandon(selfplay(0)).unwrap();
        let err = fabric.abandon(selfplay(1)).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::PipeClosed {
                abandoned,
                still_attached: StreamSide::Trainer,
                ..
            } if abandoned == selfplay(1)
        ));
    }

    #[test]
    fn idle_trainer_can_be_abandoned() {
        let mut fabric = fabric(2);
        fabric.assign(selfplay(0));
        assert!(fabric.abandon(training(1)).is_ok());
    }
}

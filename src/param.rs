//! Parameter changes sent as fixed 5-byte records over a byte ring
//!
//! Changes are like in the VST model: an index and a float value, with no
//! restriction on the value. Up to 256 parameters can be addressed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ring_buffer::{channel, Consumer, Producer};
use crate::segment::SharedSegment;

/// Encoded size of one change: 1 byte index + 4 bytes little-endian `f32`.
pub const PARAMETER_RECORD_SIZE: usize = 5;

/// A single parameter change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub index: u8,
    pub value: f32,
}

impl ParameterChange {
    pub fn new(index: u8, value: f32) -> Self {
        Self { index, value }
    }

    /// Wire form, independent of host byte order.
    pub fn encode(&self) -> [u8; PARAMETER_RECORD_SIZE] {
        let value = self.value.to_le_bytes();
        [self.index, value[0], value[1], value[2], value[3]]
    }

    pub fn decode(record: &[u8; PARAMETER_RECORD_SIZE]) -> Self {
        Self {
            index: record[0],
            value: f32::from_le_bytes([record[1], record[2], record[3], record[4]]),
        }
    }
}

/// Sends parameter changes to the real-time thread.
pub struct ParameterWriter {
    ring: Producer<u8>,
    scratch: [u8; PARAMETER_RECORD_SIZE],
}

impl ParameterWriter {
    /// Claim the producer side of a `u8` segment.
    pub fn new(segment: Arc<SharedSegment>) -> Result<Self> {
        Ok(Producer::<u8>::new(segment)?.into())
    }

    /// Enqueue a change of parameter `index` to `value`.
    ///
    /// The record is written whole or not at all: returns false, leaving the
    /// ring untouched, when fewer than five bytes are free.
    pub fn enqueue_change(&mut self, index: u8, value: f32) -> bool {
        if self.ring.available_write() < PARAMETER_RECORD_SIZE {
            return false;
        }
        self.scratch = ParameterChange::new(index, value).encode();
        self.ring.push(&self.scratch) == PARAMETER_RECORD_SIZE
    }

    pub fn enqueue(&mut self, change: ParameterChange) -> bool {
        self.enqueue_change(change.index, change.value)
    }

    /// Whole records that can currently be enqueued.
    pub fn available_records(&self) -> usize {
        self.ring.available_write() / PARAMETER_RECORD_SIZE
    }
}

impl From<Producer<u8>> for ParameterWriter {
    fn from(ring: Producer<u8>) -> Self {
        Self {
            ring,
            scratch: [0; PARAMETER_RECORD_SIZE],
        }
    }
}

/// Receives parameter changes on the real-time thread.
pub struct ParameterReader {
    ring: Consumer<u8>,
    scratch: [u8; PARAMETER_RECORD_SIZE],
}

impl ParameterReader {
    /// Claim the consumer side of a `u8` segment.
    pub fn new(segment: Arc<SharedSegment>) -> Result<Self> {
        Ok(Consumer::<u8>::new(segment)?.into())
    }

    /// Dequeue one change into `out`.
    ///
    /// Returns false if the ring is empty, or if fewer than five bytes could
    /// be read, in which case the partial record is dropped.
    pub fn dequeue_change(&mut self, out: &mut ParameterChange) -> bool {
        if self.ring.is_empty() {
            return false;
        }
        if self.ring.pop(&mut self.scratch) != PARAMETER_RECORD_SIZE {
            return false;
        }
        *out = ParameterChange::decode(&self.scratch);
        true
    }

    pub fn try_dequeue(&mut self) -> Option<ParameterChange> {
        let mut change = ParameterChange::default();
        self.dequeue_change(&mut change).then_some(change)
    }

    /// Iterate over the changes pending right now, without allocating.
    ///
    /// The count is fixed when `drain` is called; records enqueued while
    /// iterating are left for the next call, so a callback that drains once
    /// per quantum always finishes.
    pub fn drain(&mut self) -> Drain<'_> {
        let remaining = self.available_records();
        Drain {
            reader: self,
            remaining,
        }
    }

    /// Whole records waiting to be dequeued.
    pub fn available_records(&self) -> usize {
        self.ring.available_read() / PARAMETER_RECORD_SIZE
    }
}

impl From<Consumer<u8>> for ParameterReader {
    fn from(ring: Consumer<u8>) -> Self {
        Self {
            ring,
            scratch: [0; PARAMETER_RECORD_SIZE],
        }
    }
}

/// Iterator returned by [`ParameterReader::drain`].
pub struct Drain<'a> {
    reader: &'a mut ParameterReader,
    remaining: usize,
}

impl Iterator for Drain<'_> {
    type Item = ParameterChange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let change = self.reader.try_dequeue();
        if change.is_none() {
            self.remaining = 0;
        }
        change
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Allocate a parameter ring holding `records` whole changes and return both ends.
pub fn parameter_channel(records: usize) -> Result<(ParameterWriter, ParameterReader)> {
    let capacity = records.saturating_mul(PARAMETER_RECORD_SIZE);
    let (producer, consumer) = channel::<u8>(capacity)?;
    Ok((producer.into(), consumer.into()))
}

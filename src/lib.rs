//! Wait-free transport of audio and parameter changes to a real-time thread
//!
//! A [`SharedSegment`] is a fixed block of memory holding two `u32` cursors
//! and a circular element store. One [`Producer`] and one [`Consumer`] operate
//! on it from two threads with no locks: each side only ever stores its own
//! cursor (release) and reads the other's (acquire). Nothing on the transfer
//! path blocks, allocates or panics; a transfer that cannot complete reports a
//! short count instead.
//!
//! Two protocols sit on top:
//! - [`AudioWriter`]/[`AudioReader`] move interleaved `f32` samples, with
//!   [`interleave`]/[`deinterleave`] for planar callback buffers.
//! - [`ParameterWriter`]/[`ParameterReader`] move 5-byte `(index, value)`
//!   records that are written and read whole or not at all.

pub mod audio;
pub mod config;
pub mod element;
pub mod error;
pub mod param;
pub mod ring_buffer;
pub mod segment;

pub use audio::{
    audio_channel, deinterleave, deinterleave_with_quantum, interleave, interleave_with_quantum,
    AudioReader, AudioWriter, RENDER_QUANTUM_FRAMES,
};
pub use element::{Element, ElementKind};
pub use error::{Error, Result, Role};
pub use param::{
    parameter_channel, ParameterChange, ParameterReader, ParameterWriter, PARAMETER_RECORD_SIZE,
};
pub use ring_buffer::{channel, Consumer, Producer, RingBuffer, Span, Spans, WriteRegion};
pub use segment::{SharedSegment, HEADER_BYTES};

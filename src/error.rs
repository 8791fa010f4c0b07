//! Errors raised while setting up segments, ring ends and channel layouts

use thiserror::Error;

use crate::element::ElementKind;

/// Setup-time failures.
///
/// Steady-state transfers never produce one of these: short transfers and
/// dropped parameter records are reported through return values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("ring capacity must be at least one element")]
    ZeroCapacity,

    #[error("ring capacity {capacity} cannot be addressed by a 32-bit cursor")]
    CapacityOverflow { capacity: usize },

    #[error("segment of {len} bytes is too small, need at least {min}")]
    SegmentTooSmall { len: usize, min: usize },

    #[error("segment base address is not {align}-byte aligned")]
    MisalignedSegment { align: usize },

    #[error("storage of {len} bytes is not a whole number of {element_size}-byte elements")]
    RaggedStorage { len: usize, element_size: usize },

    #[error("cursor value {cursor} is outside a ring of {slots} slots")]
    CursorOutOfRange { cursor: u32, slots: usize },

    #[error("segment holds {found} elements, this handle requires {expected}")]
    ElementMismatch {
        expected: ElementKind,
        found: ElementKind,
    },

    #[error("the {role} side of this segment is already claimed")]
    RoleTaken { role: Role },

    #[error("not enough space in output arrays {found} != {expected}")]
    ChannelMismatch { expected: usize, found: usize },

    #[error("input and output of incompatible sizes: expected {expected} samples, found {found}")]
    FrameMismatch { expected: usize, found: usize },

    #[error("render quantum must be at least one frame")]
    ZeroQuantum,
}

/// Which end of a segment a handle owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Producer => f.write_str("producer"),
            Role::Consumer => f.write_str("consumer"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

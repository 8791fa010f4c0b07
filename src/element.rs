//! Element types a ring can carry

use std::fmt;

/// Runtime tag for the element type a segment was laid out for.
///
/// Handles check it on construction so that, for example, an audio reader is
/// never attached to a byte-oriented parameter segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl ElementKind {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            ElementKind::U8 | ElementKind::I8 => 1,
            ElementKind::U16 | ElementKind::I16 => 2,
            ElementKind::U32 | ElementKind::I32 | ElementKind::F32 => 4,
            ElementKind::F64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ElementKind::U8 => "u8",
            ElementKind::I8 => "i8",
            ElementKind::U16 => "u16",
            ElementKind::I16 => "i16",
            ElementKind::U32 => "u32",
            ElementKind::I32 => "i32",
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A plain numeric type that can live in a shared segment.
///
/// Sealed: every implementor is `Copy`, has no padding, and accepts every bit
/// pattern, so storage slots may be handed out as `&mut [T]` even before the
/// producer has written them.
pub trait Element: sealed::Sealed + Copy + Default + Send + Sync + 'static {
    const KIND: ElementKind;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const KIND: ElementKind = ElementKind::$kind;
            }
        )*
    };
}

impl_element! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    f32 => F32,
    f64 => F64,
}

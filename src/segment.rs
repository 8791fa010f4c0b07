//! Fixed-size memory block shared by the two ends of a ring
//!
//! Layout (byte offsets):
//!
//! ```text
//! [0, 4)                      write cursor, u32
//! [4, 8)                      read cursor, u32
//! [8, 8 + slots * elem_size)  circular storage, slots = capacity + 1
//! ```
//!
//! The extra slot tells "full" apart from "empty" without a separate counter.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, trace};

use crate::element::{Element, ElementKind};
use crate::error::{Error, Result, Role};

/// Bytes taken by the two cursors in front of the storage.
pub const HEADER_BYTES: usize = 8;

const WRITE_CURSOR_OFFSET: usize = 0;
const READ_CURSOR_OFFSET: usize = 4;

/// Owned segments are always aligned for the widest element kind.
const OWNED_ALIGN: usize = 8;

/// One ring's shared memory: two cursors plus `capacity + 1` element slots.
///
/// A segment is created once during setup and handed to both threads as an
/// `Arc<SharedSegment>`. It only tracks which roles are currently claimed;
/// the element data is read and written by `Producer`/`Consumer` handles.
pub struct SharedSegment {
    base: NonNull<u8>,
    len: usize,
    kind: ElementKind,
    slots: usize,
    /// `Some` when this segment allocated the block and must free it.
    owned: Option<Layout>,
    producer_claimed: AtomicBool,
    consumer_claimed: AtomicBool,
}

// SAFETY: the block is only touched through the atomic cursors and through
// raw pointers confined to the region each side owns between cursor updates.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Number of bytes a segment holding `capacity` usable elements needs.
    pub fn storage_size(capacity: usize, kind: ElementKind) -> Result<usize> {
        let slots = slots_for(capacity)?;
        slots
            .checked_mul(kind.size())
            .and_then(|bytes| bytes.checked_add(HEADER_BYTES))
            .ok_or(Error::CapacityOverflow { capacity })
    }

    /// Allocate a zeroed segment able to hold `capacity` elements of `kind`.
    pub fn with_capacity(capacity: usize, kind: ElementKind) -> Result<Arc<Self>> {
        let len = Self::storage_size(capacity, kind)?;
        let layout = Layout::from_size_align(len, OWNED_ALIGN)
            .map_err(|_| Error::CapacityOverflow { capacity })?;

        // SAFETY: `len` is at least HEADER_BYTES + 2 elements, never zero.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let base = match NonNull::new(ptr) {
            Some(base) => base,
            None => alloc::handle_alloc_error(layout),
        };

        debug!(
            "Allocated {}-byte segment for {} {} elements",
            len, capacity, kind
        );

        Ok(Arc::new(Self {
            base,
            len,
            kind,
            slots: capacity + 1,
            owned: Some(layout),
            producer_claimed: AtomicBool::new(false),
            consumer_claimed: AtomicBool::new(false),
        }))
    }

    /// Typed shorthand for [`SharedSegment::with_capacity`].
    pub fn for_element<T: Element>(capacity: usize) -> Result<Arc<Self>> {
        Self::with_capacity(capacity, T::KIND)
    }

    /// Attach to a segment that lives in memory allocated elsewhere.
    ///
    /// The existing cursor values are kept, so a block already initialised by
    /// another runtime can be picked up where it is.
    ///
    /// # Safety
    ///
    /// `base` must point to `len` initialised bytes that stay valid, and are
    /// accessed by nothing except the ring protocol, until the returned
    /// segment is dropped. At most one producer and one consumer may operate
    /// on the block across everything that maps it.
    pub unsafe fn from_raw_parts(
        base: NonNull<u8>,
        len: usize,
        kind: ElementKind,
    ) -> Result<Arc<Self>> {
        let align = kind.size().max(std::mem::align_of::<AtomicU32>());
        if base.as_ptr() as usize % align != 0 {
            return Err(Error::MisalignedSegment { align });
        }

        let min = HEADER_BYTES + 2 * kind.size();
        if len < min {
            return Err(Error::SegmentTooSmall { len, min });
        }

        let storage = len - HEADER_BYTES;
        if storage % kind.size() != 0 {
            return Err(Error::RaggedStorage {
                len: storage,
                element_size: kind.size(),
            });
        }

        let slots = storage / kind.size();
        if slots > u32::MAX as usize {
            return Err(Error::CapacityOverflow { capacity: slots - 1 });
        }

        let segment = Self {
            base,
            len,
            kind,
            slots,
            owned: None,
            producer_claimed: AtomicBool::new(false),
            consumer_claimed: AtomicBool::new(false),
        };

        let (write, read) = segment.cursors();
        for cursor in [write, read] {
            if cursor as usize >= slots {
                return Err(Error::CursorOutOfRange { cursor, slots });
            }
        }

        debug!(
            "Attached to {}-byte external segment ({} {} slots, write={}, read={})",
            len, slots, kind, write, read
        );
        Ok(Arc::new(segment))
    }

    /// Element type the storage was laid out for.
    pub fn element_kind(&self) -> ElementKind {
        self.kind
    }

    /// Physical number of storage slots (`capacity + 1`).
    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// Usable number of elements.
    pub fn capacity(&self) -> usize {
        self.slots - 1
    }

    /// Total size of the block, header included.
    pub fn byte_len(&self) -> usize {
        self.len
    }

    /// Base address of the block, for handing to another runtime.
    pub fn as_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// Snapshot of `(write, read)` cursors. Diagnostic only: either value
    /// may be stale by the time it is returned.
    pub fn cursors(&self) -> (u32, u32) {
        (
            self.write_cursor().load(Ordering::Acquire),
            self.read_cursor().load(Ordering::Acquire),
        )
    }

    pub(crate) fn write_cursor(&self) -> &AtomicU32 {
        // SAFETY: offset 0 is inside the block and 4-byte aligned; AtomicU32
        // has the same layout as u32.
        unsafe { &*(self.base.as_ptr().add(WRITE_CURSOR_OFFSET) as *const AtomicU32) }
    }

    pub(crate) fn read_cursor(&self) -> &AtomicU32 {
        // SAFETY: as above, offset 4.
        unsafe { &*(self.base.as_ptr().add(READ_CURSOR_OFFSET) as *const AtomicU32) }
    }

    /// Pointer to slot 0. Callers must have checked the element kind.
    pub(crate) fn storage<T: Element>(&self) -> NonNull<T> {
        debug_assert_eq!(T::KIND, self.kind);
        // SAFETY: HEADER_BYTES < len, and the offset keeps element alignment
        // because the base is aligned to at least the element size.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(HEADER_BYTES).cast::<T>()) }
    }

    pub(crate) fn check_kind(&self, expected: ElementKind) -> Result<()> {
        if self.kind != expected {
            return Err(Error::ElementMismatch {
                expected,
                found: self.kind,
            });
        }
        Ok(())
    }

    pub(crate) fn claim(&self, role: Role) -> Result<()> {
        self.role_flag(role)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::RoleTaken { role })?;
        trace!("Claimed {} side of {} segment", role, self.kind);
        Ok(())
    }

    pub(crate) fn release(&self, role: Role) {
        self.role_flag(role).store(false, Ordering::Release);
        trace!("Released {} side of {} segment", role, self.kind);
    }

    fn role_flag(&self, role: Role) -> &AtomicBool {
        match role {
            Role::Producer => &self.producer_claimed,
            Role::Consumer => &self.consumer_claimed,
        }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if let Some(layout) = self.owned {
            // SAFETY: allocated in `with_capacity` with exactly this layout.
            unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}

impl fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (write, read) = self.cursors();
        f.debug_struct("SharedSegment")
            .field("kind", &self.kind)
            .field("slots", &self.slots)
            .field("byte_len", &self.len)
            .field("write", &write)
            .field("read", &read)
            .field("owned", &self.owned.is_some())
            .finish()
    }
}

fn slots_for(capacity: usize) -> Result<usize> {
    if capacity == 0 {
        return Err(Error::ZeroCapacity);
    }
    match capacity.checked_add(1) {
        Some(slots) if slots <= u32::MAX as usize => Ok(slots),
        _ => Err(Error::CapacityOverflow { capacity }),
    }
}

//! Wait-free single-producer single-consumer ring buffer over a shared segment

use std::marker::PhantomData;
use std::ops::Range;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::element::Element;
use crate::error::{Result, Role};
use crate::segment::SharedSegment;

/// A run of contiguous storage slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    /// Slot index in storage where the run starts.
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// The up-to-two runs touched by one transfer: `first` ends at or before
/// the end of storage, `second` (possibly empty) restarts at slot 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Spans {
    pub first: Span,
    pub second: Span,
}

impl Spans {
    /// Total number of slots covered.
    pub fn len(&self) -> usize {
        self.first.len + self.second.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write access to the free slots granted by
/// [`Producer::write_with_offsets`], addressed by absolute storage offset.
pub struct WriteRegion<'a, T: Element> {
    storage: NonNull<T>,
    spans: Spans,
    _marker: PhantomData<&'a mut [T]>,
}

impl<T: Element> WriteRegion<'_, T> {
    /// The granted runs.
    pub fn spans(&self) -> Spans {
        self.spans
    }

    /// Store `value` at storage slot `offset`. Returns false, and stores
    /// nothing, if the slot lies outside the granted spans.
    pub fn set(&mut self, offset: usize, value: T) -> bool {
        if !self.contains(offset) {
            return false;
        }
        // SAFETY: `offset` is inside a span this region exclusively owns.
        unsafe { self.storage.as_ptr().add(offset).write(value) };
        true
    }

    /// Copy as much of `src` as fits into the span containing `offset`,
    /// starting at `offset`. Returns the number of elements copied.
    pub fn copy_to(&mut self, offset: usize, src: &[T]) -> usize {
        let end = [self.spans.first, self.spans.second]
            .into_iter()
            .map(|span| span.range())
            .find(|range| range.contains(&offset))
            .map_or(offset, |range| range.end);
        let count = src.len().min(end - offset);
        if count == 0 {
            return 0;
        }
        // SAFETY: `offset..offset + count` lies inside one granted span.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.storage.as_ptr().add(offset), count);
        }
        count
    }

    fn contains(&self, offset: usize) -> bool {
        self.spans.first.range().contains(&offset) || self.spans.second.range().contains(&offset)
    }
}

/// Cursor arithmetic and copying shared by both handle types.
struct RingCore<T: Element> {
    segment: Arc<SharedSegment>,
    storage: NonNull<T>,
    slots: usize,
}

// SAFETY: the storage pointer targets the segment kept alive by `segment`;
// each handle only touches the slots its role owns.
unsafe impl<T: Element> Send for RingCore<T> {}
unsafe impl<T: Element> Sync for RingCore<T> {}

impl<T: Element> RingCore<T> {
    fn new(segment: Arc<SharedSegment>) -> Self {
        let storage = segment.storage::<T>();
        let slots = segment.slot_count();
        Self {
            segment,
            storage,
            slots,
        }
    }

    /// `(read, write)`, both with acquire ordering.
    #[inline]
    fn load(&self) -> (usize, usize) {
        let rd = self.segment.read_cursor().load(Ordering::Acquire) as usize;
        let wr = self.segment.write_cursor().load(Ordering::Acquire) as usize;
        (rd, wr)
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots - 1
    }

    #[inline]
    fn readable(&self, rd: usize, wr: usize) -> usize {
        (wr + self.slots - rd) % self.slots
    }

    #[inline]
    fn writable(&self, rd: usize, wr: usize) -> usize {
        self.capacity() - self.readable(rd, wr)
    }

    fn available_read(&self) -> usize {
        let (rd, wr) = self.load();
        self.readable(rd, wr)
    }

    fn available_write(&self) -> usize {
        let (rd, wr) = self.load();
        self.writable(rd, wr)
    }

    fn is_empty(&self) -> bool {
        let (rd, wr) = self.load();
        wr == rd
    }

    fn is_full(&self) -> bool {
        let (rd, wr) = self.load();
        (wr + 1) % self.slots == rd
    }

    /// Split `count` slots starting at `start` at the end of storage.
    #[inline]
    fn spans(&self, start: usize, count: usize) -> Spans {
        let first = (self.slots - start).min(count);
        Spans {
            first: Span {
                offset: start,
                len: first,
            },
            second: Span {
                offset: 0,
                len: count - first,
            },
        }
    }

    /// Free slots for up to `amount` elements.
    fn write_spans(&self, amount: usize) -> (usize, Spans) {
        let (rd, wr) = self.load();
        let count = amount.min(self.writable(rd, wr));
        (wr, self.spans(wr, count))
    }

    /// Filled slots for up to `amount` elements.
    fn read_spans(&self, amount: usize) -> (usize, Spans) {
        let (rd, wr) = self.load();
        let count = amount.min(self.readable(rd, wr));
        (rd, self.spans(rd, count))
    }

    /// Publish `count` newly written elements to the consumer.
    #[inline]
    fn commit_write(&self, wr: usize, count: usize) {
        let next = (wr + count) % self.slots;
        self.segment
            .write_cursor()
            .store(next as u32, Ordering::Release);
    }

    /// Hand `count` consumed slots back to the producer.
    #[inline]
    fn commit_read(&self, rd: usize, count: usize) {
        let next = (rd + count) % self.slots;
        self.segment
            .read_cursor()
            .store(next as u32, Ordering::Release);
    }

    /// # Safety
    ///
    /// `span` must come from `write_spans`/`read_spans` on this ring and must
    /// not be published yet.
    #[inline]
    unsafe fn span_ptr(&self, span: Span) -> *mut T {
        self.storage.as_ptr().add(span.offset)
    }

    fn push(&mut self, elements: &[T]) -> usize {
        let (wr, spans) = self.write_spans(elements.len());
        if spans.is_empty() {
            return 0;
        }

        // SAFETY: the spans are free slots only the producer may touch until
        // the write cursor moves past them.
        unsafe {
            ptr::copy_nonoverlapping(elements.as_ptr(), self.span_ptr(spans.first), spans.first.len);
            ptr::copy_nonoverlapping(
                elements.as_ptr().add(spans.first.len),
                self.span_ptr(spans.second),
                spans.second.len,
            );
        }

        self.commit_write(wr, spans.len());
        spans.len()
    }

    fn pop(&mut self, elements: &mut [T]) -> usize {
        let (rd, spans) = self.read_spans(elements.len());
        if spans.is_empty() {
            return 0;
        }

        // SAFETY: the spans hold published elements only the consumer may
        // touch until the read cursor moves past them.
        unsafe {
            ptr::copy_nonoverlapping(self.span_ptr(spans.first), elements.as_mut_ptr(), spans.first.len);
            ptr::copy_nonoverlapping(
                self.span_ptr(spans.second),
                elements.as_mut_ptr().add(spans.first.len),
                spans.second.len,
            );
        }

        self.commit_read(rd, spans.len());
        spans.len()
    }

    fn write_with_callback<F>(&mut self, amount: usize, f: F) -> usize
    where
        F: FnOnce(&mut [T], &mut [T]) -> usize,
    {
        let (wr, spans) = self.write_spans(amount);
        if spans.is_empty() {
            return 0;
        }

        // SAFETY: the two spans are disjoint free slots owned by the producer.
        let (first, second) = unsafe {
            (
                slice::from_raw_parts_mut(self.span_ptr(spans.first), spans.first.len),
                slice::from_raw_parts_mut(self.span_ptr(spans.second), spans.second.len),
            )
        };

        let written = f(first, second).min(spans.len());
        if written > 0 {
            self.commit_write(wr, written);
        }
        written
    }

    fn write_with_offsets<F>(&mut self, amount: usize, f: F) -> usize
    where
        F: FnOnce(&mut WriteRegion<'_, T>) -> usize,
    {
        let (wr, spans) = self.write_spans(amount);
        if spans.is_empty() {
            return 0;
        }

        let mut region = WriteRegion {
            storage: self.storage,
            spans,
            _marker: PhantomData,
        };

        let written = f(&mut region).min(spans.len());
        if written > 0 {
            self.commit_write(wr, written);
        }
        written
    }

    fn read_with_callback<F>(&mut self, amount: usize, f: F) -> usize
    where
        F: FnOnce(&[T], &[T]) -> usize,
    {
        let (rd, spans) = self.read_spans(amount);
        if spans.is_empty() {
            return 0;
        }

        // SAFETY: published slots, owned by the consumer until committed.
        let (first, second) = unsafe {
            (
                slice::from_raw_parts(self.span_ptr(spans.first) as *const T, spans.first.len),
                slice::from_raw_parts(self.span_ptr(spans.second) as *const T, spans.second.len),
            )
        };

        let consumed = f(first, second).min(spans.len());
        if consumed > 0 {
            self.commit_read(rd, consumed);
        }
        consumed
    }
}

/// Clamp optional `(offset, length)` arguments to a slice length.
fn window(len: usize, offset: usize, length: Option<usize>) -> Range<usize> {
    let start = offset.min(len);
    let end = length.map_or(len, |length| start.saturating_add(length).min(len));
    start..end
}

/// Write end of a ring. At most one exists per segment at a time.
pub struct Producer<T: Element> {
    core: RingCore<T>,
}

impl<T: Element> Producer<T> {
    /// Claim the producer side of `segment`.
    pub fn new(segment: Arc<SharedSegment>) -> Result<Self> {
        segment.check_kind(T::KIND)?;
        segment.claim(Role::Producer)?;
        Ok(Self {
            core: RingCore::new(segment),
        })
    }

    /// Write as many of `elements` as fit. Returns the number written; the
    /// rest stays with the caller.
    pub fn push(&mut self, elements: &[T]) -> usize {
        self.core.push(elements)
    }

    /// Like [`push`](Self::push), reading at most `length` elements starting
    /// at `offset`. Out-of-range arguments are clamped to the slice.
    pub fn push_from(&mut self, elements: &[T], offset: usize, length: Option<usize>) -> usize {
        let range = window(elements.len(), offset, length);
        self.core.push(&elements[range])
    }

    /// Hand up to `amount` free slots to `f` as two slices, the second one
    /// being the wrapped part. `f` returns how many elements it wrote from
    /// the start of the first slice; only those are published.
    pub fn write_with_callback<F>(&mut self, amount: usize, f: F) -> usize
    where
        F: FnOnce(&mut [T], &mut [T]) -> usize,
    {
        self.core.write_with_callback(amount, f)
    }

    /// Like [`write_with_callback`](Self::write_with_callback), but the
    /// callback addresses storage by absolute slot offset through a
    /// [`WriteRegion`] describing the granted spans.
    pub fn write_with_offsets<F>(&mut self, amount: usize, f: F) -> usize
    where
        F: FnOnce(&mut WriteRegion<'_, T>) -> usize,
    {
        self.core.write_with_offsets(amount, f)
    }

    /// Free slots. Never more than the truth; may be less if the consumer
    /// has just read.
    pub fn available_write(&self) -> usize {
        self.core.available_write()
    }

    pub fn available_read(&self) -> usize {
        self.core.available_read()
    }

    pub fn is_full(&self) -> bool {
        self.core.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity()
    }

    pub fn segment(&self) -> &Arc<SharedSegment> {
        &self.core.segment
    }
}

impl<T: Element> Drop for Producer<T> {
    fn drop(&mut self) {
        self.core.segment.release(Role::Producer);
    }
}

/// Read end of a ring. At most one exists per segment at a time.
pub struct Consumer<T: Element> {
    core: RingCore<T>,
}

impl<T: Element> Consumer<T> {
    /// Claim the consumer side of `segment`.
    pub fn new(segment: Arc<SharedSegment>) -> Result<Self> {
        segment.check_kind(T::KIND)?;
        segment.claim(Role::Consumer)?;
        Ok(Self {
            core: RingCore::new(segment),
        })
    }

    /// Read up to `elements.len()` elements into the start of `elements`.
    pub fn pop(&mut self, elements: &mut [T]) -> usize {
        self.core.pop(elements)
    }

    /// Like [`pop`](Self::pop), writing at most `length` elements starting at
    /// `offset`. Out-of-range arguments are clamped to the slice.
    pub fn pop_into(&mut self, elements: &mut [T], offset: usize, length: Option<usize>) -> usize {
        let range = window(elements.len(), offset, length);
        self.core.pop(&mut elements[range])
    }

    /// Hand up to `amount` readable elements to `f` as two slices in order.
    /// `f` returns how many it consumed; only those are released.
    pub fn read_with_callback<F>(&mut self, amount: usize, f: F) -> usize
    where
        F: FnOnce(&[T], &[T]) -> usize,
    {
        self.core.read_with_callback(amount, f)
    }

    /// Readable elements. Never more than the truth; may be less if the
    /// producer has just written.
    pub fn available_read(&self) -> usize {
        self.core.available_read()
    }

    pub fn available_write(&self) -> usize {
        self.core.available_write()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.core.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity()
    }

    pub fn segment(&self) -> &Arc<SharedSegment> {
        &self.core.segment
    }
}

impl<T: Element> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.core.segment.release(Role::Consumer);
    }
}

/// Both ends of one ring in a single handle, for use from one thread.
///
/// Use [`split`](Self::split) or [`channel`] to move the ends to separate
/// threads.
pub struct RingBuffer<T: Element> {
    producer: Producer<T>,
    consumer: Consumer<T>,
}

impl<T: Element> RingBuffer<T> {
    /// Claim both sides of `segment`.
    pub fn new(segment: Arc<SharedSegment>) -> Result<Self> {
        let producer = Producer::new(Arc::clone(&segment))?;
        let consumer = Consumer::new(segment)?;
        Ok(Self { producer, consumer })
    }

    /// Allocate a fresh segment for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(SharedSegment::for_element::<T>(capacity)?)
    }

    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        (self.producer, self.consumer)
    }

    pub fn push(&mut self, elements: &[T]) -> usize {
        self.producer.push(elements)
    }

    pub fn push_from(&mut self, elements: &[T], offset: usize, length: Option<usize>) -> usize {
        self.producer.push_from(elements, offset, length)
    }

    pub fn pop(&mut self, elements: &mut [T]) -> usize {
        self.consumer.pop(elements)
    }

    pub fn pop_into(&mut self, elements: &mut [T], offset: usize, length: Option<usize>) -> usize {
        self.consumer.pop_into(elements, offset, length)
    }

    pub fn write_with_callback<F>(&mut self, amount: usize, f: F) -> usize
    where
        F: FnOnce(&mut [T], &mut [T]) -> usize,
    {
        self.producer.write_with_callback(amount, f)
    }

    pub fn write_with_offsets<F>(&mut self, amount: usize, f: F) -> usize
    where
        F: FnOnce(&mut WriteRegion<'_, T>) -> usize,
    {
        self.producer.write_with_offsets(amount, f)
    }

    pub fn read_with_callback<F>(&mut self, amount: usize, f: F) -> usize
    where
        F: FnOnce(&[T], &[T]) -> usize,
    {
        self.consumer.read_with_callback(amount, f)
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }

    pub fn available_read(&self) -> usize {
        self.consumer.available_read()
    }

    pub fn available_write(&self) -> usize {
        self.producer.available_write()
    }

    pub fn segment(&self) -> &Arc<SharedSegment> {
        self.producer.segment()
    }
}

/// Allocate a segment for `capacity` elements and return its two ends.
pub fn channel<T: Element>(capacity: usize) -> Result<(Producer<T>, Consumer<T>)> {
    RingBuffer::with_capacity(capacity).map(RingBuffer::split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::error::Error;

    fn assert_accounting<T: Element>(ring: &RingBuffer<T>) {
        assert_eq!(ring.available_read() + ring.available_write(), ring.capacity());
    }

    #[test]
    fn test_write_read() {
        let mut ring = RingBuffer::<f32>::with_capacity(10).unwrap();
        assert_eq!(ring.capacity(), 10);

        let samples = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        assert_eq!(ring.push(&samples), 7);
        assert_eq!(ring.available_write(), 3);
        assert_accounting(&ring);

        let mut output = [0.0f32; 10];
        assert_eq!(ring.pop(&mut output), 7);
        assert_eq!(&output[..7], &samples);
        assert!(ring.is_empty());
        assert_accounting(&ring);
    }

    #[test]
    fn test_capacity_is_slots_minus_one() {
        let ring = RingBuffer::<u16>::with_capacity(31).unwrap();
        assert_eq!(ring.segment().slot_count(), 32);
        assert_eq!(ring.capacity(), 31);
    }

    #[test]
    fn test_overflow() {
        let mut ring = RingBuffer::<f32>::with_capacity(3).unwrap();

        let samples = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(ring.push(&samples), 3);
        assert!(ring.is_full());

        let (_, read_before) = ring.segment().cursors();
        assert_eq!(ring.push(&samples), 0);
        assert_eq!(ring.segment().cursors().1, read_before);
        assert_accounting(&ring);
    }

    #[test]
    fn test_underflow() {
        let mut ring = RingBuffer::<f32>::with_capacity(16).unwrap();

        ring.push(&[1.0, 2.0]);

        let mut output = [0.0f32; 4];
        assert_eq!(ring.pop(&mut output), 2);

        let (write_before, _) = ring.segment().cursors();
        assert_eq!(ring.pop(&mut output), 0);
        assert_eq!(ring.segment().cursors().0, write_before);
    }

    #[test]
    fn test_wrapping_round_trip() {
        let mut ring = RingBuffer::<i32>::with_capacity(7).unwrap();
        let mut scratch = [0i32; 8];

        // Park both cursors near the end of storage.
        assert_eq!(ring.push(&[0; 6]), 6);
        assert_eq!(ring.pop(&mut scratch[..6]), 6);
        assert_eq!(ring.segment().cursors(), (6, 6));

        let data = [10, 11, 12, 13, 14];
        assert_eq!(ring.push(&data), 5);
        assert_eq!(ring.segment().cursors().0, 3);
        assert_accounting(&ring);

        assert_eq!(ring.pop(&mut scratch), 5);
        assert_eq!(&scratch[..5], &data);
        assert_eq!(ring.segment().cursors(), (3, 3));
    }

    #[test]
    fn test_accounting_across_many_states() {
        let mut ring = RingBuffer::<u8>::with_capacity(5).unwrap();
        let mut scratch = [0u8; 5];
        for step in 0..40usize {
            ring.push(&[step as u8; 3][..step % 4]);
            assert_accounting(&ring);
            ring.pop(&mut scratch[..step % 3]);
            assert_accounting(&ring);
        }
    }

    #[test]
    fn test_push_from_and_pop_into() {
        let mut ring = RingBuffer::<u32>::with_capacity(8).unwrap();
        let data = [1, 2, 3, 4, 5, 6];

        assert_eq!(ring.push_from(&data, 2, Some(3)), 3);
        assert_eq!(ring.push_from(&data, 5, Some(100)), 1);
        assert_eq!(ring.push_from(&data, 10, None), 0);

        let mut output = [0u32; 6];
        assert_eq!(ring.pop_into(&mut output, 1, Some(2)), 2);
        assert_eq!(output, [0, 3, 4, 0, 0, 0]);
        assert_eq!(ring.pop_into(&mut output, 3, None), 2);
        assert_eq!(output, [0, 3, 4, 5, 6, 0]);
    }

    #[test]
    fn test_write_with_callback_spans_wrap() {
        let mut ring = RingBuffer::<f32>::with_capacity(5).unwrap();
        let mut scratch = [0.0f32; 6];
        ring.push(&[0.0; 4]);
        ring.pop(&mut scratch[..4]);

        let written = ring.write_with_callback(4, |first, second| {
            assert_eq!(first.len(), 2);
            assert_eq!(second.len(), 2);
            first.copy_from_slice(&[1.0, 2.0]);
            second.copy_from_slice(&[3.0, 4.0]);
            4
        });
        assert_eq!(written, 4);

        assert_eq!(ring.pop(&mut scratch), 4);
        assert_eq!(&scratch[..4], &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_write_with_callback_partial_and_clamped() {
        let mut ring = RingBuffer::<f32>::with_capacity(4).unwrap();

        let written = ring.write_with_callback(3, |first, _| {
            first[0] = 9.0;
            1
        });
        assert_eq!(written, 1);
        assert_eq!(ring.available_read(), 1);

        // A callback claiming more than it was granted is clamped.
        let written = ring.write_with_callback(2, |_, _| 50);
        assert_eq!(written, 2);
        assert_eq!(ring.available_read(), 3);

        ring.push(&[0.0]);
        let called = std::cell::Cell::new(false);
        assert_eq!(
            ring.write_with_callback(1, |_, _| {
                called.set(true);
                1
            }),
            0
        );
        assert!(!called.get());
    }

    #[test]
    fn test_write_with_offsets() {
        let mut ring = RingBuffer::<i16>::with_capacity(4).unwrap();
        let mut scratch = [0i16; 5];
        ring.push(&[0; 3]);
        ring.pop(&mut scratch[..3]);

        let written = ring.write_with_offsets(4, |region| {
            let spans = region.spans();
            assert_eq!(spans.first, Span { offset: 3, len: 2 });
            assert_eq!(spans.second, Span { offset: 0, len: 2 });

            assert!(!region.set(2, -1));
            assert_eq!(region.copy_to(3, &[7, 8, 9]), 2);
            assert!(region.set(0, 9));
            assert!(region.set(1, 10));
            4
        });
        assert_eq!(written, 4);

        assert_eq!(ring.pop(&mut scratch), 4);
        assert_eq!(&scratch[..4], &[7, 8, 9, 10]);
    }

    #[test]
    fn test_read_with_callback() {
        let mut ring = RingBuffer::<u8>::with_capacity(4).unwrap();
        let mut scratch = [0u8; 4];
        ring.push(&[0; 3]);
        ring.pop(&mut scratch[..3]);
        ring.push(&[1, 2, 3, 4]);

        let mut seen = Vec::new();
        let consumed = ring.read_with_callback(10, |first, second| {
            seen.extend_from_slice(first);
            seen.extend_from_slice(second);
            3
        });
        assert_eq!(consumed, 3);
        assert_eq!(seen, [1, 2, 3, 4]);
        assert_eq!(ring.available_read(), 1);
        assert_eq!(ring.pop(&mut scratch), 1);
        assert_eq!(scratch[0], 4);
    }

    #[test]
    fn test_split_ends_share_storage() {
        let (mut producer, mut consumer) = channel::<f64>(4).unwrap();
        assert_eq!(producer.push(&[0.25, 0.5]), 2);
        assert_eq!(consumer.available_read(), 2);

        let mut output = [0.0f64; 4];
        assert_eq!(consumer.pop(&mut output), 2);
        assert_eq!(&output[..2], &[0.25, 0.5]);
        assert_eq!(producer.available_write(), 4);
    }

    #[test]
    fn test_roles_released_on_drop() {
        let segment = SharedSegment::for_element::<f32>(8).unwrap();
        let producer = Producer::<f32>::new(Arc::clone(&segment)).unwrap();
        assert!(matches!(
            Producer::<f32>::new(Arc::clone(&segment)),
            Err(Error::RoleTaken { role: Role::Producer })
        ));
        drop(producer);

        let consumer = Consumer::<f32>::new(Arc::clone(&segment)).unwrap();
        assert!(matches!(
            RingBuffer::<f32>::new(Arc::clone(&segment)),
            Err(Error::RoleTaken { role: Role::Consumer })
        ));

        // The failed RingBuffer gave its producer claim back.
        assert!(Producer::<f32>::new(Arc::clone(&segment)).is_ok());

        drop(consumer);
        assert!(RingBuffer::<f32>::new(segment).is_ok());
    }

    #[test]
    fn test_attached_segment_resumes_from_existing_cursors() {
        // Header + 6 f32 slots. Another runtime left three samples pending
        // across the wrap: write = 2, read = 5, data in slots 5, 0, 1.
        let mut block = vec![0u32; 8];
        block[0] = 2;
        block[1] = 5;
        block[2 + 5] = 10.0f32.to_bits();
        block[2] = 11.0f32.to_bits();
        block[2 + 1] = 12.0f32.to_bits();
        let base = std::ptr::NonNull::new(block.as_mut_ptr().cast::<u8>()).unwrap();

        {
            let segment =
                unsafe { SharedSegment::from_raw_parts(base, 32, ElementKind::F32) }.unwrap();
            let mut ring = RingBuffer::<f32>::new(Arc::clone(&segment)).unwrap();
            assert_eq!(ring.capacity(), 5);
            assert_eq!(ring.available_read(), 3);
            assert_accounting(&ring);

            let mut output = [0.0f32; 5];
            assert_eq!(ring.pop(&mut output), 3);
            assert_eq!(&output[..3], &[10.0, 11.0, 12.0]);
            assert_eq!(segment.cursors(), (2, 2));

            assert_eq!(ring.push(&[1.0, 2.0, 3.0, 4.0]), 4);
            assert_eq!(segment.cursors(), (0, 2));
            assert_eq!(ring.pop(&mut output), 4);
            assert_eq!(&output[..4], &[1.0, 2.0, 3.0, 4.0]);
            assert_eq!(segment.cursors(), (0, 0));
        }

        // The foreign block holds the final state in its byte layout.
        assert_eq!(&block[..2], &[0, 0]);
        assert_eq!(block[2 + 5], 4.0f32.to_bits());
    }

    #[test]
    fn test_element_kind_checked() {
        let segment = SharedSegment::for_element::<u8>(8).unwrap();
        assert!(matches!(
            Consumer::<f32>::new(segment),
            Err(Error::ElementMismatch {
                expected: ElementKind::F32,
                found: ElementKind::U8,
            })
        ));
    }
}

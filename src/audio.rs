//! Interleaved audio transport between a producer thread and the real-time callback

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ring_buffer::{channel, Consumer, Producer};
use crate::segment::SharedSegment;

/// Frames processed per real-time callback.
pub const RENDER_QUANTUM_FRAMES: usize = 128;

/// Producer end of an `f32` ring carrying interleaved samples.
pub struct AudioWriter {
    ring: Producer<f32>,
}

impl AudioWriter {
    /// Claim the producer side of an `f32` segment.
    pub fn new(segment: Arc<SharedSegment>) -> Result<Self> {
        Ok(Self {
            ring: Producer::new(segment)?,
        })
    }

    /// Enqueue interleaved samples.
    ///
    /// Returns the number of samples written. `buf` is left untouched, so
    /// the caller can resubmit `&buf[written..]` later. Enqueue whole frames
    /// (multiples of the channel count) to keep channels aligned.
    pub fn enqueue(&mut self, buf: &[f32]) -> usize {
        self.ring.push(buf)
    }

    /// Samples that can be enqueued with a guarantee of success.
    pub fn available_write(&self) -> usize {
        self.ring.available_write()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl From<Producer<f32>> for AudioWriter {
    fn from(ring: Producer<f32>) -> Self {
        Self { ring }
    }
}

/// Consumer end of an `f32` ring carrying interleaved samples.
pub struct AudioReader {
    ring: Consumer<f32>,
}

impl AudioReader {
    /// Claim the consumer side of an `f32` segment.
    pub fn new(segment: Arc<SharedSegment>) -> Result<Self> {
        Ok(Self {
            ring: Consumer::new(segment)?,
        })
    }

    /// Dequeue at most `buf.len()` samples into the start of `buf`.
    /// Returns the number of samples dequeued; the rest of `buf` is left
    /// as it was.
    pub fn dequeue(&mut self, buf: &mut [f32]) -> usize {
        if self.ring.is_empty() {
            return 0;
        }
        self.ring.pop(buf)
    }

    /// Dequeue into `buf` and zero whatever could not be filled, so an
    /// underflow plays as silence instead of stale samples.
    pub fn dequeue_or_silence(&mut self, buf: &mut [f32]) -> usize {
        let read = self.dequeue(buf);
        buf[read..].fill(0.0);
        read
    }

    /// Samples that can be dequeued with a guarantee of success.
    pub fn available_read(&self) -> usize {
        self.ring.available_read()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl From<Consumer<f32>> for AudioReader {
    fn from(ring: Consumer<f32>) -> Self {
        Self { ring }
    }
}

/// Allocate an audio ring holding `capacity` samples and return both ends.
pub fn audio_channel(capacity: usize) -> Result<(AudioWriter, AudioReader)> {
    let (producer, consumer) = channel::<f32>(capacity)?;
    Ok((producer.into(), consumer.into()))
}

/// Interleaved -> planar, one render quantum.
///
/// `input` holds `n * 128` interleaved samples; `output` must hold exactly
/// `n` channel slices of at least 128 samples each.
pub fn deinterleave<O: AsMut<[f32]>>(input: &[f32], output: &mut [O]) -> Result<()> {
    deinterleave_with_quantum(input, output, RENDER_QUANTUM_FRAMES)
}

/// [`deinterleave`] with an explicit quantum.
pub fn deinterleave_with_quantum<O: AsMut<[f32]>>(
    input: &[f32],
    output: &mut [O],
    quantum: usize,
) -> Result<()> {
    if quantum == 0 {
        return Err(Error::ZeroQuantum);
    }

    let channels = output.len();
    let expected = quantum_samples(channels, quantum, input.len())?;
    if input.len() != expected {
        if input.len() % quantum == 0 {
            return Err(Error::ChannelMismatch {
                expected: input.len() / quantum,
                found: channels,
            });
        }
        return Err(Error::FrameMismatch {
            expected,
            found: input.len(),
        });
    }
    check_planar_lengths(output.iter_mut().map(|channel| channel.as_mut().len()), quantum)?;

    for (ch, out_channel) in output.iter_mut().enumerate() {
        let out_channel = &mut out_channel.as_mut()[..quantum];
        for (frame, sample) in out_channel.iter_mut().enumerate() {
            *sample = input[frame * channels + ch];
        }
    }
    Ok(())
}

/// Planar -> interleaved, one render quantum.
///
/// `input` holds `n` channel slices of at least 128 samples; `output` must
/// be exactly `n * 128` samples long.
pub fn interleave<I: AsRef<[f32]>>(input: &[I], output: &mut [f32]) -> Result<()> {
    interleave_with_quantum(input, output, RENDER_QUANTUM_FRAMES)
}

/// [`interleave`] with an explicit quantum.
pub fn interleave_with_quantum<I: AsRef<[f32]>>(
    input: &[I],
    output: &mut [f32],
    quantum: usize,
) -> Result<()> {
    if quantum == 0 {
        return Err(Error::ZeroQuantum);
    }

    let channels = input.len();
    let expected = quantum_samples(channels, quantum, output.len())?;
    if expected != output.len() {
        return Err(Error::FrameMismatch {
            expected,
            found: output.len(),
        });
    }
    if channels == 0 {
        return Ok(());
    }
    check_planar_lengths(input.iter().map(|channel| channel.as_ref().len()), quantum)?;

    for (frame, out_frame) in output.chunks_exact_mut(channels).enumerate() {
        for (sample, in_channel) in out_frame.iter_mut().zip(input) {
            *sample = in_channel.as_ref()[frame];
        }
    }
    Ok(())
}

/// Interleaved length of one quantum; an overflowing product can never match `found`.
fn quantum_samples(channels: usize, quantum: usize, found: usize) -> Result<usize> {
    channels.checked_mul(quantum).ok_or(Error::FrameMismatch {
        expected: usize::MAX,
        found,
    })
}

fn check_planar_lengths(mut lengths: impl Iterator<Item = usize>, quantum: usize) -> Result<()> {
    match lengths.find(|&len| len < quantum) {
        Some(found) => Err(Error::FrameMismatch {
            expected: quantum,
            found,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;

    #[test]
    fn test_enqueue_dequeue() {
        let (mut writer, mut reader) = audio_channel(10).unwrap();
        assert_eq!(writer.capacity(), 10);

        let samples = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        assert_eq!(writer.enqueue(&samples), 7);
        assert_eq!(writer.available_write(), 3);
        assert_eq!(reader.available_read(), 7);

        let mut output = [0.0f32; 10];
        assert_eq!(reader.dequeue(&mut output), 7);
        assert_eq!(&output[..7], &samples);
        assert_eq!(reader.dequeue(&mut output), 0);
    }

    #[test]
    fn test_enqueue_short_write_leaves_suffix() {
        let (mut writer, mut reader) = audio_channel(4).unwrap();
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

        let written = writer.enqueue(&samples);
        assert_eq!(written, 4);

        let mut output = [0.0f32; 4];
        reader.dequeue(&mut output);
        assert_eq!(writer.enqueue(&samples[written..]), 2);
        assert_eq!(reader.dequeue(&mut output), 2);
        assert_eq!(&output[..2], &[5.0, 6.0]);
    }

    #[test]
    fn test_dequeue_or_silence_zero_fills() {
        let (mut writer, mut reader) = audio_channel(16).unwrap();
        writer.enqueue(&[0.5, -0.5, 0.25]);

        let mut output = [9.0f32; 6];
        assert_eq!(reader.dequeue_or_silence(&mut output), 3);
        assert_eq!(output, [0.5, -0.5, 0.25, 0.0, 0.0, 0.0]);

        let mut output = [9.0f32; 4];
        assert_eq!(reader.dequeue_or_silence(&mut output), 0);
        assert_eq!(output, [0.0; 4]);
    }

    #[test]
    fn test_rejects_non_float_segment() {
        let segment = SharedSegment::for_element::<u8>(64).unwrap();
        assert!(matches!(
            AudioWriter::new(Arc::clone(&segment)),
            Err(Error::ElementMismatch {
                expected: ElementKind::F32,
                found: ElementKind::U8,
            })
        ));
        assert!(AudioReader::new(segment).is_err());
    }

    #[test]
    fn test_writer_and_reader_over_one_segment() {
        let segment = SharedSegment::for_element::<f32>(256).unwrap();
        let mut writer = AudioWriter::new(Arc::clone(&segment)).unwrap();
        let mut reader = AudioReader::new(Arc::clone(&segment)).unwrap();
        assert!(AudioWriter::new(segment).is_err());

        writer.enqueue(&[1.0; 128]);
        let mut output = [0.0f32; 128];
        assert_eq!(reader.dequeue(&mut output), 128);
    }

    #[test]
    fn test_interleave_example() {
        let planar = [[1.0f32, 2.0], [3.0, 4.0]];
        let mut output = [0.0f32; 4];
        interleave_with_quantum(&planar, &mut output, 2).unwrap();
        assert_eq!(output, [1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_deinterleave_stereo_quantum() {
        let input: Vec<f32> = (0..256).map(|i| i as f32).collect();
        let mut left = [0.0f32; 128];
        let mut right = [0.0f32; 128];
        {
            let mut output = [&mut left[..], &mut right[..]];
            deinterleave(&input, &mut output).unwrap();
        }
        assert_eq!(left[0], 0.0);
        assert_eq!(right[0], 1.0);
        assert_eq!(left[127], 254.0);
        assert_eq!(right[127], 255.0);
    }

    #[test]
    fn test_round_trip_for_dividing_channel_counts() {
        for channels in [1usize, 2, 4, 8, 16] {
            let planar: Vec<Vec<f32>> = (0..channels)
                .map(|ch| {
                    (0..RENDER_QUANTUM_FRAMES)
                        .map(|frame| (ch * 1000 + frame) as f32)
                        .collect()
                })
                .collect();

            let mut interleaved = vec![0.0f32; channels * RENDER_QUANTUM_FRAMES];
            interleave(&planar, &mut interleaved).unwrap();

            let mut restored = vec![vec![0.0f32; RENDER_QUANTUM_FRAMES]; channels];
            deinterleave(&interleaved, &mut restored).unwrap();
            assert_eq!(restored, planar, "{} channels", channels);
        }
    }

    #[test]
    fn test_deinterleave_channel_mismatch() {
        let input = [0.0f32; 256];
        let mut output = vec![vec![0.0f32; 128]; 3];
        assert_eq!(
            deinterleave(&input, &mut output),
            Err(Error::ChannelMismatch {
                expected: 2,
                found: 3,
            })
        );

        let ragged = [0.0f32; 200];
        assert_eq!(
            deinterleave(&ragged, &mut output),
            Err(Error::FrameMismatch {
                expected: 384,
                found: 200,
            })
        );
    }

    #[test]
    fn test_interleave_size_mismatch() {
        let planar = vec![vec![0.0f32; 128]; 2];
        let mut output = [0.0f32; 255];
        assert_eq!(
            interleave(&planar, &mut output),
            Err(Error::FrameMismatch {
                expected: 256,
                found: 255,
            })
        );

        let short = vec![vec![0.0f32; 128], vec![0.0f32; 64]];
        let mut output = [0.0f32; 256];
        assert_eq!(
            interleave(&short, &mut output),
            Err(Error::FrameMismatch {
                expected: 128,
                found: 64,
            })
        );
        assert_eq!(
            interleave_with_quantum(&planar, &mut output, 0),
            Err(Error::ZeroQuantum)
        );
    }

    #[test]
    fn test_huge_quantum_is_a_size_mismatch() {
        let planar = vec![vec![0.0f32; 4]; 2];
        let mut interleaved = [0.0f32; 8];
        assert_eq!(
            interleave_with_quantum(&planar, &mut interleaved, usize::MAX),
            Err(Error::FrameMismatch {
                expected: usize::MAX,
                found: 8,
            })
        );

        let mut restored = vec![vec![0.0f32; 4]; 2];
        assert_eq!(
            deinterleave_with_quantum(&interleaved, &mut restored, usize::MAX),
            Err(Error::FrameMismatch {
                expected: usize::MAX,
                found: 8,
            })
        );
    }
}

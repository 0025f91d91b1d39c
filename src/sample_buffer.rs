//! The buffer the microphone callback drops audio samples into.
//!
//! On the badge this is a plain array written from an interrupt and read from
//! the main loop with no synchronisation at all, which only holds up on a
//! single-core target where the interrupt is shorter than the main loop's
//! sleep. Here the handoff is an explicit lock: the callback side
//! ([SampleWriter]) holds it for one copy, the reading side ([SampleBuffer])
//! for one pass over the samples.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Samples {
    data: Vec<i16>,
    valid: usize,
}

/// Fixed-capacity store of signed 16-bit audio samples plus how many of
/// them the last callback wrote.
#[derive(Debug)]
pub struct SampleBuffer {
    inner: Arc<Mutex<Samples>>,
    capacity: usize,
}

/// The write end of a [SampleBuffer], handed to the microphone source.
/// There is exactly one per buffer.
#[derive(Debug)]
pub struct SampleWriter {
    inner: Arc<Mutex<Samples>>,
}

// A panic on the other side of the lock leaves the samples in a usable
// state, so a poisoned lock is not an error here.
fn lock(inner: &Mutex<Samples>) -> MutexGuard<'_, Samples> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SampleBuffer {
    /// Instantiates an empty buffer and its single writer.
    pub fn new(capacity: usize) -> (Self, SampleWriter) {
        let inner = Arc::new(Mutex::new(Samples {
            data: vec![0; capacity],
            valid: 0,
        }));
        let writer = SampleWriter {
            inner: Arc::clone(&inner),
        };
        (Self { inner, capacity }, writer)
    }

    /// The fixed number of samples the buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many samples the last callback wrote. Zero until the first
    /// callback fires.
    pub fn valid(&self) -> usize {
        lock(&self.inner).valid
    }

    /// Runs `f` over the currently valid samples while holding the lock.
    pub fn with_samples<R>(&self, f: impl FnOnce(&[i16]) -> R) -> R {
        let samples = lock(&self.inner);
        f(&samples.data[..samples.valid])
    }
}

impl SampleWriter {
    /// Overwrites the buffer with `samples`, dropping anything past the
    /// buffer's capacity. Returns how many samples were kept.
    pub fn on_samples_ready(&self, samples: &[i16]) -> usize {
        let mut buf = lock(&self.inner);
        let n = samples.len().min(buf.data.len());
        buf.data[..n].copy_from_slice(&samples[..n]);
        buf.valid = n;
        n
    }

    /// Same as [SampleWriter::on_samples_ready], for a source that hands
    /// over raw little-endian PCM bytes. A trailing odd byte is ignored.
    pub fn on_bytes_ready(&self, bytes: &[u8]) -> usize {
        let mut buf = lock(&self.inner);
        let n = (bytes.len() / 2).min(buf.data.len());
        for (slot, pair) in buf.data.iter_mut().zip(bytes.chunks_exact(2)).take(n) {
            *slot = i16::from_le_bytes([pair[0], pair[1]]);
        }
        buf.valid = n;
        n
    }
}

//! Sound power from the microphone's sample buffer.

use crate::sample_buffer::SampleBuffer;

/// Mean-square power of the valid samples in `buffer`, truncated.
///
/// The sum of squares is divided by the buffer's capacity rather than by
/// the number of valid samples, so a short callback reads quieter than a
/// full one. Receivers already calibrated against this, so it stays.
///
/// Returns `None` if the microphone has not delivered anything yet.
pub fn sound_power(buffer: &SampleBuffer) -> Option<u64> {
    let capacity = buffer.capacity() as u64;
    buffer.with_samples(|samples| {
        if samples.is_empty() || capacity == 0 {
            return None;
        }
        let sum_sq: u64 = samples
            .iter()
            .map(|&s| {
                let s = s as i64;
                (s * s) as u64
            })
            .sum();
        Some(sum_sq / capacity)
    })
}

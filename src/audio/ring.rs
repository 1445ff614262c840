use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

/// Fixed-capacity ring of mono samples shared between one producer (the audio
/// callback) and one consumer (the analysis tick).
///
/// Samples are stored as `f32` bit patterns in atomics so both sides can work
/// through a shared reference without a lock. The producer claims a block,
/// stores it, then publishes the new write cursor. The consumer copies the
/// window ending at the published cursor and afterwards checks the claim: any
/// copied slot the producer may have lapped in the meantime is zeroed rather
/// than returned out of order.
pub struct SampleRing {
    slots: Box<[AtomicU32]>,
    /// End of the samples visible to the consumer
    written: AtomicU64,
    /// End of the block being stored; ahead of `written` during a push
    claimed: AtomicU64,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| AtomicU32::new(0.0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            written: AtomicU64::new(0),
            claimed: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Announce `count` samples about to be stored and return where they start
    fn claim(&self, count: usize) -> u64 {
        let start = self.written.load(Ordering::Relaxed);
        self.claimed
            .store(start + count as u64, Ordering::Relaxed);
        fence(Ordering::Release);
        start
    }

    /// Append mono samples, overwriting the oldest data once full.
    /// Never blocks or allocates. Must only be called from one thread at a time.
    pub fn push(&self, samples: &[f32]) {
        let start = self.claim(samples.len());
        let capacity = self.capacity() as u64;

        // Only the newest `capacity` samples can survive the write
        let skip = samples.len().saturating_sub(self.capacity());
        for (i, &sample) in samples[skip..].iter().enumerate() {
            let index = ((start + (skip + i) as u64) % capacity) as usize;
            self.slots[index].store(sample.to_bits(), Ordering::Relaxed);
        }

        self.written
            .store(start + samples.len() as u64, Ordering::Release);
    }

    /// Append `frames` interleaved frames of `channels` channels, averaging the
    /// channels of each frame down to one sample.
    pub fn push_interleaved(&self, data: &[f32], frames: usize, channels: usize) {
        if channels == 0 {
            return;
        }
        let frames = frames.min(data.len() / channels);
        if channels == 1 {
            self.push(&data[..frames]);
            return;
        }

        let start = self.claim(frames);
        let capacity = self.capacity() as u64;
        let skip = frames.saturating_sub(self.capacity());
        let scale = 1.0 / channels as f32;

        for frame in skip..frames {
            let offset = frame * channels;
            let mono = data[offset..offset + channels].iter().sum::<f32>() * scale;
            let index = ((start + frame as u64) % capacity) as usize;
            self.slots[index].store(mono.to_bits(), Ordering::Relaxed);
        }

        self.written
            .store(start + frames as u64, Ordering::Release);
    }

    /// Copy the most recent `out.len()` samples into `out`, oldest first.
    ///
    /// Positions that were never written (fewer samples pushed than requested,
    /// or a request larger than the capacity) are zero-filled at the front, as
    /// are the oldest positions a concurrent push overwrote during the copy.
    pub fn fetch_latest(&self, out: &mut [f32]) {
        let end = self.written.load(Ordering::Acquire);
        let capacity = self.capacity() as u64;

        let held = end.min(capacity) as usize;
        let take = out.len().min(held);
        let zeros = out.len() - take;

        out[..zeros].fill(0.0);

        let first = end - take as u64;
        for (i, slot) in out[zeros..].iter_mut().enumerate() {
            let index = ((first + i as u64) % capacity) as usize;
            *slot = f32::from_bits(self.slots[index].load(Ordering::Relaxed));
        }

        fence(Ordering::Acquire);
        let claimed = self.claimed.load(Ordering::Relaxed);
        let intact_from = claimed.saturating_sub(capacity);
        let lapped = intact_from.saturating_sub(first).min(take as u64) as usize;
        out[zeros..zeros + lapped].fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fetch_returns_oldest_to_newest() {
        let ring = SampleRing::new(8);
        ring.push(&[1.0, 2.0, 3.0, 4.0]);

        let mut out = [0.0; 3];
        ring.fetch_latest(&mut out);
        assert_eq!(out, [2.0, 3.0, 4.0]);
    }

    #[test]
    fn underrun_is_zero_filled_at_front() {
        let ring = SampleRing::new(8);
        ring.push(&[1.0, 2.0]);

        let mut out = [9.0; 5];
        ring.fetch_latest(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn empty_ring_fetches_silence() {
        let ring = SampleRing::new(4);

        let mut out = [7.0; 4];
        ring.fetch_latest(&mut out);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn wraps_and_overwrites_oldest() {
        let ring = SampleRing::new(4);
        for i in 0..6 {
            ring.push(&[i as f32]);
        }
        assert_eq!(ring.written.load(Ordering::Acquire), 6);

        let mut out = [0.0; 4];
        ring.fetch_latest(&mut out);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn oversized_push_keeps_newest() {
        let ring = SampleRing::new(4);
        ring.push(&[10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);

        let mut out = [0.0; 4];
        ring.fetch_latest(&mut out);
        assert_eq!(out, [30.0, 40.0, 50.0, 60.0]);
    }

    #[test]
    fn request_larger_than_capacity_pads_with_zeros() {
        let ring = SampleRing::new(3);
        ring.push(&[1.0, 2.0, 3.0, 4.0]);

        let mut out = [5.0; 5];
        ring.fetch_latest(&mut out);
        assert_eq!(out, [0.0, 0.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn fetch_is_idempotent_without_push() {
        let ring = SampleRing::new(16);
        ring.push(&(0..11).map(|i| i as f32 * 0.5).collect::<Vec<_>>());

        let mut first = [0.0; 8];
        let mut second = [0.0; 8];
        ring.fetch_latest(&mut first);
        ring.fetch_latest(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn interleaved_stereo_is_downmixed() {
        let ring = SampleRing::new(8);
        ring.push_interleaved(&[1.0, 3.0, -1.0, 1.0, 0.5, 0.5], 3, 2);

        let mut out = [0.0; 3];
        ring.fetch_latest(&mut out);
        assert_eq!(out, [2.0, 0.0, 0.5]);
    }

    #[test]
    fn interleaved_frame_count_is_clamped_to_data() {
        let ring = SampleRing::new(8);
        ring.push_interleaved(&[1.0, 1.0, 2.0, 2.0], 10, 2);
        assert_eq!(ring.written.load(Ordering::Acquire), 2);

        ring.push_interleaved(&[1.0, 1.0], 1, 0);
        assert_eq!(ring.written.load(Ordering::Acquire), 2);
    }

    #[test]
    fn concurrent_producer_and_consumer() {
        let ring = Arc::new(SampleRing::new(1024));
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let block = [0.25f32; 64];
                for _ in 0..2000 {
                    ring.push(&block);
                }
            })
        };

        let mut out = [0.0; 256];
        for _ in 0..2000 {
            ring.fetch_latest(&mut out);
            assert!(out.iter().all(|&s| s == 0.0 || s == 0.25));
        }

        producer.join().unwrap();
        ring.fetch_latest(&mut out);
        assert!(out.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn slots_claimed_by_an_unfinished_push_are_zeroed() {
        let ring = SampleRing::new(4);
        ring.push(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        // A push of two more samples has started but not been published
        ring.claimed.store(8, Ordering::Relaxed);
        let mut out = [9.0; 4];
        ring.fetch_latest(&mut out);
        assert_eq!(out, [0.0, 0.0, 4.0, 5.0]);
    }

    #[test]
    fn window_equal_to_capacity_never_splices_newer_samples() {
        let ring = Arc::new(SampleRing::new(256));
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut next = 1.0f32;
                let mut block = [0.0f32; 64];
                for _ in 0..2000 {
                    for sample in block.iter_mut() {
                        *sample = next;
                        next += 1.0;
                    }
                    ring.push(&block);
                }
            })
        };

        let mut out = [0.0; 256];
        for _ in 0..2000 {
            ring.fetch_latest(&mut out);
            let start = out.iter().position(|&s| s != 0.0).unwrap_or(out.len());
            assert!(out[start..].windows(2).all(|w| w[1] == w[0] + 1.0));
        }

        producer.join().unwrap();
        ring.fetch_latest(&mut out);
        assert_eq!(out[255], 128_000.0);
        assert!(out.windows(2).all(|w| w[1] == w[0] + 1.0));
    }
}

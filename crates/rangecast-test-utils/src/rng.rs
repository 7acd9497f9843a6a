//! Deterministic PRNG for reproducible payloads.

use bytes::Bytes;

/// Minimal xorshift64 PRNG with a reproducible sequence per seed.
///
/// Use a fixed seed to ensure test results are identical across runs.
pub struct Xorshift64(u64);

impl Xorshift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    /// Returns `u64` in `[min, max)`.
    pub fn range_u64(&mut self, min: u64, max: u64) -> u64 {
        min + self.next_u64() % (max - min).max(1)
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let word = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// `len` pseudo-random bytes derived from `seed`.
#[must_use]
pub fn payload(len: usize, seed: u64) -> Bytes {
    let mut buf = vec![0u8; len];
    Xorshift64::new(seed).fill(&mut buf);
    Bytes::from(buf)
}

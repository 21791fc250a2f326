//! Deterministic random number generation for placement and routing.
//!
//! Both the annealing placer and the negotiated router must produce
//! bit-identical results for identical inputs and seeds, independent of
//! platform. This rules out OS-seeded generators, so all randomness funnels
//! through [`DeterministicRng`], an xorshift64* generator with explicit
//! seeding. It implements [`rand::RngCore`] so the `rand` crate's adaptors
//! (`Rng`, distributions) work on top of it where exact draw sequences do
//! not matter.

use rand::RngCore;

/// Number of warm-up steps discarded after seeding.
///
/// Freshly seeded xorshift state is strongly correlated with the seed value;
/// a few discard rounds decorrelate derived generators that differ in only a
/// few seed bits (e.g. per-cell worker seeds).
const WARMUP_STEPS: usize = 5;

/// A deterministic xorshift64* random number generator.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    /// Creates a generator from the given seed, applying warm-up.
    ///
    /// A zero seed is remapped to a fixed non-zero constant, since xorshift
    /// state must never be zero.
    pub fn new(seed: u64) -> Self {
        let mut rng = Self {
            state: if seed == 0 { 0x3C10_7C1F_BA5E_B00B } else { seed },
        };
        for _ in 0..WARMUP_STEPS {
            rng.rng64();
        }
        rng
    }

    /// Returns the next 64-bit value.
    pub fn rng64(&mut self) -> u64 {
        let retval = self.state.wrapping_mul(0x2545_F491_4F6C_DD1D);
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        retval
    }

    /// Returns a uniform value in `[0, n)`.
    ///
    /// Uses rejection against the next power of two so that the result is
    /// exactly uniform, at a small expected cost.
    pub fn bounded(&mut self, n: usize) -> usize {
        assert!(n > 0);
        let n = n as u64;
        let mut m = n - 1;
        m |= m >> 1;
        m |= m >> 2;
        m |= m >> 4;
        m |= m >> 8;
        m |= m >> 16;
        m |= m >> 32;
        loop {
            let x = self.rng64() & m;
            if x < n {
                return x as usize;
            }
        }
    }

    /// Returns a uniform value in `[0.0, 1.0]`, used by the Metropolis
    /// acceptance test.
    pub fn unit(&mut self) -> f64 {
        (self.rng64() & 0x3FFF_FFFF) as f64 / 0x3FFF_FFFF as f64
    }

    /// Fisher-Yates shuffle driven by [`bounded`](Self::bounded).
    pub fn shuffle<T>(&mut self, v: &mut [T]) {
        for i in (1..v.len()).rev() {
            let j = self.bounded(i + 1);
            v.swap(i, j);
        }
    }

    /// Sorts the slice into a canonical order, then shuffles it.
    ///
    /// This makes the resulting permutation independent of the caller's
    /// incoming order, which is what keeps whole-design passes reproducible.
    pub fn sorted_shuffle<T: Ord>(&mut self, v: &mut [T]) {
        v.sort_unstable();
        self.shuffle(v);
    }
}

impl RngCore for DeterministicRng {
    fn next_u32(&mut self) -> u32 {
        (self.rng64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.rng64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.rng64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

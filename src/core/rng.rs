//! Deterministic Random Number Generator
//!
//! Uses the 32-bit Mersenne Twister (MT19937) with the string seeding used by
//! Chance.js v1.1.8. Any third party holding the seed string can reproduce the
//! exact same sequence with that library or with this module.

/// MT19937 state size in words.
const N: usize = 624;
/// MT19937 shift size.
const M: usize = 397;
const MATRIX_A: u32 = 0x9908_b0df;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7fff_ffff;

/// 2^-32, maps a 32-bit output onto [0, 1).
const INV_2_POW_32: f64 = 1.0 / 4_294_967_296.0;

/// Longest seed string (in UTF-16 code units) whose seed hash is still exact
/// under the reference double-precision arithmetic.
pub const MAX_SEED_UNITS: usize = 1024;

/// Deterministic PRNG using the MT19937 algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform, and the same sequence as the
/// reference JavaScript implementation.
///
/// # Example
///
/// ```
/// use fairpot::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(5489);
/// let value = rng.next_u32();
/// assert_eq!(value, 3499211612); // Always the same!
/// ```
#[derive(Clone)]
pub struct DeterministicRng {
    state: [u32; N],
    index: usize,
}

impl std::fmt::Debug for DeterministicRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicRng")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(5489)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 32-bit seed (`init_genrand`).
    pub fn new(seed: u32) -> Self {
        let mut state = [0u32; N];
        state[0] = seed;
        for i in 1..N {
            let prev = state[i - 1] ^ (state[i - 1] >> 30);
            state[i] = 1_812_433_253u32
                .wrapping_mul(prev)
                .wrapping_add(i as u32);
        }

        Self { state, index: N }
    }

    /// Create RNG from a seed string.
    ///
    /// The string is folded into a 32-bit seed with [`seed_from_str`].
    pub fn from_seed_str(seed: &str) -> Self {
        Self::new(seed_from_str(seed))
    }

    /// Generate the next 32-bit random value (`genrand_int32`).
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        if self.index >= N {
            self.twist();
        }

        let mut y = self.state[self.index];
        self.index += 1;

        // Tempering
        y ^= y >> 11;
        y ^= (y << 7) & 0x9d2c_5680;
        y ^= (y << 15) & 0xefc6_0000;
        y ^= y >> 18;

        y
    }

    /// Generate a random f64 in [0, 1) with 32 bits of resolution.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 * INV_2_POW_32
    }

    /// Generate a random integer in range [min, max], inclusive on both ends.
    ///
    /// Computed as `floor(u * (max - min + 1) + min)` in double precision,
    /// which is how the reference library draws integers.
    #[inline]
    pub fn next_int_inclusive(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        let span = (max - min + 1) as f64;
        (self.next_f64() * span + min as f64).floor() as u64
    }

    /// Regenerate the full state block.
    fn twist(&mut self) {
        for i in 0..N {
            let y = (self.state[i] & UPPER_MASK) | (self.state[(i + 1) % N] & LOWER_MASK);
            let mut next = self.state[(i + M) % N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.state[i] = next;
        }
        self.index = 0;
    }
}

/// Fold a seed string into a 32-bit MT seed.
///
/// For a string of `n` UTF-16 code units the reference computes
/// `h = c + (h << 6) + (h << 16) - h` per unit, where the shifts operate on
/// the low 32 bits of `h` and the additions are exact, then seeds with
/// `n * h` reduced modulo 2^32.
pub fn seed_from_str(seed: &str) -> u32 {
    let units: Vec<u16> = seed.encode_utf16().collect();

    let mut hash: i64 = 0;
    for &unit in &units {
        let low = hash as i32;
        hash = unit as i64 + low.wrapping_shl(6) as i64 + low.wrapping_shl(16) as i64 - hash;
    }

    (units.len() as i64).wrapping_mul(hash) as u32
}

/// Length of a seed string in UTF-16 code units.
pub fn seed_units(seed: &str) -> usize {
    seed.encode_utf16().count()
}

// =============================================================================
// TESTS
// =============================================================================

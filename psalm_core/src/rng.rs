//! Seeded 48-bit linear congruential generator.
//!
//! Multiplier `0x5DEECE66D`, addend `0xB`, 48-bit state, with the classic
//! rejection loop for bounded draws. The exact sequence matters: changing it
//! would reassign the psalm of every past and future day.

const MULTIPLIER: u64 = 0x5_DEEC_E66D;
const ADDEND: u64 = 0xB;
const MASK: u64 = (1 << 48) - 1;

/// Deterministic pseudo-random generator
#[derive(Clone, Debug)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: i64) -> Self {
        Self {
            state: (seed as u64 ^ MULTIPLIER) & MASK,
        }
    }

    fn next_bits(&mut self, bits: u32) -> i32 {
        self.state = self.state.wrapping_mul(MULTIPLIER).wrapping_add(ADDEND) & MASK;
        (self.state >> (48 - bits)) as i32
    }

    /// Draw uniformly from `[0, bound)`
    ///
    /// `bound` must be positive.
    pub fn next_bounded(&mut self, bound: i32) -> i32 {
        debug_assert!(bound > 0, "bound must be positive");

        if bound & bound.wrapping_neg() == bound {
            return ((bound as i64 * self.next_bits(31) as i64) >> 31) as i32;
        }

        loop {
            let bits = self.next_bits(31);
            let value = bits % bound;
            // Reject draws from the incomplete final bucket
            if bits.wrapping_sub(value).wrapping_add(bound - 1) >= 0 {
                return value;
            }
        }
    }
}

//! Block-fill pattern generation
//!
//! Write buffers and fill-phase blocks are populated with synthetic content.
//! The `lcg` mode is reproducible: two generators created with the same seed
//! produce identical bytes, which is what makes a run's written data
//! repeatable across hosts.
//!
//! # Example
//!
//! ```
//! use iodrive::pattern::{FillPattern, Lcg};
//!
//! let mut a = Lcg::new(42);
//! let mut b = Lcg::new(42);
//! assert_eq!(a.value(1 << 31), b.value(1 << 31));
//!
//! let mut buf = vec![0u8; 512];
//! FillPattern::Incr.fill(&mut buf, &mut Lcg::new(0));
//! assert_eq!(buf[257], 1);
//! ```

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// LCG multiplier
pub const LCG_A: u64 = 1103515245;

/// LCG increment
pub const LCG_C: u64 = 12345;

/// Modulus used when drawing fill bytes
pub const LCG_FILL_MODULUS: u64 = 1 << 31;

/// Linear congruential generator
///
/// `value(m)` advances `seed = (a * seed + c) mod m` and returns the new seed.
/// Output depends only on the current state, so re-seeding reproduces the
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lcg {
    seed: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Reset the internal state
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Advance the generator and return the next value bounded by `m`
    ///
    /// A modulus of 0 is treated as 1 (always returns 0).
    #[inline]
    pub fn value(&mut self, m: u64) -> u64 {
        let m = m.max(1);
        self.seed = LCG_A.wrapping_mul(self.seed).wrapping_add(LCG_C) % m;
        self.seed
    }

    /// Next fill byte
    #[inline]
    pub fn next_byte(&mut self) -> u8 {
        (self.value(LCG_FILL_MODULUS) >> 16) as u8
    }
}

impl Default for Lcg {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Content written into target blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillPattern {
    /// All zeros
    #[default]
    Zero,
    /// Uniform random bytes (not reproducible)
    Rand,
    /// Byte value equal to position modulo 256
    Incr,
    /// Reproducible bytes from the linear congruential generator
    Lcg,
}

impl FillPattern {
    /// Fill `buf` with this pattern
    ///
    /// `lcg` is only consumed by [`FillPattern::Lcg`]; its state carries over
    /// between calls so consecutive blocks continue the sequence.
    pub fn fill(&self, buf: &mut [u8], lcg: &mut Lcg) {
        match self {
            FillPattern::Zero => buf.fill(0),
            FillPattern::Rand => rand::thread_rng().fill_bytes(buf),
            FillPattern::Incr => {
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = (i % 256) as u8;
                }
            }
            FillPattern::Lcg => {
                for byte in buf.iter_mut() {
                    *byte = lcg.next_byte();
                }
            }
        }
    }

    /// Allocate a block of `len` bytes filled with this pattern
    pub fn block(&self, len: usize, lcg: &mut Lcg) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf, lcg);
        buf
    }
}

impl FromStr for FillPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" | "zeros" => Ok(FillPattern::Zero),
            "rand" | "random" => Ok(FillPattern::Rand),
            "incr" => Ok(FillPattern::Incr),
            "lcg" => Ok(FillPattern::Lcg),
            other => Err(format!("unknown fill pattern '{}' (zero, rand, incr, lcg)", other)),
        }
    }
}

impl fmt::Display for FillPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FillPattern::Zero => "zero",
            FillPattern::Rand => "rand",
            FillPattern::Incr => "incr",
            FillPattern::Lcg => "lcg",
        };
        f.write_str(name)
    }
}

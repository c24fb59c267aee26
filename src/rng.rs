//! Uniform randomness for posterior sampling.
//!
//! Notes:
//! - Production uses an OS-seeded generator ([`EntropySource`]).
//! - Tests use [`Lcg`], a Park–Miller minimal-standard generator: the same
//!   non-zero seed always yields the same sequence.
//! - [`uniform_source`] maps `None` / `Some(0)` to entropy and any other seed
//!   to an `Lcg`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A source of uniform draws in `[0, 1)`.
pub trait UniformSource: Send {
    fn next_f64(&mut self) -> f64;
}

const LCG_MODULUS: u64 = 2_147_483_647;
const LCG_MULTIPLIER: u64 = 48_271;

/// Seedable linear-congruential generator (Park–Miller, multiplier 48271).
///
/// Draws are in the open interval `(0, 1)`.
///
/// The seed is reduced modulo `2^31 − 1`, so seeds congruent modulo
/// `2^31 − 1` share a sequence, and a seed that reduces to zero (such as
/// `2^31 − 1` itself) is replaced by `1`.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        let state = seed % LCG_MODULUS;
        Self {
            state: if state == 0 { 1 } else { state },
        }
    }
}

impl UniformSource for Lcg {
    fn next_f64(&mut self) -> f64 {
        self.state = (self.state * LCG_MULTIPLIER) % LCG_MODULUS;
        self.state as f64 / LCG_MODULUS as f64
    }
}

/// Non-deterministic generator seeded from the operating system.
#[derive(Debug, Clone)]
pub struct EntropySource {
    rng: StdRng,
}

impl EntropySource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl Default for EntropySource {
    fn default() -> Self {
        Self::new()
    }
}

impl UniformSource for EntropySource {
    fn next_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

/// Build the generator for an optional seed (`None` or `0` ⇒ entropy).
///
/// Other seeds go to [`Lcg::new`] and only their value modulo `2^31 − 1`
/// matters.
pub fn uniform_source(seed: Option<u64>) -> Box<dyn UniformSource> {
    match seed {
        Some(s) if s != 0 => Box::new(Lcg::new(s)),
        _ => Box::new(EntropySource::new()),
    }
}

//! Posterior sampling primitives built on a [`UniformSource`].
//!
//! - Standard normal: Box–Muller.
//! - Gamma: Marsaglia–Tsang squeeze for `shape >= 1`; for `shape < 1`,
//!   `Gamma(shape) = Gamma(shape + 1) * U^(1/shape)`.
//! - Beta: `X / (X + Y)` with `X ~ Gamma(a)`, `Y ~ Gamma(b)`.

use std::f64::consts::PI;

use crate::rng::UniformSource;
use crate::thompson::MIN_SHAPE;

fn nonzero_uniform(rng: &mut dyn UniformSource) -> f64 {
    let u = rng.next_f64();
    if u > 0.0 {
        u
    } else {
        f64::EPSILON
    }
}

/// One standard-normal draw.
pub fn sample_standard_normal(rng: &mut dyn UniformSource) -> f64 {
    let u1 = nonzero_uniform(rng);
    let u2 = nonzero_uniform(rng);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// One `Gamma(shape, 1)` draw.
///
/// Non-finite or non-positive shapes are raised to [`MIN_SHAPE`].
pub fn sample_gamma(rng: &mut dyn UniformSource, shape: f64) -> f64 {
    let shape = if shape.is_finite() && shape > 0.0 {
        shape.max(MIN_SHAPE)
    } else {
        MIN_SHAPE
    };

    if shape < 1.0 {
        let u = nonzero_uniform(rng);
        return sample_gamma(rng, shape + 1.0) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let (x, v) = loop {
            let x = sample_standard_normal(rng);
            let v = 1.0 + c * x;
            if v > 0.0 {
                break (x, v * v * v);
            }
        };
        let u = rng.next_f64();
        if u < 1.0 - 0.0331 * x.powi(4) {
            return d * v;
        }
        if u > 0.0 && u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// One `Beta(alpha, beta)` draw in `[0, 1]`.
pub fn sample_beta(rng: &mut dyn UniformSource, alpha: f64, beta: f64) -> f64 {
    let x = sample_gamma(rng, alpha);
    let y = sample_gamma(rng, beta);
    let total = x + y;
    if total > 0.0 && total.is_finite() {
        x / total
    } else {
        0.5
    }
}

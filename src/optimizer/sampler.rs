//! Candidate sampling from the current mean and diagonal covariance

use rand::Rng;

use crate::random::standard_normal;

/// Draw noise `Y = z * S` and candidates `X = M + eta * Y` for one chunk
pub fn sample_chunk<R: Rng + ?Sized>(
    rng: &mut R,
    eta: f64,
    mean: &[f64],
    std_dev: &[f64],
    noise: &mut [f64],
    sample: &mut [f64],
) {
    for (((y, x), &m), &s) in noise.iter_mut().zip(sample.iter_mut()).zip(mean).zip(std_dev) {
        *y = standard_normal(rng) * s;
        *x = m + eta * *y;
    }
}

/// Reuse the positive-weighted noise average as this sample's noise
pub fn accelerated_chunk(
    eta: f64,
    mean: &[f64],
    mean_shift: &[f64],
    noise: &mut [f64],
    sample: &mut [f64],
) {
    for (((y, x), &m), &a) in noise.iter_mut().zip(sample.iter_mut()).zip(mean).zip(mean_shift) {
        *y = a;
        *x = m + eta * a;
    }
}

//! FFT plumbing and complex helpers shared by every stage.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft as RustFft, FftPlanner};

use crate::error::{DspError, Result};

/// Zero-valued complex number, used for FFT buffer initialization.
pub const COMPLEX_ZERO: Complex<f32> = Complex::new(0.0, 0.0);

/// Unit complex number, the identity phasor.
pub const COMPLEX_ONE: Complex<f32> = Complex::new(1.0, 0.0);

/// Forward/inverse transform pair of one power-of-two size.
///
/// Both directions run in place on the caller's buffer and share one scratch
/// allocation, so `forward` and `inverse` never allocate. The inverse is
/// normalised by `1/N`: `inverse(forward(x)) == x` up to rounding.
pub struct Fft {
    size: usize,
    forward: Arc<dyn RustFft<f32>>,
    inverse: Arc<dyn RustFft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Fft {
    /// Plans both directions for `size`, which must be a power of two.
    pub fn new(size: usize) -> Result<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(DspError::InvalidParameter(format!(
                "FFT size must be a power of two >= 2, got {}",
                size
            )));
        }
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Ok(Self {
            size,
            forward,
            inverse,
            scratch: vec![COMPLEX_ZERO; scratch_len],
        })
    }

    /// Transform length.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of non-redundant bins of a real signal (`size/2 + 1`).
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Forward transform in place. `buf.len()` must equal `size()`.
    pub fn forward(&mut self, buf: &mut [Complex<f32>]) {
        debug_assert_eq!(buf.len(), self.size);
        self.forward.process_with_scratch(buf, &mut self.scratch);
    }

    /// Inverse transform in place, scaled by `1/N`.
    pub fn inverse(&mut self, buf: &mut [Complex<f32>]) {
        debug_assert_eq!(buf.len(), self.size);
        self.inverse.process_with_scratch(buf, &mut self.scratch);
        let norm = 1.0 / self.size as f32;
        for c in buf.iter_mut() {
            *c *= norm;
        }
    }
}

/// Smallest power of two `>= n` (1 for `n == 0`).
#[inline]
pub fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// `acc += a * b`, the inner step of a spectral convolution.
#[inline]
pub fn complex_mul_add(acc: Complex<f32>, a: Complex<f32>, b: Complex<f32>) -> Complex<f32> {
    Complex::new(
        acc.re + a.re * b.re - a.im * b.im,
        acc.im + a.re * b.im + a.im * b.re,
    )
}

/// Fills bins above Nyquist with the conjugates of their mirrors so the
/// inverse transform of `spectrum` is real.
pub fn mirror_hermitian(spectrum: &mut [Complex<f32>]) {
    let n = spectrum.len();
    if n < 2 {
        return;
    }
    spectrum[0].im = 0.0;
    spectrum[n / 2].im = 0.0;
    for bin in 1..n / 2 {
        spectrum[n - bin] = spectrum[bin].conj();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(Fft::new(0).is_err());
        assert!(Fft::new(1).is_err());
        assert!(Fft::new(1000).is_err());
        assert!(Fft::new(1024).is_ok());
    }

    #[test]
    fn forward_inverse_recovers_input() {
        let n = 256;
        let mut fft = Fft::new(n).unwrap();
        let original: Vec<Complex<f32>> = (0..n)
            .map(|i| {
                let x = i as f32;
                Complex::new((x * 0.37).sin() + 0.25, (x * 0.11).cos() - 0.5)
            })
            .collect();
        let mut buf = original.clone();
        fft.forward(&mut buf);
        fft.inverse(&mut buf);

        let tolerance = 1e-6 * n as f32;
        for (a, b) in buf.iter().zip(original.iter()) {
            assert!((a - b).norm() < tolerance, "{} vs {}", a, b);
        }
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let mut fft = Fft::new(16).unwrap();
        let mut buf = vec![COMPLEX_ZERO; 16];
        buf[0] = COMPLEX_ONE;
        fft.forward(&mut buf);
        for c in &buf {
            assert!((c - COMPLEX_ONE).norm() < 1e-6);
        }
    }

    #[test]
    fn mul_add_matches_operators() {
        let acc = Complex::new(0.5, -1.0);
        let a = Complex::new(2.0, 3.0);
        let b = Complex::new(-1.0, 0.25);
        let expected = acc + a * b;
        let got = complex_mul_add(acc, a, b);
        assert!((got - expected).norm() < 1e-6);
    }

    #[test]
    fn hermitian_mirror_gives_real_inverse() {
        let n = 32;
        let mut fft = Fft::new(n).unwrap();
        let mut buf = vec![COMPLEX_ZERO; n];
        for (bin, c) in buf.iter_mut().enumerate().take(n / 2 + 1) {
            *c = Complex::from_polar(1.0 / (bin + 1) as f32, bin as f32 * 0.3);
        }
        mirror_hermitian(&mut buf);
        fft.inverse(&mut buf);
        for c in &buf {
            assert!(c.im.abs() < 1e-6);
        }
    }

    #[test]
    fn next_power_of_two_floors_at_one() {
        assert_eq!(next_power_of_two(0), 1);
        assert_eq!(next_power_of_two(5), 8);
        assert_eq!(next_power_of_two(16), 16);
    }
}

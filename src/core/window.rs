//! Window functions for spectral analysis.
//!
//! All windows are generated in their periodic (DFT-even) form, which is what
//! overlap-add resynthesis and bin-exact power measurement expect.

use std::f64::consts::PI;

/// Blackman-Harris window coefficients (4-term).
const BH_A0: f64 = 0.35875;
const BH_A1: f64 = 0.48829;
const BH_A2: f64 = 0.14128;
const BH_A3: f64 = 0.01168;

/// Hamming window coefficients.
const HAMMING_A0: f64 = 0.54;
const HAMMING_A1: f64 = 0.46;

/// Window function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowType {
    #[default]
    Hann,
    Hamming,
    BlackmanHarris,
    Rectangular,
}

/// Generates a window function of the specified type and size.
pub fn generate_window(window_type: WindowType, size: usize) -> Vec<f32> {
    if size == 0 {
        return Vec::new();
    }
    if size == 1 {
        return vec![1.0];
    }
    let n = size as f64;
    (0..size)
        .map(|i| {
            let x = 2.0 * PI * i as f64 / n;
            let w = match window_type {
                WindowType::Hann => 0.5 * (1.0 - x.cos()),
                WindowType::Hamming => HAMMING_A0 - HAMMING_A1 * x.cos(),
                WindowType::BlackmanHarris => {
                    BH_A0 - BH_A1 * x.cos() + BH_A2 * (2.0 * x).cos() - BH_A3 * (3.0 * x).cos()
                }
                WindowType::Rectangular => 1.0,
            };
            w as f32
        })
        .collect()
}

/// Sum of squared window coefficients, used to normalise power spectra.
#[inline]
pub fn window_energy(window: &[f32]) -> f32 {
    window.iter().map(|w| w * w).sum()
}

/// Applies a window function to a slice in-place.
#[inline]
pub fn apply_window(data: &mut [f32], window: &[f32]) {
    for (sample, &w) in data.iter_mut().zip(window.iter()) {
        *sample *= w;
    }
}

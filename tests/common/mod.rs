#![allow(dead_code)]

use std::f32::consts::PI;

use playback_dsp::{MemorySource, SampleSource};

pub const SR: u32 = 44100;

pub fn gen_sine(freq_hz: f32, sr: u32, n: usize, amp: f32) -> Vec<f32> {
    (0..n)
        .map(|i| amp * (2.0 * PI * freq_hz * i as f32 / sr as f32).sin())
        .collect()
}

/// Deterministic white-ish noise in `[-amp, amp]`.
pub fn gen_noise(seed: u32, n: usize, amp: f32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            amp * (state as f32 / u32::MAX as f32 * 2.0 - 1.0)
        })
        .collect()
}

pub fn interleave(left: &[f32], right: &[f32]) -> Vec<f32> {
    left.iter().zip(right.iter()).flat_map(|(&l, &r)| [l, r]).collect()
}

pub fn deinterleave(data: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let left = data.iter().step_by(2).copied().collect();
    let right = data.iter().skip(1).step_by(2).copied().collect();
    (left, right)
}

pub fn stereo_source(left: &[f32], right: &[f32], sr: u32) -> MemorySource {
    MemorySource::from_interleaved(interleave(left, right), 2, sr).unwrap()
}

pub fn mono_source(data: Vec<f32>, sr: u32) -> MemorySource {
    MemorySource::from_interleaved(data, 1, sr).unwrap()
}

/// Pulls `source` dry in `chunk`-sample reads.
pub fn read_to_end<S: SampleSource + ?Sized>(source: &mut S, chunk: usize) -> Vec<f32> {
    let mut out = Vec::new();
    let mut buf = vec![0.0; chunk];
    loop {
        let n = source.read(&mut buf);
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Full linear convolution, `x.len() + h.len() - 1` samples.
pub fn direct_convolve(x: &[f32], h: &[f32]) -> Vec<f32> {
    if x.is_empty() || h.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0.0f64; x.len() + h.len() - 1];
    for (i, &xi) in x.iter().enumerate() {
        for (j, &hj) in h.iter().enumerate() {
            out[i + j] += xi as f64 * hj as f64;
        }
    }
    out.into_iter().map(|v| v as f32).collect()
}

pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|x| x * x).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Single-bin DFT magnitude at `freq_hz`, normalised by length.
pub fn energy_at_freq(signal: &[f32], sr: u32, freq_hz: f32) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    let mut re = 0.0f64;
    let mut im = 0.0f64;
    for (i, &s) in signal.iter().enumerate() {
        let angle = 2.0 * std::f64::consts::PI * freq_hz as f64 * i as f64 / sr as f64;
        re += s as f64 * angle.cos();
        im += s as f64 * angle.sin();
    }
    (re * re + im * im).sqrt() / signal.len() as f64
}

pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

//! Transparent spectral tap feeding a per-band level meter.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use rustfft::num_complex::Complex;

use crate::core::fft::{next_power_of_two, Fft, COMPLEX_ZERO};
use crate::core::ring_buffer::RingBuffer;
use crate::core::types::{Sample, SpectralParams};
use crate::core::window::{generate_window, window_energy};
use crate::error::{DspError, Result};
use crate::stream::source::SampleSource;

/// Largest analysis FFT the meter will allocate.
const MAX_ANALYSIS_FFT: usize = 1 << 18;

/// Power of one band in one analysis, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPower {
    /// Index into the configured frequency list.
    pub band: usize,
    /// Centre frequency of the band in Hz.
    pub frequency: f32,
    pub left: f32,
    pub right: f32,
}

/// Analysis FFT size: enough for `min_periods` cycles of the lowest band at
/// `sample_rate`, rounded up to a power of two and floored at `min_fft_size`.
pub fn analysis_fft_size(
    lowest_frequency: f32,
    min_periods: f32,
    sample_rate: f32,
    min_fft_size: usize,
) -> usize {
    let needed = (min_periods * sample_rate / lowest_frequency).ceil().max(1.0) as usize;
    next_power_of_two(needed).max(min_fft_size)
}

/// Bin ranges per band using the midpoint rule: each band owns the bins
/// closer to its centre bin than to a neighbour's. Every range holds at
/// least the band's own centre bin.
pub fn band_bin_ranges(frequencies: &[f32], fft_size: usize, sample_rate: f32) -> Vec<Range<usize>> {
    let nyquist_bin = fft_size / 2;
    let centres: Vec<usize> = frequencies
        .iter()
        .map(|f| ((f * fft_size as f32 / sample_rate).round() as usize).min(nyquist_bin))
        .collect();

    let count = centres.len();
    (0..count)
        .map(|i| {
            let c = centres[i];
            let lower = if i == 0 {
                match centres.get(1) {
                    Some(&next) => c.saturating_sub(next.saturating_sub(c) / 2),
                    None => c,
                }
            } else {
                (centres[i - 1] + c + 1) / 2
            };
            let upper = if i + 1 == count {
                let half_gap = if i == 0 { 0 } else { c.saturating_sub(centres[i - 1]) / 2 };
                (c + half_gap + 1).min(nyquist_bin + 1)
            } else {
                (c + centres[i + 1] + 1) / 2
            };
            if upper > lower {
                lower..upper
            } else {
                c..c + 1
            }
        })
        .collect()
}

struct AnalyzerState {
    fft: Fft,
    window: Vec<f32>,
    /// Maps a band's summed `|X|²` to a full-scale-sine-relative power.
    scale: f32,
    ranges: Vec<Range<usize>>,
    ring_left: RingBuffer<f32>,
    ring_right: RingBuffer<f32>,
    linear: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    powers_left: Vec<f32>,
    powers_right: Vec<f32>,
    decimation_phase: usize,
    pushed_since: usize,
    /// Left sample of a frame split across two upstream reads.
    pending: Option<f32>,
}

impl AnalyzerState {
    fn reset(&mut self) {
        self.ring_left.clear();
        self.ring_right.clear();
        self.decimation_phase = 0;
        self.pushed_since = 0;
        self.pending = None;
    }

    /// Windows and transforms one ring, writing per-band power into `out`.
    fn band_powers(&mut self, right: bool, out: &mut [f32]) {
        let ring = if right { &self.ring_right } else { &self.ring_left };
        ring.copy_to(&mut self.linear);
        for ((c, &x), &w) in self
            .spectrum
            .iter_mut()
            .zip(self.linear.iter())
            .zip(self.window.iter())
        {
            *c = Complex::new(x * w, 0.0);
        }
        self.fft.forward(&mut self.spectrum);
        for (power, range) in out.iter_mut().zip(self.ranges.iter()) {
            let sum: f32 = self.spectrum[range.clone()].iter().map(|c| c.norm_sqr()).sum();
            // NaN passes through clamp.
            let sum = if sum.is_finite() { sum } else { 0.0 };
            *power = (sum * self.scale).clamp(0.0, 1.0);
        }
    }
}

struct MeterShared {
    frequencies: Vec<f32>,
    fft_size: usize,
    /// Sample rate the rings run at, after decimation.
    analysis_rate: f32,
    interval_frames: AtomicUsize,
    state: Mutex<AnalyzerState>,
    subscribers: Mutex<Vec<Sender<BandPower>>>,
}

impl MeterShared {
    fn publish(&self, event: BandPower) {
        self.subscribers.lock().retain(|tx| match tx.try_send(event) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    fn subscribe(&self, capacity: usize) -> Receiver<BandPower> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    fn set_interval_ms(&self, interval_ms: f32) {
        let frames = (interval_ms.max(0.0) * self.analysis_rate / 1000.0).round() as usize;
        self.interval_frames.store(frames.max(1), Ordering::Relaxed);
    }
}

/// Cloneable handle to a [`SpectralPowerStage`]'s meter.
#[derive(Clone)]
pub struct MeterHandle {
    shared: Arc<MeterShared>,
}

impl MeterHandle {
    /// New receiver of [`BandPower`] events. Events are dropped, not queued,
    /// while the receiver is `capacity` events behind.
    pub fn subscribe(&self, capacity: usize) -> Receiver<BandPower> {
        self.shared.subscribe(capacity)
    }

    /// Sets the time between analyses.
    pub fn set_interval_ms(&self, interval_ms: f32) {
        self.shared.set_interval_ms(interval_ms);
    }

    /// Current interval in decimated frames.
    pub fn interval_frames(&self) -> usize {
        self.shared.interval_frames.load(Ordering::Relaxed)
    }

    /// Empties the analysis window.
    pub fn reset(&self) {
        self.shared.state.lock().reset();
    }

    pub fn frequencies(&self) -> &[f32] {
        &self.shared.frequencies
    }
}

/// Pass-through stage that measures per-band power of a stereo stream.
pub struct SpectralPowerStage<S: SampleSource> {
    upstream: S,
    shared: Arc<MeterShared>,
    decimation: usize,
}

impl<S: SampleSource> SpectralPowerStage<S> {
    pub fn new(upstream: S, params: SpectralParams) -> Result<Self> {
        if !upstream.is_readable() {
            return Err(DspError::UnreadableSource);
        }
        if upstream.channels() != 2 {
            return Err(DspError::ChannelCount {
                stage: "spectral power",
                expected: 2,
                actual: upstream.channels(),
            });
        }
        params.validate()?;

        let analysis_rate = upstream.sample_rate() as f32 / params.decimation as f32;
        let fft_size = analysis_fft_size(
            params.frequencies[0],
            params.min_periods,
            analysis_rate,
            params.min_fft_size,
        );
        if fft_size > MAX_ANALYSIS_FFT {
            return Err(DspError::InvalidParameter(format!(
                "lowest band {} Hz needs an FFT of {}, limit is {}",
                params.frequencies[0], fft_size, MAX_ANALYSIS_FFT
            )));
        }

        let window = generate_window(params.window, fft_size);
        let scale = 4.0 / (fft_size as f32 * window_energy(&window));
        let ranges = band_bin_ranges(&params.frequencies, fft_size, analysis_rate);
        log::debug!(
            "spectral meter: {} bands, fft {}, analysis rate {} Hz",
            ranges.len(),
            fft_size,
            analysis_rate
        );

        let state = AnalyzerState {
            fft: Fft::new(fft_size)?,
            window,
            scale,
            powers_left: vec![0.0; ranges.len()],
            powers_right: vec![0.0; ranges.len()],
            ranges,
            ring_left: RingBuffer::with_capacity(fft_size),
            ring_right: RingBuffer::with_capacity(fft_size),
            linear: vec![0.0; fft_size],
            spectrum: vec![COMPLEX_ZERO; fft_size],
            decimation_phase: 0,
            pushed_since: 0,
            pending: None,
        };
        let shared = Arc::new(MeterShared {
            frequencies: params.frequencies.clone(),
            fft_size,
            analysis_rate,
            interval_frames: AtomicUsize::new(fft_size),
            state: Mutex::new(state),
            subscribers: Mutex::new(Vec::new()),
        });
        if let Some(ms) = params.interval_ms {
            shared.set_interval_ms(ms);
        }

        Ok(Self {
            upstream,
            shared,
            decimation: params.decimation,
        })
    }

    pub fn handle(&self) -> MeterHandle {
        MeterHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// See [`MeterHandle::subscribe`].
    pub fn subscribe(&self, capacity: usize) -> Receiver<BandPower> {
        self.shared.subscribe(capacity)
    }

    /// See [`MeterHandle::set_interval_ms`].
    pub fn set_interval_ms(&self, interval_ms: f32) {
        self.shared.set_interval_ms(interval_ms);
    }

    pub fn fft_size(&self) -> usize {
        self.shared.fft_size
    }

    /// Bin range summed for each band.
    pub fn band_ranges(&self) -> Vec<Range<usize>> {
        self.shared.state.lock().ranges.clone()
    }

    /// Feeds one stereo frame through the decimator into the rings.
    fn push_frame(&self, state: &mut AnalyzerState, left: f32, right: f32, interval: usize) {
        let keep = state.decimation_phase == 0;
        state.decimation_phase = (state.decimation_phase + 1) % self.decimation;
        if !keep {
            return;
        }
        state.ring_left.push(left);
        state.ring_right.push(right);
        state.pushed_since += 1;
        if state.ring_left.is_full() && state.pushed_since >= interval {
            state.pushed_since = 0;
            self.analyze(state);
        }
    }

    fn analyze(&self, state: &mut AnalyzerState) {
        let mut left = std::mem::take(&mut state.powers_left);
        let mut right = std::mem::take(&mut state.powers_right);
        state.band_powers(false, &mut left);
        state.band_powers(true, &mut right);
        for (band, (&l, &r)) in left.iter().zip(right.iter()).enumerate() {
            self.shared.publish(BandPower {
                band,
                frequency: self.shared.frequencies[band],
                left: l,
                right: r,
            });
        }
        state.powers_left = left;
        state.powers_right = right;
    }
}

impl<S: SampleSource> SampleSource for SpectralPowerStage<S> {
    fn read(&mut self, buf: &mut [Sample]) -> usize {
        let n = self.upstream.read(buf);
        let interval = self.shared.interval_frames.load(Ordering::Relaxed);

        let mut state = self.shared.state.lock();
        let mut samples = &buf[..n];
        if let Some(left) = state.pending.take() {
            match samples.split_first() {
                Some((&right, rest)) => {
                    self.push_frame(&mut state, left, right, interval);
                    samples = rest;
                }
                None => state.pending = Some(left),
            }
        }
        let mut frames = samples.chunks_exact(2);
        for frame in &mut frames {
            self.push_frame(&mut state, frame[0], frame[1], interval);
        }
        if let [left] = frames.remainder() {
            state.pending = Some(*left);
        }
        n
    }

    fn position(&self) -> u64 {
        self.upstream.position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.shared.state.lock().reset();
        self.upstream.set_position(position)
    }

    fn length(&self) -> u64 {
        self.upstream.length()
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.upstream.sample_rate()
    }

    fn is_readable(&self) -> bool {
        self.upstream.is_readable()
    }
}

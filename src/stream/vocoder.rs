//! Phase-vocoder time stretching as a pull-based stage.
//!
//! Each hop slides a per-channel analysis window over the upstream signal,
//! rotates every bin by a running phasor so that the resynthesized frame stays
//! phase-continuous at its *output* position, and overlap-adds the frame into
//! an accumulator that advances by `hop / speed` samples per hop.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use parking_lot::Mutex;
use rustfft::num_complex::Complex;

use crate::core::fft::{mirror_hermitian, Fft, COMPLEX_ONE, COMPLEX_ZERO};
use crate::core::types::{Sample, VocoderParams, MAX_SPEED, MIN_SPEED};
use crate::core::window::generate_window;
use crate::error::{DspError, Result};
use crate::stream::source::SampleSource;

const TWO_PI: f32 = 2.0 * PI;

/// Minimum window sum (as a fraction of the steady-state overlap) used when
/// normalising overlap-added output.
const WINDOW_SUM_FLOOR_RATIO: f32 = 0.1;

/// Absolute floor for window sum normalization to prevent division by zero.
const WINDOW_SUM_EPSILON: f32 = 1e-6;

/// Clamps `speed` into the supported range, logging when it had to.
fn clamp_speed(speed: f32) -> f32 {
    let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
    if clamped != speed {
        log::warn!(
            "vocoder speed {} out of range [{}, {}], using {}",
            speed,
            MIN_SPEED,
            MAX_SPEED,
            clamped
        );
    }
    clamped
}

/// External owner of an A-B loop the vocoder honours while pulling upstream.
pub trait LoopBounds: Send + Sync {
    /// Active `(start, end)` in upstream samples, or `None` when not looping.
    fn bounds(&self) -> Option<(u64, u64)>;
}

/// Lock-free loop region settable from a UI thread.
#[derive(Debug, Default)]
pub struct LoopRegion {
    start: AtomicU64,
    end: AtomicU64,
    active: AtomicBool,
}

impl LoopRegion {
    /// Creates an active region looping `[start, end)`.
    pub fn new(start: u64, end: u64) -> Self {
        let region = Self::default();
        region.set(start, end);
        region
    }

    /// Moves the loop and activates it.
    pub fn set(&self, start: u64, end: u64) {
        self.start.store(start, Ordering::Relaxed);
        self.end.store(end, Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
    }

    /// Stops looping without forgetting the bounds.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl LoopBounds for LoopRegion {
    fn bounds(&self) -> Option<(u64, u64)> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        let start = self.start.load(Ordering::Relaxed);
        let end = self.end.load(Ordering::Relaxed);
        (end > start).then_some((start, end))
    }
}

/// STFT buffers of one vocoder instance.
struct VocoderState {
    channels: usize,
    frame_size: usize,
    hop: usize,
    overlap: usize,
    fft: Fft,
    window: Vec<f32>,
    window_total: f32,
    /// Bin centre frequency in radians per sample.
    bin_omega: Vec<f32>,
    /// Running per-bin rotation, unit magnitude, shared by all channels.
    phasors: Vec<Complex<f32>>,
    /// Per-channel sliding analysis windows.
    frames: Vec<Vec<f32>>,
    /// Per-channel overlap-add accumulators, `2 * frame_size` long.
    accum: Vec<Vec<f32>>,
    /// Accumulated analysis window, shared by all channels.
    window_sum: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    /// Interleaved finished samples waiting to be read.
    output: Vec<f32>,
    output_pos: usize,
    /// Fractional output position carried between hops.
    out_frac: f64,
    warmup_hops: usize,
    flush_hops: usize,
    input_ended: bool,
    finished: bool,
    /// Bumped on every reset.
    generation: u64,
}

impl VocoderState {
    fn new(params: &VocoderParams, channels: usize) -> Result<Self> {
        let frame_size = params.frame_size;
        let hop = params.hop_size();
        let fft = Fft::new(frame_size)?;
        let num_bins = fft.num_bins();
        let window = generate_window(params.window, frame_size);
        let window_total = window.iter().sum();
        let bin_omega = (0..num_bins)
            .map(|bin| TWO_PI * bin as f32 / frame_size as f32)
            .collect();

        let mut state = Self {
            channels,
            frame_size,
            hop,
            overlap: params.overlap,
            fft,
            window,
            window_total,
            bin_omega,
            phasors: vec![COMPLEX_ONE; num_bins],
            frames: vec![vec![0.0; frame_size]; channels],
            accum: vec![vec![0.0; 2 * frame_size]; channels],
            window_sum: vec![0.0; 2 * frame_size],
            spectrum: vec![COMPLEX_ZERO; frame_size],
            output: Vec::with_capacity(frame_size * channels),
            output_pos: 0,
            out_frac: 0.0,
            warmup_hops: 0,
            flush_hops: 0,
            input_ended: false,
            finished: false,
            generation: 0,
        };
        state.reset();
        Ok(state)
    }

    /// Returns every buffer to the freshly-constructed state.
    fn reset(&mut self) {
        self.phasors.iter_mut().for_each(|p| *p = COMPLEX_ONE);
        for frame in &mut self.frames {
            frame.iter_mut().for_each(|x| *x = 0.0);
        }
        for acc in &mut self.accum {
            acc.iter_mut().for_each(|x| *x = 0.0);
        }
        self.window_sum.iter_mut().for_each(|x| *x = 0.0);
        self.output.clear();
        self.output_pos = 0;
        self.out_frac = 0.0;
        self.warmup_hops = self.overlap - 1;
        self.flush_hops = 0;
        self.input_ended = false;
        self.finished = false;
        self.generation = self.generation.wrapping_add(1);
    }

    #[inline]
    fn cached(&self) -> usize {
        self.output.len() - self.output_pos
    }

    /// Copies cached output into `out`, returning samples written.
    fn drain_into(&mut self, out: &mut [Sample]) -> usize {
        let n = out.len().min(self.cached());
        out[..n].copy_from_slice(&self.output[self.output_pos..self.output_pos + n]);
        self.output_pos += n;
        if self.output_pos == self.output.len() {
            self.output.clear();
            self.output_pos = 0;
        }
        n
    }

    /// Runs one analysis-synthesis hop over `hop_input` (interleaved, exactly
    /// `hop * channels` samples).
    fn process_hop(&mut self, hop_input: &[Sample], speed: f32) {
        let n = self.frame_size;
        let hop = self.hop;
        let num_bins = n / 2 + 1;

        self.out_frac += hop as f64 / speed as f64;
        let hop_out = (self.out_frac.floor() as usize).min(n);
        self.out_frac -= hop_out as f64;

        for ch in 0..self.channels {
            let frame = &mut self.frames[ch];
            frame.copy_within(hop.., 0);
            for (i, slot) in frame[n - hop..].iter_mut().enumerate() {
                *slot = hop_input[i * self.channels + ch];
            }

            for ((c, &x), &w) in self
                .spectrum
                .iter_mut()
                .zip(frame.iter())
                .zip(self.window.iter())
            {
                *c = Complex::new(x * w, 0.0);
            }
            self.fft.forward(&mut self.spectrum);

            for (c, p) in self.spectrum[..num_bins].iter_mut().zip(self.phasors.iter()) {
                *c *= *p;
            }
            mirror_hermitian(&mut self.spectrum);
            self.fft.inverse(&mut self.spectrum);

            // Rectangular synthesis window: the whole frame is added as-is.
            for (acc, c) in self.accum[ch][..n].iter_mut().zip(self.spectrum.iter()) {
                *acc += c.re;
            }
        }
        for (ws, &w) in self.window_sum[..n].iter_mut().zip(self.window.iter()) {
            *ws += w;
        }

        let delta = hop_out as f32 - hop as f32;
        if delta != 0.0 {
            for (p, &omega) in self.phasors.iter_mut().zip(self.bin_omega.iter()) {
                *p *= Complex::from_polar(1.0, omega * delta);
                let norm = p.norm();
                if norm > 0.0 {
                    *p /= norm;
                }
            }
        }

        if self.warmup_hops > 0 {
            self.warmup_hops -= 1;
        } else {
            let floor = (self.window_total / hop_out.max(1) as f32 * WINDOW_SUM_FLOOR_RATIO)
                .max(WINDOW_SUM_EPSILON);
            for i in 0..hop_out {
                let ws = self.window_sum[i].max(floor);
                for acc in &self.accum {
                    self.output.push(acc[i] / ws);
                }
            }
        }

        for acc in &mut self.accum {
            acc.copy_within(hop_out.., 0);
            let len = acc.len();
            acc[len - hop_out..].iter_mut().for_each(|x| *x = 0.0);
        }
        let len = self.window_sum.len();
        self.window_sum.copy_within(hop_out.., 0);
        self.window_sum[len - hop_out..]
            .iter_mut()
            .for_each(|x| *x = 0.0);
    }
}

/// State shared between the stage and its control handles.
struct VocoderShared {
    speed: AtomicF32,
    enabled: AtomicBool,
    loop_bounds: Mutex<Option<Arc<dyn LoopBounds>>>,
    state: Mutex<VocoderState>,
}

impl VocoderShared {
    fn set_enabled(&self, enabled: bool) {
        // Hold the buffers while flipping the flag so a concurrent hop never
        // sees "enabled" together with stale frames.
        let mut state = self.state.lock();
        let was_enabled = self.enabled.swap(enabled, Ordering::AcqRel);
        if enabled && !was_enabled {
            state.reset();
            log::debug!("vocoder enabled, buffers cleared");
        }
    }
}

/// Cloneable control handle for a [`PhaseVocoderStage`], usable from any
/// thread while the stage is being read on the audio thread.
#[derive(Clone)]
pub struct VocoderHandle {
    shared: Arc<VocoderShared>,
}

impl VocoderHandle {
    /// Sets playback speed, clamped to `[0.5, 1.0]`. Buffers are kept.
    pub fn set_speed(&self, speed: f32) {
        self.shared
            .speed
            .store(clamp_speed(speed), Ordering::Relaxed);
    }

    /// Current playback speed.
    pub fn speed(&self) -> f32 {
        self.shared.speed.load(Ordering::Relaxed)
    }

    /// Enables or bypasses stretching. Enabling clears all buffers.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.set_enabled(enabled);
    }

    /// Whether stretching is active.
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Attaches the loop owner consulted on every upstream pull.
    pub fn attach_loop_bounds(&self, bounds: Arc<dyn LoopBounds>) {
        *self.shared.loop_bounds.lock() = Some(bounds);
    }

    /// Detaches the loop owner, if any.
    pub fn detach_loop_bounds(&self) {
        *self.shared.loop_bounds.lock() = None;
    }
}

/// Time-stretching stage: plays its upstream at `speed` (0.5–1.0) without
/// changing pitch.
pub struct PhaseVocoderStage<S: SampleSource> {
    upstream: S,
    shared: Arc<VocoderShared>,
    channels: usize,
    hop_input: Vec<Sample>,
    /// Samples delivered into the current output frame.
    out_phase: usize,
}

impl<S: SampleSource> PhaseVocoderStage<S> {
    /// Wraps `upstream`.
    ///
    /// # Errors
    /// Fails if the upstream is unreadable or the parameters are invalid.
    pub fn new(upstream: S, params: VocoderParams) -> Result<Self> {
        if !upstream.is_readable() {
            return Err(DspError::UnreadableSource);
        }
        params.validate()?;
        let channels = upstream.channels() as usize;
        if channels == 0 {
            return Err(DspError::InvalidParameter(
                "upstream reports zero channels".to_string(),
            ));
        }
        let state = VocoderState::new(&params, channels)?;
        let hop_input = vec![0.0; params.hop_size() * channels];
        Ok(Self {
            upstream,
            shared: Arc::new(VocoderShared {
                speed: AtomicF32::new(clamp_speed(params.speed)),
                enabled: AtomicBool::new(params.enabled),
                loop_bounds: Mutex::new(None),
                state: Mutex::new(state),
            }),
            channels,
            hop_input,
            out_phase: 0,
        })
    }

    /// Control handle for other threads.
    pub fn handle(&self) -> VocoderHandle {
        VocoderHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// See [`VocoderHandle::set_speed`].
    pub fn set_speed(&self, speed: f32) {
        self.handle().set_speed(speed);
    }

    /// Current playback speed.
    pub fn speed(&self) -> f32 {
        self.shared.speed.load(Ordering::Relaxed)
    }

    /// See [`VocoderHandle::set_enabled`].
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.set_enabled(enabled);
    }

    /// Whether stretching is active.
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// The wrapped source.
    pub fn upstream(&self) -> &S {
        &self.upstream
    }

    /// Fills `hop_input[range]` from upstream, wrapping at the attached loop
    /// end. Returns samples written; fewer than requested means end of input.
    fn pull(&mut self, range: std::ops::Range<usize>) -> usize {
        let bounds = self
            .shared
            .loop_bounds
            .lock()
            .as_ref()
            .and_then(|b| b.bounds());
        let channels = self.channels as u64;
        let len = range.len();
        let mut filled = 0;
        while filled < len {
            let mut limit = len - filled;
            if let Some((start, end)) = bounds {
                let start = start - start % channels;
                let end = end - end % channels;
                if end > start {
                    if self.upstream.position() >= end {
                        if let Err(e) = self.upstream.set_position(start) {
                            log::warn!("loop seek to {} failed: {}", start, e);
                            break;
                        }
                    }
                    let avail = end.saturating_sub(self.upstream.position()) as usize;
                    if avail == 0 {
                        break;
                    }
                    limit = limit.min(avail);
                }
            }
            let offset = range.start + filled;
            let n = self
                .upstream
                .read(&mut self.hop_input[offset..offset + limit]);
            if n == 0 {
                break;
            }
            filled += n;
        }
        filled
    }

    /// Pass-through read honouring loop bounds.
    fn read_bypassed(&mut self, buf: &mut [Sample]) -> usize {
        if self.shared.loop_bounds.lock().is_none() {
            return self.upstream.read(buf);
        }
        // Route through the hop scratch so looping behaves identically.
        let mut written = 0;
        while written < buf.len() {
            let chunk = (buf.len() - written).min(self.hop_input.len());
            let n = self.pull(0..chunk);
            if n == 0 {
                break;
            }
            buf[written..written + n].copy_from_slice(&self.hop_input[..n]);
            written += n;
        }
        written
    }

    /// Samples missing from the frame the last read stopped inside.
    fn frame_rest(&self) -> usize {
        (self.channels - self.out_phase) % self.channels
    }

    fn read_passthrough(&mut self, buf: &mut [Sample]) -> usize {
        // Finish a frame left half-read from the cache before handing over.
        let rest = self.frame_rest().min(buf.len());
        let head = self.shared.state.lock().drain_into(&mut buf[..rest]);
        head + self.read_bypassed(&mut buf[head..])
    }

    fn read_stretched(&mut self, buf: &mut [Sample]) -> usize {
        // The cache is interleaved, so a read may stop mid-frame.
        let wanted = buf.len();
        let mut written = 0;
        let full = self.hop_input.len();

        // Re-enabled inside a frame a bypassed read started: upstream holds
        // the rest of it.
        let rest = self.frame_rest().min(wanted);
        if rest > 0 && self.shared.state.lock().cached() == 0 {
            written = self.read_bypassed(&mut buf[..rest]);
        }

        while written < wanted {
            // Drain first; only run a hop once the cache is empty.
            let (drained, needs_input, flushing, generation) = {
                let mut state = self.shared.state.lock();
                let n = state.drain_into(&mut buf[written..wanted]);
                let generation = state.generation;
                if n > 0 || state.finished {
                    (n, false, false, generation)
                } else if !state.input_ended {
                    (0, true, false, generation)
                } else if state.flush_hops > 0 {
                    (0, false, true, generation)
                } else {
                    state.finished = true;
                    (0, false, false, generation)
                }
            };
            written += drained;
            if drained > 0 {
                continue;
            }

            let speed = self.shared.speed.load(Ordering::Relaxed);
            if needs_input {
                let n = self.pull(0..full);
                let mut state = self.shared.state.lock();
                if state.generation != generation {
                    // Reset while pulling; the hop belongs to the old stream.
                    log::debug!("vocoder reset during pull, dropping hop");
                    continue;
                }
                if n < full {
                    self.hop_input[n..].iter_mut().for_each(|x| *x = 0.0);
                    state.input_ended = true;
                    state.flush_hops = state.overlap - 1;
                    if n == 0 {
                        continue;
                    }
                }
                state.process_hop(&self.hop_input, speed);
            } else if flushing {
                self.hop_input.iter_mut().for_each(|x| *x = 0.0);
                let mut state = self.shared.state.lock();
                state.flush_hops -= 1;
                state.process_hop(&self.hop_input, speed);
            } else {
                break;
            }
        }
        written
    }
}

impl<S: SampleSource> SampleSource for PhaseVocoderStage<S> {
    fn read(&mut self, buf: &mut [Sample]) -> usize {
        let n = if self.shared.enabled.load(Ordering::Acquire) {
            self.read_stretched(buf)
        } else {
            self.read_passthrough(buf)
        };
        self.out_phase = (self.out_phase + n) % self.channels;
        n
    }

    fn position(&self) -> u64 {
        self.upstream.position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.shared.state.lock().reset();
        self.out_phase = 0;
        log::debug!("vocoder seek to {}, buffers cleared", position);
        self.upstream.set_position(position)
    }

    fn length(&self) -> u64 {
        self.upstream.length()
    }

    fn channels(&self) -> u16 {
        self.channels as u16
    }

    fn sample_rate(&self) -> u32 {
        self.upstream.sample_rate()
    }

    fn is_readable(&self) -> bool {
        self.upstream.is_readable()
    }
}

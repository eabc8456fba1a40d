//! Binaural spatializer: overlap-add FFT convolution of a stereo stream
//! against the 2×2 impulse matrix of a [`SpatialConfig`].
//!
//! Each block of `fft_size - overlap` input frames is transformed once per
//! channel; each ear's spectrum is `X_L·H_L→ear + X_R·H_R→ear`. The last
//! `overlap = impulse_len - 1` samples of every inverse transform are carried
//! into the next block, and the final block also emits its carry so the whole
//! linear-convolution tail reaches the caller.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustfft::num_complex::Complex;

use crate::core::fft::{complex_mul_add, next_power_of_two, Fft, COMPLEX_ZERO};
use crate::core::types::{Sample, SpatializerParams};
use crate::error::{DspError, Result};
use crate::spatial::config::{ObserverId, SpatialConfig, SpeakerPath};
use crate::stream::source::{read_fully, SampleSource};

const LL: usize = 0;
const LR: usize = 1;
const RL: usize = 2;
const RR: usize = 3;

/// Convolution buffers for one impulse set.
struct ConvState {
    fft: Fft,
    overlap: usize,
    block_frames: usize,
    filters: [Vec<Complex<f32>>; 4],
    /// Interleaved upstream block.
    block: Vec<Sample>,
    spec_left: Vec<Complex<f32>>,
    spec_right: Vec<Complex<f32>>,
    ear_left: Vec<Complex<f32>>,
    ear_right: Vec<Complex<f32>>,
    carry_left: Vec<f32>,
    carry_right: Vec<f32>,
    /// Interleaved, gain-scaled output of the last block.
    produced: Vec<Sample>,
    produced_pos: usize,
    /// Input exhausted and the final block (with its tail) produced.
    tail: bool,
}

impl ConvState {
    fn build(config: &SpatialConfig, params: &SpatializerParams, sample_rate: u32) -> Result<Self> {
        let matrix = config.matrix();
        if matrix.sample_rate() != sample_rate {
            return Err(DspError::InvalidFormat(format!(
                "impulse set {} is {} Hz, stream is {} Hz",
                matrix.name(),
                matrix.sample_rate(),
                sample_rate
            )));
        }
        let isolate = config.is_isolate_channels();
        let impulse_len = matrix.impulse_len();
        let overlap = impulse_len - 1;
        let fft_size = next_power_of_two(2 * impulse_len).max(params.min_fft_size);
        let block_frames = fft_size - overlap;
        let mut fft = Fft::new(fft_size)?;

        let mut filters: [Vec<Complex<f32>>; 4] = Default::default();
        for path in SpeakerPath::ALL {
            let mut filter = vec![COMPLEX_ZERO; fft_size];
            if !(isolate && path.is_cross()) {
                for (c, &x) in filter.iter_mut().zip(matrix.impulse(path)) {
                    *c = Complex::new(x, 0.0);
                }
                fft.forward(&mut filter);
            }
            filters[path.index()] = filter;
        }

        log::debug!(
            "spatializer prepared {}: {} taps, fft {}, block {}, isolate {}",
            matrix.name(),
            impulse_len,
            fft_size,
            block_frames,
            isolate
        );

        Ok(Self {
            fft,
            overlap,
            block_frames,
            filters,
            block: vec![0.0; 2 * block_frames],
            spec_left: vec![COMPLEX_ZERO; fft_size],
            spec_right: vec![COMPLEX_ZERO; fft_size],
            ear_left: vec![COMPLEX_ZERO; fft_size],
            ear_right: vec![COMPLEX_ZERO; fft_size],
            carry_left: vec![0.0; overlap],
            carry_right: vec![0.0; overlap],
            produced: Vec::with_capacity(2 * fft_size),
            produced_pos: 0,
            tail: false,
        })
    }

    fn drain_into(&mut self, out: &mut [Sample]) -> usize {
        let n = out.len().min(self.produced.len() - self.produced_pos);
        out[..n].copy_from_slice(&self.produced[self.produced_pos..self.produced_pos + n]);
        self.produced_pos += n;
        n
    }

    /// The right sample of a frame the reader has only half consumed.
    fn unpaired_sample(&self) -> Option<Sample> {
        let remaining = self.produced.len() - self.produced_pos;
        (remaining % 2 == 1).then(|| self.produced[self.produced_pos])
    }

    /// Convolves the first `frames` frames of `block`. A final block emits
    /// `frames + overlap` frames, otherwise exactly `block_frames`.
    fn run_block(&mut self, frames: usize, final_block: bool, gain: f32) {
        for (i, (l, r)) in self
            .spec_left
            .iter_mut()
            .zip(self.spec_right.iter_mut())
            .enumerate()
        {
            if i < frames {
                *l = Complex::new(self.block[2 * i], 0.0);
                *r = Complex::new(self.block[2 * i + 1], 0.0);
            } else {
                *l = COMPLEX_ZERO;
                *r = COMPLEX_ZERO;
            }
        }
        self.fft.forward(&mut self.spec_left);
        self.fft.forward(&mut self.spec_right);

        let f = &self.filters;
        for k in 0..self.spec_left.len() {
            let (xl, xr) = (self.spec_left[k], self.spec_right[k]);
            self.ear_left[k] = complex_mul_add(complex_mul_add(COMPLEX_ZERO, xl, f[LL][k]), xr, f[RL][k]);
            self.ear_right[k] =
                complex_mul_add(complex_mul_add(COMPLEX_ZERO, xl, f[LR][k]), xr, f[RR][k]);
        }
        self.fft.inverse(&mut self.ear_left);
        self.fft.inverse(&mut self.ear_right);

        let emit = if final_block {
            frames + self.overlap
        } else {
            self.block_frames
        };
        self.produced.clear();
        self.produced_pos = 0;
        for i in 0..emit {
            let mut l = self.ear_left[i].re;
            let mut r = self.ear_right[i].re;
            if i < self.overlap {
                l += self.carry_left[i];
                r += self.carry_right[i];
            }
            self.produced.push(l * gain);
            self.produced.push(r * gain);
        }

        if final_block {
            self.carry_left.iter_mut().for_each(|x| *x = 0.0);
            self.carry_right.iter_mut().for_each(|x| *x = 0.0);
            self.tail = true;
        } else {
            let start = self.block_frames;
            for i in 0..self.overlap {
                self.carry_left[i] = self.ear_left[start + i].re;
                self.carry_right[i] = self.ear_right[start + i].re;
            }
        }
    }
}

struct SpatializerShared {
    params: SpatializerParams,
    sample_rate: u32,
    state: Mutex<ConvState>,
}

impl SpatializerShared {
    /// Rebuilds the filters from `config`. On error the current set stays.
    /// With `carry_half_frame` a half-read output frame survives the swap.
    fn prepare(&self, config: &SpatialConfig, carry_half_frame: bool) -> Result<()> {
        let mut fresh = ConvState::build(config, &self.params, self.sample_rate)?;
        let mut state = self.state.lock();
        if carry_half_frame {
            if let Some(right) = state.unpaired_sample() {
                fresh.produced.push(right);
            }
        }
        *state = fresh;
        Ok(())
    }
}

/// Cloneable control handle for a [`SpatializerStage`].
#[derive(Clone)]
pub struct SpatializerHandle {
    shared: Arc<SpatializerShared>,
    config: Arc<SpatialConfig>,
}

impl SpatializerHandle {
    /// Re-reads the impulse matrix, reallocates buffers and clears the
    /// convolution carry. The previous filters stay active on error.
    pub fn prepare_new_irfs(&self) -> Result<()> {
        self.shared.prepare(&self.config, true)
    }

    pub fn fft_size(&self) -> usize {
        self.shared.state.lock().fft.size()
    }

    /// Frames carried between blocks (`impulse_len - 1`).
    pub fn overlap(&self) -> usize {
        self.shared.state.lock().overlap
    }

    /// Frames pulled from upstream per block.
    pub fn block_frames(&self) -> usize {
        self.shared.state.lock().block_frames
    }
}

/// Stereo binaural convolution stage.
pub struct SpatializerStage<S: SampleSource> {
    upstream: S,
    shared: Arc<SpatializerShared>,
    config: Arc<SpatialConfig>,
    observer: ObserverId,
    /// Samples delivered into the current output frame.
    out_phase: usize,
}

impl<S: SampleSource> SpatializerStage<S> {
    /// Wraps a stereo `upstream`, prepares the filters and subscribes to
    /// `config` so later changes re-prepare them.
    pub fn new(upstream: S, config: Arc<SpatialConfig>, params: SpatializerParams) -> Result<Self> {
        if !upstream.is_readable() {
            return Err(DspError::UnreadableSource);
        }
        if upstream.channels() != 2 {
            return Err(DspError::ChannelCount {
                stage: "spatializer",
                expected: 2,
                actual: upstream.channels(),
            });
        }
        params.validate()?;
        let sample_rate = upstream.sample_rate();
        let state = ConvState::build(&config, &params, sample_rate)?;
        let shared = Arc::new(SpatializerShared {
            params,
            sample_rate,
            state: Mutex::new(state),
        });

        let weak: Weak<SpatializerShared> = Arc::downgrade(&shared);
        let observer = config.subscribe(move |cfg| match weak.upgrade() {
            Some(shared) => shared.prepare(cfg, true),
            None => Ok(()),
        });

        Ok(Self {
            upstream,
            shared,
            config,
            observer,
            out_phase: 0,
        })
    }

    pub fn handle(&self) -> SpatializerHandle {
        SpatializerHandle {
            shared: Arc::clone(&self.shared),
            config: Arc::clone(&self.config),
        }
    }

    /// See [`SpatializerHandle::prepare_new_irfs`].
    pub fn prepare_new_irfs(&self) -> Result<()> {
        self.shared.prepare(&self.config, true)
    }

    pub fn fft_size(&self) -> usize {
        self.handle().fft_size()
    }

    pub fn overlap(&self) -> usize {
        self.handle().overlap()
    }

    pub fn config(&self) -> &Arc<SpatialConfig> {
        &self.config
    }

    fn read_passthrough(&mut self, buf: &mut [Sample]) -> usize {
        // Finish a frame left half-read from the cache before handing over.
        let rest = self.out_phase.min(buf.len());
        let head = self.shared.state.lock().drain_into(&mut buf[..rest]);
        head + self.upstream.read(&mut buf[head..])
    }

    fn read_convolved(&mut self, buf: &mut [Sample]) -> usize {
        let wanted = buf.len();
        let gain = self.shared.params.output_gain;
        let mut written = 0;

        // Re-enabled inside a frame a pass-through read started: upstream
        // holds its right sample.
        if self.out_phase == 1 && wanted > 0 {
            let cached = self.shared.state.lock().unpaired_sample().is_some();
            if !cached {
                written = self.upstream.read(&mut buf[..1]);
            }
        }

        while written < wanted {
            // One block per lock so a reconfiguration can slip in between.
            let mut state = self.shared.state.lock();
            let n = state.drain_into(&mut buf[written..wanted]);
            written += n;
            if n > 0 {
                continue;
            }
            if state.tail {
                break;
            }
            let got = read_fully(&mut self.upstream, &mut state.block);
            let frames = got / 2;
            let final_block = frames < state.block_frames;
            state.run_block(frames, final_block, gain);
        }
        written
    }
}

impl<S: SampleSource> SampleSource for SpatializerStage<S> {
    fn read(&mut self, buf: &mut [Sample]) -> usize {
        let n = if self.config.is_enabled() {
            self.read_convolved(buf)
        } else {
            self.read_passthrough(buf)
        };
        self.out_phase = (self.out_phase + n) % 2;
        n
    }

    fn position(&self) -> u64 {
        self.upstream.position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.shared.prepare(&self.config, false)?;
        self.out_phase = 0;
        self.upstream.set_position(position)
    }

    fn length(&self) -> u64 {
        self.upstream.length() + 2 * self.shared.state.lock().overlap as u64
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    fn is_readable(&self) -> bool {
        self.upstream.is_readable()
    }
}

impl<S: SampleSource> Drop for SpatializerStage<S> {
    fn drop(&mut self) {
        self.config.unsubscribe(self.observer);
    }
}

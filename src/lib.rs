#![forbid(unsafe_code)]
//! Streaming DSP stages for a music player's playback path.
//!
//! Every stage is a pull-based [`SampleSource`] wrapping another one:
//!
//! - [`PhaseVocoderStage`] plays its upstream at 0.5–1.0× speed without
//!   changing pitch.
//! - [`SpatializerStage`] convolves a stereo stream with a 2×2 matrix of
//!   head-related impulse responses taken from a shared [`SpatialConfig`].
//! - [`SpectralPowerStage`] passes audio through untouched and publishes
//!   per-band power levels for a meter.
//!
//! [`PlaybackChain`] wires the three over one decoded source.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use playback_dsp::{
//!     ChainConfig, MemorySource, PlaybackChain, PositionMatrix, SampleSource, SpatialConfig,
//! };
//!
//! // 1 second of stereo 440 Hz sine at 44.1 kHz
//! let data: Vec<f32> = (0..44100)
//!     .flat_map(|i| {
//!         let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin();
//!         [s, s]
//!     })
//!     .collect();
//! let source = MemorySource::from_interleaved(data, 2, 44100).unwrap();
//!
//! let spatial = Arc::new(SpatialConfig::new(PositionMatrix::forward(44100)));
//! let mut chain = PlaybackChain::build(source, &ChainConfig::default(), spatial).unwrap();
//! chain.vocoder().set_speed(0.75);
//! let levels = chain.subscribe_meter(64).unwrap();
//!
//! let mut block = vec![0.0; 2048];
//! while chain.read(&mut block) > 0 {}
//! assert!(levels.try_iter().all(|b| (0.0..=1.0).contains(&b.left)));
//! ```

pub mod analysis;
pub mod core;
pub mod error;
pub mod io;
pub mod spatial;
pub mod stream;

pub use analysis::spectral::{BandPower, MeterHandle, SpectralPowerStage};
pub use core::types::{
    AudioBuffer, Sample, SpatializerParams, SpectralParams, VocoderParams, MAX_SPEED, MIN_SPEED,
};
pub use core::window::WindowType;
pub use error::{DspError, Result};
pub use spatial::{
    HrirManifest, ObserverId, PositionMatrix, SpatialConfig, SpatializerHandle, SpatializerStage,
    SpeakerPath,
};
pub use stream::{
    ChainConfig, LoopBounds, LoopRegion, MemorySource, PhaseVocoderStage, PlaybackChain,
    SampleSource, VocoderHandle,
};

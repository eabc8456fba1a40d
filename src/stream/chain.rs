//! The fixed vocoder → spatializer → spectral-power chain over one source.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::analysis::spectral::{BandPower, MeterHandle, SpectralPowerStage};
use crate::core::types::{Sample, SpatializerParams, SpectralParams, VocoderParams};
use crate::error::Result;
use crate::spatial::config::SpatialConfig;
use crate::spatial::spatializer::{SpatializerHandle, SpatializerStage};
use crate::stream::source::SampleSource;
use crate::stream::vocoder::{PhaseVocoderStage, VocoderHandle};

/// Parameters for every stage of a [`PlaybackChain`].
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub vocoder: VocoderParams,
    pub spatializer: SpatializerParams,
    pub spectral: SpectralParams,
    /// Insert the spatializer when the source allows it.
    pub spatial: bool,
    /// Insert the spectral meter when the source allows it.
    pub meter: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            vocoder: VocoderParams::default(),
            spatializer: SpatializerParams::default(),
            spectral: SpectralParams::default(),
            spatial: true,
            meter: true,
        }
    }
}

impl ChainConfig {
    pub fn with_vocoder(mut self, vocoder: VocoderParams) -> Self {
        self.vocoder = vocoder;
        self
    }

    pub fn with_spatializer(mut self, spatializer: SpatializerParams) -> Self {
        self.spatializer = spatializer;
        self
    }

    pub fn with_spectral(mut self, spectral: SpectralParams) -> Self {
        self.spectral = spectral;
        self
    }

    pub fn with_spatial(mut self, spatial: bool) -> Self {
        self.spatial = spatial;
        self
    }

    pub fn with_meter(mut self, meter: bool) -> Self {
        self.meter = meter;
        self
    }
}

/// A decoded source wrapped in the playback stages.
///
/// The vocoder is always present. The spatializer is inserted only for
/// stereo sources at the impulse set's sample rate, the meter only for
/// stereo sources.
pub struct PlaybackChain {
    output: Box<dyn SampleSource>,
    vocoder: VocoderHandle,
    spatializer: Option<SpatializerHandle>,
    meter: Option<MeterHandle>,
}

impl PlaybackChain {
    pub fn build<S>(source: S, config: &ChainConfig, spatial: Arc<SpatialConfig>) -> Result<Self>
    where
        S: SampleSource + 'static,
    {
        let channels = source.channels();
        let sample_rate = source.sample_rate();

        let vocoder = PhaseVocoderStage::new(source, config.vocoder.clone())?;
        let vocoder_handle = vocoder.handle();
        let mut output: Box<dyn SampleSource> = Box::new(vocoder);

        let matrix_rate = spatial.matrix().sample_rate();
        let mut spatializer = None;
        if config.spatial && channels == 2 && sample_rate == matrix_rate {
            let stage = SpatializerStage::new(output, spatial, config.spatializer.clone())?;
            spatializer = Some(stage.handle());
            output = Box::new(stage);
        } else if config.spatial {
            log::info!(
                "spatializer skipped: {} ch at {} Hz, impulse set at {} Hz",
                channels,
                sample_rate,
                matrix_rate
            );
        }

        let mut meter = None;
        if config.meter && channels == 2 {
            let stage = SpectralPowerStage::new(output, config.spectral.clone())?;
            meter = Some(stage.handle());
            output = Box::new(stage);
        }

        log::debug!(
            "playback chain: vocoder{}{}",
            if spatializer.is_some() { " -> spatializer" } else { "" },
            if meter.is_some() { " -> meter" } else { "" }
        );

        Ok(Self {
            output,
            vocoder: vocoder_handle,
            spatializer,
            meter,
        })
    }

    pub fn vocoder(&self) -> &VocoderHandle {
        &self.vocoder
    }

    pub fn spatializer(&self) -> Option<&SpatializerHandle> {
        self.spatializer.as_ref()
    }

    pub fn meter(&self) -> Option<&MeterHandle> {
        self.meter.as_ref()
    }

    /// Band-power events, if the chain carries a meter.
    pub fn subscribe_meter(&self, capacity: usize) -> Option<Receiver<BandPower>> {
        self.meter.as_ref().map(|m| m.subscribe(capacity))
    }
}

impl SampleSource for PlaybackChain {
    fn read(&mut self, buf: &mut [Sample]) -> usize {
        self.output.read(buf)
    }

    fn position(&self) -> u64 {
        self.output.position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.output.set_position(position)
    }

    fn length(&self) -> u64 {
        self.output.length()
    }

    fn channels(&self) -> u16 {
        self.output.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    fn is_readable(&self) -> bool {
        self.output.is_readable()
    }
}

use crate::core::window::WindowType;
use crate::error::DspError;

/// A single audio sample (32-bit float, range -1.0 to 1.0).
pub type Sample = f32;

/// Slowest playback speed the vocoder accepts.
pub const MIN_SPEED: f32 = 0.5;
/// Fastest playback speed the vocoder accepts (unstretched).
pub const MAX_SPEED: f32 = 1.0;

/// Default band centres of the level meter, in Hz.
pub const DEFAULT_BAND_FREQUENCIES: [f32; 10] = [
    32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Buffer holding audio samples in interleaved format.
///
/// For mono audio, samples are stored sequentially: `[s0, s1, s2, ...]`
/// For stereo audio, samples are interleaved: `[L0, R0, L1, R1, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Raw interleaved sample data.
    pub data: Vec<Sample>,
    /// Number of channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new audio buffer.
    ///
    /// # Errors
    /// Returns `DspError::InvalidParameter` if channels or sample_rate is 0.
    pub fn new(data: Vec<Sample>, channels: u16, sample_rate: u32) -> Result<Self, DspError> {
        if channels == 0 {
            return Err(DspError::InvalidParameter(
                "channel count must be at least 1".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(DspError::InvalidParameter(
                "sample rate must be positive".to_string(),
            ));
        }
        Ok(Self {
            data,
            channels,
            sample_rate,
        })
    }

    /// Number of frames in the buffer (total samples / channels).
    pub fn num_frames(&self) -> usize {
        self.data.len() / self.channels.max(1) as usize
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Returns true if the buffer contains no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a single channel's data as a new vector.
    pub fn channel_data(&self, channel: u16) -> Vec<Sample> {
        if channel >= self.channels {
            return Vec::new();
        }
        self.data
            .iter()
            .skip(channel as usize)
            .step_by(self.channels as usize)
            .copied()
            .collect()
    }

    /// Create an `AudioBuffer` from separate channel vectors.
    ///
    /// # Errors
    /// Returns error if no channels are given or they differ in length.
    pub fn from_channels(
        channels_data: &[Vec<Sample>],
        sample_rate: u32,
    ) -> Result<Self, DspError> {
        if channels_data.is_empty() {
            return Err(DspError::InvalidParameter(
                "at least one channel is required".to_string(),
            ));
        }
        let num_frames = channels_data[0].len();
        if channels_data.iter().any(|ch| ch.len() != num_frames) {
            return Err(DspError::InvalidParameter(
                "all channels must have the same number of samples".to_string(),
            ));
        }
        let mut data = Vec::with_capacity(num_frames * channels_data.len());
        for i in 0..num_frames {
            for ch in channels_data {
                data.push(ch[i]);
            }
        }
        AudioBuffer::new(data, channels_data.len() as u16, sample_rate)
    }
}

/// Parameters of the phase-vocoder stage.
#[derive(Debug, Clone)]
pub struct VocoderParams {
    /// Analysis frame length in samples (power of two, default 2048).
    pub frame_size: usize,
    /// Frames overlapping each sample; hop = frame_size / overlap (default 4).
    pub overlap: usize,
    /// Analysis window (default Hann).
    pub window: WindowType,
    /// Initial playback speed, clamped to [0.5, 1.0].
    pub speed: f32,
    /// Whether the stage starts enabled.
    pub enabled: bool,
}

impl Default for VocoderParams {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            overlap: 4,
            window: WindowType::Hann,
            speed: 1.0,
            enabled: true,
        }
    }
}

impl VocoderParams {
    /// Set the analysis frame size.
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Set the overlap factor.
    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    /// Set the analysis window.
    pub fn with_window(mut self, window: WindowType) -> Self {
        self.window = window;
        self
    }

    /// Set the initial speed.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// Set whether the stage starts enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Analysis hop size.
    pub fn hop_size(&self) -> usize {
        self.frame_size / self.overlap.max(1)
    }

    /// Validate all parameters.
    pub fn validate(&self) -> Result<(), DspError> {
        if self.frame_size < 4 || !self.frame_size.is_power_of_two() {
            return Err(DspError::InvalidParameter(format!(
                "vocoder frame size must be a power of two >= 4, got {}",
                self.frame_size
            )));
        }
        if self.overlap < 2
            || !self.overlap.is_power_of_two()
            || self.overlap > self.frame_size
        {
            return Err(DspError::InvalidParameter(format!(
                "vocoder overlap must be a power of two in [2, frame size], got {}",
                self.overlap
            )));
        }
        if !self.speed.is_finite() {
            return Err(DspError::InvalidParameter(format!(
                "speed must be finite, got {}",
                self.speed
            )));
        }
        Ok(())
    }
}

/// Parameters of the spatializer stage.
#[derive(Debug, Clone)]
pub struct SpatializerParams {
    /// Lower bound on the convolution FFT size (power of two).
    pub min_fft_size: usize,
    /// Fixed gain applied to every convolved output sample.
    pub output_gain: f32,
}

/// Gain applied to spatialized output; two virtual speakers reach each ear.
pub const SPATIAL_OUTPUT_GAIN: f32 = 0.5;

impl Default for SpatializerParams {
    fn default() -> Self {
        Self {
            min_fft_size: 1024,
            output_gain: SPATIAL_OUTPUT_GAIN,
        }
    }
}

impl SpatializerParams {
    /// Set the FFT size floor.
    pub fn with_min_fft_size(mut self, min_fft_size: usize) -> Self {
        self.min_fft_size = min_fft_size;
        self
    }

    /// Set the output gain.
    pub fn with_output_gain(mut self, gain: f32) -> Self {
        self.output_gain = gain;
        self
    }

    /// Validate all parameters.
    pub fn validate(&self) -> Result<(), DspError> {
        if self.min_fft_size < 2 || !self.min_fft_size.is_power_of_two() {
            return Err(DspError::InvalidParameter(format!(
                "spatializer FFT floor must be a power of two >= 2, got {}",
                self.min_fft_size
            )));
        }
        if !self.output_gain.is_finite() {
            return Err(DspError::InvalidParameter(
                "spatializer output gain must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the spectral power (level meter) stage.
#[derive(Debug, Clone)]
pub struct SpectralParams {
    /// Band centre frequencies in Hz, ascending.
    pub frequencies: Vec<f32>,
    /// Periods of the lowest band that must fit in one analysis frame.
    pub min_periods: f32,
    /// Lower bound on the analysis FFT size (power of two).
    pub min_fft_size: usize,
    /// Only every `decimation`-th stereo frame enters the analysis window.
    pub decimation: usize,
    /// Time between reports; `None` reports once per full window advance.
    pub interval_ms: Option<f32>,
    /// Analysis window.
    pub window: WindowType,
}

impl Default for SpectralParams {
    fn default() -> Self {
        Self {
            frequencies: DEFAULT_BAND_FREQUENCIES.to_vec(),
            min_periods: 2.0,
            min_fft_size: 1024,
            decimation: 1,
            interval_ms: None,
            window: WindowType::Hann,
        }
    }
}

impl SpectralParams {
    /// Set the band centre frequencies.
    pub fn with_frequencies(mut self, frequencies: Vec<f32>) -> Self {
        self.frequencies = frequencies;
        self
    }

    /// Set the minimum number of periods of the lowest band per frame.
    pub fn with_min_periods(mut self, min_periods: f32) -> Self {
        self.min_periods = min_periods;
        self
    }

    /// Set the FFT size floor.
    pub fn with_min_fft_size(mut self, min_fft_size: usize) -> Self {
        self.min_fft_size = min_fft_size;
        self
    }

    /// Set the decimation stride.
    pub fn with_decimation(mut self, decimation: usize) -> Self {
        self.decimation = decimation;
        self
    }

    /// Set the reporting interval.
    pub fn with_interval_ms(mut self, interval_ms: f32) -> Self {
        self.interval_ms = Some(interval_ms);
        self
    }

    /// Validate all parameters.
    pub fn validate(&self) -> Result<(), DspError> {
        if self.frequencies.is_empty() {
            return Err(DspError::EmptyFrequencies);
        }
        if self
            .frequencies
            .iter()
            .any(|f| !f.is_finite() || *f <= 0.0)
        {
            return Err(DspError::InvalidParameter(
                "band frequencies must be positive and finite".to_string(),
            ));
        }
        if self.frequencies.windows(2).any(|w| w[1] <= w[0]) {
            return Err(DspError::InvalidParameter(
                "band frequencies must be strictly ascending".to_string(),
            ));
        }
        if !self.min_periods.is_finite() || self.min_periods <= 0.0 {
            return Err(DspError::InvalidParameter(format!(
                "min periods must be positive, got {}",
                self.min_periods
            )));
        }
        if self.min_fft_size < 2 || !self.min_fft_size.is_power_of_two() {
            return Err(DspError::InvalidParameter(format!(
                "spectral FFT floor must be a power of two >= 2, got {}",
                self.min_fft_size
            )));
        }
        if self.decimation == 0 {
            return Err(DspError::InvalidParameter(
                "decimation stride must be at least 1".to_string(),
            ));
        }
        if let Some(ms) = self.interval_ms {
            if !ms.is_finite() || ms <= 0.0 {
                return Err(DspError::InvalidParameter(format!(
                    "interval must be positive, got {} ms",
                    ms
                )));
            }
        }
        Ok(())
    }
}

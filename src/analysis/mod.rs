//! Stream analysis taps.

pub mod spectral;

pub use spectral::{analysis_fft_size, band_bin_ranges, BandPower, MeterHandle, SpectralPowerStage};

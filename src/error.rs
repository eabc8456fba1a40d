//! Error types for the playback DSP crate.

use thiserror::Error;

/// Errors raised while building or reconfiguring a DSP stage.
///
/// Streaming reads never fail: a short or empty upstream read is treated as
/// end of input, so these only surface from constructors, seeks and
/// impulse-response preparation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DspError {
    /// The upstream source cannot be read from.
    #[error("upstream source is not readable")]
    UnreadableSource,
    /// The upstream source has the wrong channel count for this stage.
    #[error("{stage} requires {expected} channels, source has {actual}")]
    ChannelCount {
        stage: &'static str,
        expected: u16,
        actual: u16,
    },
    /// The spectral analyzer was given no band frequencies.
    #[error("frequency list is empty")]
    EmptyFrequencies,
    /// A size, rate or factor is outside what the stage supports.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// An impulse response or manifest could not be decoded.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// I/O error, with the offending path when known.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for DspError {
    fn from(err: std::io::Error) -> Self {
        DspError::IoError(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DspError>;

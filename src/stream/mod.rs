//! Pull-based sample sources and the stages that wrap them.

pub mod chain;
pub mod source;
pub mod vocoder;

pub use chain::{ChainConfig, PlaybackChain};
pub use source::{read_fully, MemorySource, SampleSource};
pub use vocoder::{LoopBounds, LoopRegion, PhaseVocoderStage, VocoderHandle};

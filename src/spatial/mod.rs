//! Binaural spatialization: shared configuration, HRIR loading and the
//! convolution stage.

pub mod config;
pub mod manifest;
pub mod spatializer;

pub use config::{ObserverId, PositionMatrix, SpatialConfig, SpeakerPath, MAX_IMPULSE_LEN};
pub use manifest::HrirManifest;
pub use spatializer::{SpatializerHandle, SpatializerStage};

//! JSON description of an HRIR set stored as four mono WAV files.
//!
//! ```json
//! {
//!   "name": "Wide",
//!   "sample_rate": 44100,
//!   "left_to_left": "wide_ll.wav",
//!   "left_to_right": "wide_lr.wav",
//!   "right_to_left": "wide_rl.wav",
//!   "right_to_right": "wide_rr.wav"
//! }
//! ```
//!
//! Relative paths are resolved against the manifest's directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DspError, Result};
use crate::io::wav::read_wav_file;
use crate::spatial::config::PositionMatrix;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrirManifest {
    pub name: String,
    pub sample_rate: u32,
    pub left_to_left: PathBuf,
    pub left_to_right: PathBuf,
    pub right_to_left: PathBuf,
    pub right_to_right: PathBuf,
}

impl HrirManifest {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DspError::InvalidFormat(format!("HRIR manifest: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DspError::InvalidFormat(format!("HRIR manifest: {}", e)))
    }

    /// Reads the manifest and all four impulse files it names.
    pub fn load_matrix(path: impl AsRef<Path>) -> Result<PositionMatrix> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DspError::IoError(format!("{}: {}", path.display(), e)))?;
        let manifest = Self::from_json(&json)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.to_matrix(base)
    }

    /// Loads the impulse files, resolving relative paths against `base`.
    pub fn to_matrix(&self, base: &Path) -> Result<PositionMatrix> {
        let impulses = [
            self.load_impulse(base, &self.left_to_left)?,
            self.load_impulse(base, &self.left_to_right)?,
            self.load_impulse(base, &self.right_to_left)?,
            self.load_impulse(base, &self.right_to_right)?,
        ];
        let matrix = PositionMatrix::new(self.name.clone(), self.sample_rate, impulses)?;
        log::debug!(
            "loaded HRIR set {} ({} taps at {} Hz)",
            matrix.name(),
            matrix.impulse_len(),
            matrix.sample_rate()
        );
        Ok(matrix)
    }

    fn load_impulse(&self, base: &Path, file: &Path) -> Result<Vec<f32>> {
        let full = if file.is_absolute() {
            file.to_path_buf()
        } else {
            base.join(file)
        };
        let buffer = read_wav_file(&full)?;
        if buffer.channels != 1 {
            return Err(DspError::InvalidFormat(format!(
                "{}: impulse must be mono, has {} channels",
                full.display(),
                buffer.channels
            )));
        }
        if buffer.sample_rate != self.sample_rate {
            return Err(DspError::InvalidFormat(format!(
                "{}: impulse rate {} Hz does not match manifest rate {} Hz",
                full.display(),
                buffer.sample_rate,
                self.sample_rate
            )));
        }
        Ok(buffer.data)
    }
}

//! Engine-owned spatialization settings shared with every spatializer stage.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{DspError, Result};

/// Longest impulse response accepted, in samples.
pub const MAX_IMPULSE_LEN: usize = 1 << 16;

/// One of the four speaker-to-ear paths of a [`PositionMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeakerPath {
    LeftToLeft,
    LeftToRight,
    RightToLeft,
    RightToRight,
}

impl SpeakerPath {
    /// All paths in storage order.
    pub const ALL: [SpeakerPath; 4] = [
        SpeakerPath::LeftToLeft,
        SpeakerPath::LeftToRight,
        SpeakerPath::RightToLeft,
        SpeakerPath::RightToRight,
    ];

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            SpeakerPath::LeftToLeft => 0,
            SpeakerPath::LeftToRight => 1,
            SpeakerPath::RightToLeft => 2,
            SpeakerPath::RightToRight => 3,
        }
    }

    /// Whether the path crosses from one side to the other ear.
    pub fn is_cross(self) -> bool {
        matches!(self, SpeakerPath::LeftToRight | SpeakerPath::RightToLeft)
    }
}

/// Four time-domain impulse responses describing two virtual speakers.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionMatrix {
    name: String,
    sample_rate: u32,
    impulses: [Arc<[f32]>; 4],
}

impl PositionMatrix {
    /// Builds a matrix from the four impulses, indexed like [`SpeakerPath::ALL`].
    ///
    /// # Errors
    /// Fails on an empty, over-long or non-finite impulse, or a zero rate.
    pub fn new(name: impl Into<String>, sample_rate: u32, impulses: [Vec<f32>; 4]) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DspError::InvalidParameter(
                "impulse sample rate must be positive".to_string(),
            ));
        }
        for (path, ir) in SpeakerPath::ALL.iter().zip(impulses.iter()) {
            if ir.is_empty() || ir.len() > MAX_IMPULSE_LEN {
                return Err(DspError::InvalidParameter(format!(
                    "{:?} impulse length {} outside 1..={}",
                    path,
                    ir.len(),
                    MAX_IMPULSE_LEN
                )));
            }
            if ir.iter().any(|x| !x.is_finite()) {
                return Err(DspError::InvalidFormat(format!(
                    "{:?} impulse contains non-finite samples",
                    path
                )));
            }
        }
        let [ll, lr, rl, rr] = impulses;
        Ok(Self {
            name: name.into(),
            sample_rate,
            impulses: [ll.into(), lr.into(), rl.into(), rr.into()],
        })
    }

    /// The "Forward" preset: every path is a unit impulse at zero offset.
    pub fn forward(sample_rate: u32) -> Self {
        let unit: Arc<[f32]> = Arc::from(vec![1.0f32]);
        Self {
            name: "Forward".to_string(),
            sample_rate: sample_rate.max(1),
            impulses: [unit.clone(), unit.clone(), unit.clone(), unit],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Impulse response of one path.
    pub fn impulse(&self, path: SpeakerPath) -> &[f32] {
        &self.impulses[path.index()]
    }

    /// Longest of the four impulses.
    pub fn impulse_len(&self) -> usize {
        self.impulses.iter().map(|ir| ir.len()).max().unwrap_or(1)
    }
}

/// Identifies an observer registered on a [`SpatialConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&SpatialConfig) -> Result<()> + Send + Sync>;

/// Spatialization state owned by the playback engine: global enable, the
/// isolate-channels bypass and the active [`PositionMatrix`].
///
/// Every change is reported to the registered observers after the new value
/// is visible; spatializer stages react by re-preparing their filters.
pub struct SpatialConfig {
    enabled: AtomicBool,
    isolate_channels: AtomicBool,
    matrix: RwLock<PositionMatrix>,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_id: AtomicU64,
}

impl SpatialConfig {
    /// Enabled configuration using `matrix`.
    pub fn new(matrix: PositionMatrix) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            isolate_channels: AtomicBool::new(false),
            matrix: RwLock::new(matrix),
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_isolate_channels(&self) -> bool {
        self.isolate_channels.load(Ordering::Acquire)
    }

    /// Snapshot of the active matrix.
    pub fn matrix(&self) -> PositionMatrix {
        self.matrix.read().clone()
    }

    /// Turns spatialization on or off globally.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        if self.enabled.swap(enabled, Ordering::AcqRel) == enabled {
            return Ok(());
        }
        self.notify()
    }

    /// With isolation on, the cross paths are silenced so each ear only
    /// hears its own side.
    pub fn set_isolate_channels(&self, isolate: bool) -> Result<()> {
        if self.isolate_channels.swap(isolate, Ordering::AcqRel) == isolate {
            return Ok(());
        }
        self.notify()
    }

    /// Installs a new speaker position.
    pub fn set_matrix(&self, matrix: PositionMatrix) -> Result<()> {
        log::debug!("spatial position -> {}", matrix.name());
        *self.matrix.write() = matrix;
        self.notify()
    }

    /// Registers `observer`, called after every change.
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&SpatialConfig) -> Result<()> + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, Arc::new(observer)));
        id
    }

    /// Removes an observer. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Calls every observer, outside the registry lock. All observers run
    /// even when one fails; the first error is returned.
    fn notify(&self) -> Result<()> {
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        let mut first_err = None;
        for observer in observers {
            if let Err(e) = observer(self) {
                log::warn!("spatial observer failed: {}", e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for SpatialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialConfig")
            .field("enabled", &self.is_enabled())
            .field("isolate_channels", &self.is_isolate_channels())
            .field("matrix", &self.matrix.read().name())
            .field("observers", &self.observer_count())
            .finish()
    }
}

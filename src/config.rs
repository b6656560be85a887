use crate::error::{Result, SegmentationError};
use crate::frame::Size;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Inference/compositing backend chosen once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Fixed-size native model, native compositing kernels
    Tflite,
    /// Graph model, native compositing kernels
    Wasm,
    /// Graph model, tensor compositing
    Gpu,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Tflite => "tflite",
            Backend::Wasm => "wasm",
            Backend::Gpu => "gpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tflite" => Ok(Backend::Tflite),
            "wasm" => Ok(Backend::Wasm),
            "gpu" => Ok(Backend::Gpu),
            other => Err(SegmentationError::invalid_params(format!(
                "unknown backend {other:?}, expected tflite, wasm or gpu"
            ))),
        }
    }
}

/// Processing resolution fixed at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupInfo {
    pub color_width: u32,
    pub color_height: u32,
}

impl SetupInfo {
    pub fn new(color_width: u32, color_height: u32) -> Self {
        Self {
            color_width,
            color_height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.color_width, self.color_height)
    }
}

/// Per-call tuning knobs for the compositing kernels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtraParams {
    /// Mask-edge contraction radius
    pub erode: u32,
    pub enhance_frame: bool,
    /// Only read when `enhance_frame` is set
    pub gamma: f32,
}

impl Default for ExtraParams {
    fn default() -> Self {
        Self {
            erode: 0,
            enhance_frame: false,
            gamma: 1.0,
        }
    }
}

impl ExtraParams {
    /// Largest accepted `erode` radius
    pub const MAX_ERODE: u32 = 64;

    /// Odd erosion window, `2 * erode - 1`, or 0 when erosion is off
    pub fn erode_kernel_size(&self) -> u32 {
        if self.erode >= 1 {
            self.erode.saturating_mul(2) - 1
        } else {
            0
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.erode > Self::MAX_ERODE {
            return Err(SegmentationError::invalid_params(format!(
                "erode must be at most {}, got {}",
                Self::MAX_ERODE,
                self.erode
            )));
        }
        if self.enhance_frame && !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(SegmentationError::invalid_params(format!(
                "gamma must be finite and > 0, got {}",
                self.gamma
            )));
        }
        Ok(())
    }
}

/// Where a model comes from.
///
/// Fetching remote assets is left to the host; it hands over bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Path(PathBuf),
    Url(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Path(path) => write!(f, "{}", path.display()),
            ModelSource::Url(url) => f.write_str(url),
            ModelSource::Bytes(bytes) => write!(f, "<{} bytes in memory>", bytes.len()),
        }
    }
}

/// Everything needed to construct a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    pub setup: SetupInfo,
    pub backend: Backend,
    pub model: ModelSource,
    /// Load a fresh model instead of reusing the cached one
    #[serde(default)]
    pub reload: bool,
}

impl SessionOptions {
    pub fn new(setup: SetupInfo, backend: Backend, model: ModelSource) -> Self {
        Self {
            setup,
            backend,
            model,
            reload: false,
        }
    }

    pub fn with_reload(mut self, reload: bool) -> Self {
        self.reload = reload;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.setup.size().ensure_non_empty()
    }
}

use crate::frame::ColorSpace;
use crate::session::SessionState;

/// Convenience result type used across the SDK.
pub type Result<T> = std::result::Result<T, SegmentationError>;

/// Errors raised inside the frame pipeline.
///
/// Public entry points convert these into a `bool` status after logging;
/// the `try_*` variants hand them to the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    #[error("session is not ready (state: {state:?})")]
    NotReady { state: SessionState },

    #[error("session has been destroyed")]
    Destroyed,

    #[error("frame processing failed: {0}")]
    ProcessingFailed(String),

    #[error("unsupported colorspace {0:?}, only RGBA is implemented")]
    UnsupportedColorSpace(ColorSpace),

    #[error("buffer length mismatch: expected {expected} bytes, got {actual}")]
    BufferLength { expected: usize, actual: usize },

    #[error("invalid frame size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("native kernel error: {0}")]
    Kernel(String),

    #[error("unknown native buffer handle {0}")]
    UnknownHandle(u32),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("model is already in use by another call")]
    ModelBusy,

    #[error("ORT inference error: {0}")]
    Inference(#[from] ort::Error),

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SegmentationError {
    pub fn processing(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn kernel(msg: impl Into<String>) -> Self {
        Self::Kernel(msg.into())
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Whether the failure only costs the current frame.
    ///
    /// Session-level failures (not ready, destroyed, bad configuration)
    /// will repeat on every frame until the host changes something.
    pub fn is_skip_frame(&self) -> bool {
        !matches!(
            self,
            Self::NotReady { .. } | Self::Destroyed | Self::ModelLoad(_) | Self::Config(_)
        )
    }
}

//! Person segmentation and background effects for live video frames.
//!
//! A [`Session`] takes RGBA frames at any size, normalizes them to its
//! processing resolution, runs a segmentation model on one of two
//! inference paths and composites the result (background removal, blur
//! or replacement) into a caller-owned output frame.

pub mod composite;
pub mod config;
pub mod error;
mod filters;
pub mod frame;
pub mod kernel;
pub mod logging;
pub mod segmentation;
pub mod session;

pub use composite::{Compositor, Effect};
pub use config::{Backend, ExtraParams, ModelSource, SessionOptions, SetupInfo};
pub use error::{Result, SegmentationError};
pub use frame::{ColorSpace, FrameBuffer, Size};
pub use kernel::{BridgeStats, NativeKernel, NativeModule, SoftwareKernel};
pub use segmentation::{ModelKind, ModelLoader, ModelRegistry, OnnxModelLoader};
pub use session::{FrameStats, Runtime, Session, SessionState};

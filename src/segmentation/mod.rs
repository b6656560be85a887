mod graph;
mod native;
mod onnx;
pub mod preprocess;
mod refine;
mod registry;
pub mod types;

pub use graph::{foreground_mask, is_foreground_class, GraphEngine, GRAPH_INPUT_SIZE};
pub use native::{person_probability, NativeEngine, NATIVE_INPUT_SIZE};
pub use onnx::{OnnxFixedSizeModel, OnnxGraphModel, OnnxModelLoader};
pub use preprocess::{normalize, try_normalize, Preprocessor};
pub use refine::{refine, smoothstep};
pub use registry::{LoadedModel, ModelKind, ModelLease, ModelRegistry};
pub use types::{FixedSizeModel, GraphModel, Mask, ModelLoader, RawMask};

use crate::error::Result;
use crate::frame::Size;
use crate::kernel::NativeModule;

/// Inference strategy, fixed when the session is created.
pub enum InferenceEngine {
    NativeFixedSize(NativeEngine),
    TensorGraph(GraphEngine),
}

impl InferenceEngine {
    /// Build the engine matching the kind of model behind `lease`
    pub fn from_lease(lease: ModelLease) -> Result<Self> {
        match lease.kind() {
            ModelKind::NativeFixedSize => Ok(Self::NativeFixedSize(NativeEngine::new(lease)?)),
            ModelKind::TensorGraph => Ok(Self::TensorGraph(GraphEngine::new(lease)?)),
        }
    }

    pub fn model(&self) -> &ModelLease {
        match self {
            Self::NativeFixedSize(engine) => engine.model(),
            Self::TensorGraph(engine) => engine.model(),
        }
    }

    /// Model input resolution, which is also the mask resolution
    pub fn input_size(&self) -> Size {
        match self {
            Self::NativeFixedSize(engine) => engine.input_size(),
            Self::TensorGraph(engine) => engine.input_size(),
        }
    }

    /// Unrefined model output for one frame
    pub fn infer(
        &mut self,
        module: &mut NativeModule,
        frame: &[u8],
        frame_size: Size,
        remove_mode: bool,
    ) -> Result<RawMask> {
        match self {
            Self::NativeFixedSize(engine) => engine
                .infer(module, frame, frame_size, remove_mode)
                .map(RawMask::Probability),
            Self::TensorGraph(engine) => engine
                .infer(module, frame, frame_size)
                .map(RawMask::Binary),
        }
    }

    /// Alpha mask at model resolution, refined where the path needs it
    pub fn alpha_mask(
        &mut self,
        module: &mut NativeModule,
        frame: &[u8],
        frame_size: Size,
        remove_mode: bool,
    ) -> Result<Mask> {
        let size = self.input_size();
        match self.infer(module, frame, frame_size, remove_mode)? {
            RawMask::Probability(mask) => Ok(mask),
            RawMask::Binary(raw) => {
                let alpha = refine(&raw);
                let plane: Vec<f32> = alpha.iter().copied().collect();
                preprocess::mask_from_plane(&plane, size, remove_mode)
            }
        }
    }
}

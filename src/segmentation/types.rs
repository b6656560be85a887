use crate::config::ModelSource;
use crate::error::Result;
use crate::frame::{FrameBuffer, Size};
use ndarray::{Array2, Array4, ArrayView4};

/// Person-probability mask carried in the alpha channel of an RGBA frame.
/// Lives at model resolution and is rebuilt every frame.
pub type Mask = FrameBuffer;

/// What an inference path hands back before refinement
#[derive(Debug, Clone)]
pub enum RawMask {
    /// Smooth softmax probabilities, already usable as alpha
    Probability(Mask),
    /// Hard 0/1 foreground indicator at model resolution
    Binary(Array2<f32>),
}

/// Multi-class graph model run by the tensor-graph backend.
pub trait GraphModel {
    /// Input resolution; the model takes NHWC `[1, h, w, 3]` in `[0, 1]`
    fn input_size(&self) -> Size;

    /// Run the graph, returning per-class scores shaped `[1, h, w, classes]`
    fn run(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>>;
}

/// Fixed-size model executing against preallocated native memory.
///
/// The caller fills [`FixedSizeModel::input_mut`], calls `invoke`, then
/// reads [`FixedSizeModel::output`].
pub trait FixedSizeModel {
    fn input_size(&self) -> Size;

    /// Interleaved RGB floats, `h * w * 3`, row-major
    fn input_mut(&mut self) -> &mut [f32];

    fn invoke(&mut self) -> Result<()>;

    /// Interleaved (background, person) logits, `h * w * 2`
    fn output(&self) -> &[f32];
}

/// Turns model assets into runnable models.
///
/// Fetching and caching the asset bytes is the host's concern.
pub trait ModelLoader {
    fn load_graph(&self, source: &ModelSource) -> Result<Box<dyn GraphModel>>;

    fn load_fixed(&self, source: &ModelSource) -> Result<Box<dyn FixedSizeModel>>;
}

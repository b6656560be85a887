mod native;
mod tensor;

pub use native::clear_black_alpha;
pub use tensor::blend;

use crate::config::{Backend, ExtraParams};
use crate::error::{Result, SegmentationError};
use crate::frame::{FrameBuffer, Size};
use crate::kernel::NativeModule;
use crate::segmentation::Mask;

/// Effect requested by the host
#[derive(Debug, Clone, Copy)]
pub enum Effect<'a> {
    /// Keep the person, make the background transparent
    Remove,
    /// Keep the person over a blurred copy of the frame
    Blur { blur_size: u32 },
    /// Keep the person over a caller-supplied image
    Replace { background: &'a FrameBuffer },
}

impl Effect<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Effect::Remove => "remove_background",
            Effect::Blur { .. } => "blur_background",
            Effect::Replace { .. } => "replace_background",
        }
    }
}

/// Effect with its inputs already at processing resolution
#[derive(Debug, Clone, Copy)]
pub(crate) enum Blend<'a> {
    Remove,
    Blur { blur_size: u32 },
    Replace { background: &'a [u8] },
}

/// Odd blur window for the kernels; even sizes widen by one.
///
/// Windows wider than twice the frame's long side are rejected.
pub(crate) fn blur_window(blur_size: u32, frame_size: Size) -> Result<u32> {
    if blur_size == 0 {
        return Err(SegmentationError::invalid_params("blur size must be at least 1"));
    }
    let limit = max_blur_window(frame_size);
    if blur_size > limit {
        return Err(SegmentationError::invalid_params(format!(
            "blur size {blur_size} exceeds {limit} for a {}x{} frame",
            frame_size.width, frame_size.height
        )));
    }
    Ok(blur_size | 1)
}

/// `2 * max(w, h) + 1`
pub(crate) fn max_blur_window(frame_size: Size) -> u32 {
    frame_size
        .width
        .max(frame_size.height)
        .saturating_mul(2)
        .saturating_add(1)
}

/// Where compositing math runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compositor {
    /// Native kernel calls through the buffer bridge
    Native,
    /// `ndarray` math on `[0, 1]` tensors
    Tensor,
}

impl Compositor {
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Tflite | Backend::Wasm => Compositor::Native,
            Backend::Gpu => Compositor::Tensor,
        }
    }

    /// Combine `frame` (at `size`) with `mask` into new RGBA pixels at `size`
    pub(crate) fn composite(
        &self,
        module: &mut NativeModule,
        blend: &Blend<'_>,
        frame: &[u8],
        size: Size,
        mask: &Mask,
        params: &ExtraParams,
    ) -> Result<Vec<u8>> {
        if let Blend::Replace { background } = blend {
            if background.len() != size.rgba_len() {
                return Err(SegmentationError::BufferLength {
                    expected: size.rgba_len(),
                    actual: background.len(),
                });
            }
        }
        match self {
            Compositor::Native => native::composite(module, blend, frame, size, mask, params),
            Compositor::Tensor => tensor::composite(blend, frame, size, mask, params),
        }
    }
}

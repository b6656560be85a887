mod bridge;
mod software;

pub use bridge::{BridgeStats, BufferScope, NativeModule};
pub use software::SoftwareKernel;

use crate::config::ExtraParams;
use crate::error::Result;
use crate::frame::Size;

/// Opaque handle to a buffer living in the kernel's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u32);

impl BufferHandle {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Effect parameters in the form the kernel consumes them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    /// Odd erosion window, 0 or 1 disables erosion
    pub erode_size: u32,
    pub enhance: bool,
    pub gamma: f32,
}

impl From<&ExtraParams> for KernelParams {
    fn from(params: &ExtraParams) -> Self {
        Self {
            erode_size: params.erode_kernel_size(),
            enhance: params.enhance_frame,
            gamma: params.gamma,
        }
    }
}

/// Buffers and geometry shared by every mask-driven kernel call.
#[derive(Debug, Clone, Copy)]
pub struct MaskedOp {
    pub frame: BufferHandle,
    /// RGBA buffer whose alpha channel carries the mask
    pub mask: BufferHandle,
    pub output: BufferHandle,
    pub frame_size: Size,
    pub mask_size: Size,
    pub params: KernelParams,
}

/// Buffer-oriented ABI of the native numeric kernel.
///
/// All pixel buffers are RGBA8. Operations write their result into the
/// output handle's memory and return nothing else.
pub trait NativeKernel {
    /// Bytes needed for an RGBA buffer of `size`
    fn buffer_size(&self, size: Size) -> usize {
        size.rgba_len()
    }

    fn create_buffer(&mut self, bytes: usize) -> Result<BufferHandle>;

    fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Copy `bytes` into the start of the buffer
    fn write(&mut self, handle: BufferHandle, bytes: &[u8]) -> Result<()>;

    /// Copy the first `len` bytes out of the buffer
    fn read(&self, handle: BufferHandle, len: usize) -> Result<Vec<u8>>;

    /// Resample `src` into `dst`
    fn convert_size(
        &mut self,
        src: BufferHandle,
        src_size: Size,
        dst: BufferHandle,
        dst_size: Size,
    ) -> Result<()>;

    /// Keep the masked foreground, alpha taken from the mask
    fn remove_background(&mut self, op: &MaskedOp) -> Result<()>;

    /// Blend the foreground over `background` (same size as the frame)
    fn replace_background(&mut self, op: &MaskedOp, background: BufferHandle) -> Result<()>;

    /// Blend the foreground over a blurred copy of itself
    fn blur_background(&mut self, op: &MaskedOp, blur_size: u32) -> Result<()>;
}

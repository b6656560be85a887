use super::{BufferHandle, MaskedOp, NativeKernel};
use crate::error::{Result, SegmentationError};
use crate::filters;
use crate::frame::Size;
use image::{imageops, RgbaImage};

/// Pure-Rust implementation of the native kernel ABI.
///
/// Buffers live in a slab standing in for the module's linear memory.
/// Handle 0 is never issued, mirroring a null pointer.
pub struct SoftwareKernel {
    buffers: Vec<Option<Vec<u8>>>,
    free_slots: Vec<usize>,
    used_bytes: usize,
    memory_limit: Option<usize>,
}

impl SoftwareKernel {
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
            free_slots: Vec::new(),
            used_bytes: 0,
            memory_limit: None,
        }
    }

    /// Fail allocations once `bytes` of buffers are live
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    fn slot(handle: BufferHandle) -> Result<usize> {
        match handle.raw() {
            0 => Err(SegmentationError::UnknownHandle(0)),
            raw => Ok(raw as usize - 1),
        }
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&[u8]> {
        let slot = Self::slot(handle)?;
        self.buffers
            .get(slot)
            .and_then(|b| b.as_deref())
            .ok_or(SegmentationError::UnknownHandle(handle.raw()))
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut Vec<u8>> {
        let slot = Self::slot(handle)?;
        self.buffers
            .get_mut(slot)
            .and_then(|b| b.as_mut())
            .ok_or(SegmentationError::UnknownHandle(handle.raw()))
    }

    /// Borrow the first `size` RGBA bytes of a buffer
    fn pixels(&self, handle: BufferHandle, size: Size) -> Result<&[u8]> {
        let buffer = self.buffer(handle)?;
        let len = size.rgba_len();
        buffer.get(..len).ok_or_else(|| {
            SegmentationError::kernel(format!(
                "buffer {} holds {} bytes, {}x{} RGBA needs {}",
                handle.raw(),
                buffer.len(),
                size.width,
                size.height,
                len
            ))
        })
    }

    fn store(&mut self, handle: BufferHandle, pixels: &[u8]) -> Result<()> {
        let buffer = self.buffer_mut(handle)?;
        let dst = buffer.get_mut(..pixels.len()).ok_or_else(|| {
            SegmentationError::kernel(format!(
                "output buffer {} too small for {} bytes",
                handle.raw(),
                pixels.len()
            ))
        })?;
        dst.copy_from_slice(pixels);
        Ok(())
    }

    /// Mask alpha resampled to the frame and eroded, one byte per pixel
    fn frame_alpha(&self, op: &MaskedOp) -> Result<Vec<u8>> {
        let mask = self.pixels(op.mask, op.mask_size)?;
        filters::alpha_plane(mask, op.mask_size, op.frame_size, op.params.erode_size)
            .ok_or_else(|| SegmentationError::kernel("mask plane has wrong length"))
    }

    fn foreground(&self, op: &MaskedOp) -> Result<Vec<u8>> {
        let mut fg = self.pixels(op.frame, op.frame_size)?.to_vec();
        if op.params.enhance {
            filters::enhance_rgba(&mut fg, op.params.gamma);
        }
        Ok(fg)
    }

    /// `fg * a + bg * (1 - a)` per RGB channel, opaque output
    fn blend_over(fg: &[u8], bg: &[u8], alpha: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; fg.len()];
        for (((dst, f), b), &a) in out
            .chunks_exact_mut(4)
            .zip(fg.chunks_exact(4))
            .zip(bg.chunks_exact(4))
            .zip(alpha)
        {
            let a = a as u32;
            for c in 0..3 {
                dst[c] = ((f[c] as u32 * a + b[c] as u32 * (255 - a) + 127) / 255) as u8;
            }
            dst[3] = 255;
        }
        out
    }
}

impl Default for SoftwareKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeKernel for SoftwareKernel {
    fn create_buffer(&mut self, bytes: usize) -> Result<BufferHandle> {
        if bytes == 0 {
            return Err(SegmentationError::kernel("zero-sized buffer requested"));
        }
        if let Some(limit) = self.memory_limit {
            if self.used_bytes + bytes > limit {
                return Err(SegmentationError::kernel(format!(
                    "out of kernel memory: {} live + {} requested > {} limit",
                    self.used_bytes, bytes, limit
                )));
            }
        }

        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.buffers[slot] = Some(vec![0; bytes]);
                slot
            }
            None => {
                self.buffers.push(Some(vec![0; bytes]));
                self.buffers.len() - 1
            }
        };
        self.used_bytes += bytes;
        Ok(BufferHandle::new(slot as u32 + 1))
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        let slot = Self::slot(handle)?;
        let buffer = self
            .buffers
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or(SegmentationError::UnknownHandle(handle.raw()))?;
        self.used_bytes -= buffer.len();
        self.free_slots.push(slot);
        Ok(())
    }

    fn write(&mut self, handle: BufferHandle, bytes: &[u8]) -> Result<()> {
        self.store(handle, bytes)
    }

    fn read(&self, handle: BufferHandle, len: usize) -> Result<Vec<u8>> {
        let buffer = self.buffer(handle)?;
        buffer.get(..len).map(<[u8]>::to_vec).ok_or_else(|| {
            SegmentationError::kernel(format!(
                "read of {} bytes past end of buffer {} ({} bytes)",
                len,
                handle.raw(),
                buffer.len()
            ))
        })
    }

    fn convert_size(
        &mut self,
        src: BufferHandle,
        src_size: Size,
        dst: BufferHandle,
        dst_size: Size,
    ) -> Result<()> {
        let pixels = self.pixels(src, src_size)?.to_vec();
        let image = RgbaImage::from_raw(src_size.width, src_size.height, pixels)
            .ok_or_else(|| SegmentationError::kernel("source buffer has wrong length"))?;
        let resized = imageops::resize(
            &image,
            dst_size.width,
            dst_size.height,
            imageops::FilterType::Triangle,
        );
        self.store(dst, resized.as_raw())
    }

    fn remove_background(&mut self, op: &MaskedOp) -> Result<()> {
        let alpha = self.frame_alpha(op)?;
        let mut out = self.foreground(op)?;
        for (px, &a) in out.chunks_exact_mut(4).zip(&alpha) {
            let a32 = a as u32;
            for c in &mut px[..3] {
                *c = ((*c as u32 * a32 + 127) / 255) as u8;
            }
            px[3] = a;
        }
        self.store(op.output, &out)
    }

    fn replace_background(&mut self, op: &MaskedOp, background: BufferHandle) -> Result<()> {
        let alpha = self.frame_alpha(op)?;
        let fg = self.foreground(op)?;
        let bg = self.pixels(background, op.frame_size)?;
        let out = Self::blend_over(&fg, bg, &alpha);
        self.store(op.output, &out)
    }

    fn blur_background(&mut self, op: &MaskedOp, blur_size: u32) -> Result<()> {
        if blur_size % 2 == 0 {
            return Err(SegmentationError::kernel(format!(
                "blur size must be odd, got {blur_size}"
            )));
        }
        let limit = crate::composite::max_blur_window(op.frame_size);
        if blur_size > limit {
            return Err(SegmentationError::kernel(format!(
                "blur size {blur_size} exceeds {limit} for a {}x{} frame",
                op.frame_size.width, op.frame_size.height
            )));
        }
        let alpha = self.frame_alpha(op)?;
        let fg = self.foreground(op)?;
        let blurred = filters::blur_rgba(self.pixels(op.frame, op.frame_size)?, op.frame_size, blur_size);
        let out = Self::blend_over(&fg, &blurred, &alpha);
        self.store(op.output, &out)
    }
}

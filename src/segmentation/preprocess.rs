use super::types::Mask;
use crate::error::{Result, SegmentationError};
use crate::frame::{ColorSpace, FrameBuffer, Size};
use crate::kernel::NativeModule;
use ndarray::Array4;
use std::borrow::Cow;

/// Convert pixels to the RGBA working format at `dst_size`.
///
/// Same-size RGBA input comes back borrowed without touching the kernel.
/// Otherwise the pixels go through the kernel's resize in a buffer scope
/// that frees both buffers on every path.
pub fn try_normalize<'a>(
    module: &mut NativeModule,
    src: &'a [u8],
    src_space: ColorSpace,
    src_size: Size,
    dst_space: ColorSpace,
    dst_size: Size,
) -> Result<Cow<'a, [u8]>> {
    for space in [src_space, dst_space] {
        if space != ColorSpace::Rgba {
            return Err(SegmentationError::UnsupportedColorSpace(space));
        }
    }
    let expected = src_size.pixels() * src_space.channels() as usize;
    if src.len() != expected {
        return Err(SegmentationError::BufferLength {
            expected,
            actual: src.len(),
        });
    }
    if src_size == dst_size {
        return Ok(Cow::Borrowed(src));
    }

    let _span = tracing::debug_span!("normalize").entered();
    let mut scope = module.scope();
    let input = scope.allocate_with(src_size, src)?;
    let output = scope.allocate(dst_size)?;
    scope
        .kernel()
        .convert_size(input, src_size, output, dst_size)?;
    Ok(Cow::Owned(scope.copy_out(output, dst_size.rgba_len())?))
}

/// [`try_normalize`] for callers that skip the frame on failure.
pub fn normalize<'a>(
    module: &mut NativeModule,
    src: &'a [u8],
    src_space: ColorSpace,
    src_size: Size,
    dst_space: ColorSpace,
    dst_size: Size,
) -> Option<Cow<'a, [u8]>> {
    match try_normalize(module, src, src_space, src_size, dst_space, dst_size) {
        Ok(pixels) => Some(pixels),
        Err(e) => {
            tracing::warn!("Normalization failed: {}", e);
            None
        }
    }
}

/// Resize an RGBA frame to `dst_size`
pub(crate) fn resize_rgba<'a>(
    module: &mut NativeModule,
    frame: &'a [u8],
    src_size: Size,
    dst_size: Size,
) -> Result<Cow<'a, [u8]>> {
    try_normalize(
        module,
        frame,
        ColorSpace::Rgba,
        src_size,
        ColorSpace::Rgba,
        dst_size,
    )
}

/// Prepares frames for a model with a fixed input resolution
pub struct Preprocessor {
    target: Size,
}

impl Preprocessor {
    pub fn new(target: Size) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Size {
        self.target
    }

    /// Write RGB normalized to `[0, 1]` into an interleaved float region
    pub fn fill_rgb(&self, pixels: &[u8], region: &mut [f32]) -> Result<()> {
        let expected = self.target.pixels() * 3;
        if region.len() != expected {
            return Err(SegmentationError::processing(format!(
                "model input region holds {} floats, expected {}",
                region.len(),
                expected
            )));
        }
        for (dst, px) in region.chunks_exact_mut(3).zip(pixels.chunks_exact(4)) {
            dst[0] = px[0] as f32 / 255.0;
            dst[1] = px[1] as f32 / 255.0;
            dst[2] = px[2] as f32 / 255.0;
        }
        Ok(())
    }

    /// Resize an RGBA frame into an NHWC tensor
    ///
    /// Steps:
    /// 1. Resize to the target dimensions through the kernel
    /// 2. Drop alpha and normalize RGB to [0, 1]
    ///
    /// Returns: Array4<f32> with shape [1, height, width, 3]
    pub fn to_tensor(
        &self,
        module: &mut NativeModule,
        frame: &[u8],
        frame_size: Size,
    ) -> Result<Array4<f32>> {
        let resized = resize_rgba(module, frame, frame_size, self.target)?;
        let (width, height) = (self.target.width as usize, self.target.height as usize);
        let mut tensor = Array4::<f32>::zeros((1, height, width, 3));

        for (i, px) in resized.chunks_exact(4).enumerate() {
            let (y, x) = (i / width, i % width);
            tensor[[0, y, x, 0]] = px[0] as f32 / 255.0;
            tensor[[0, y, x, 1]] = px[1] as f32 / 255.0;
            tensor[[0, y, x, 2]] = px[2] as f32 / 255.0;
        }

        Ok(tensor)
    }
}

/// Pack a `[0, 1]` probability plane into an RGBA mask.
///
/// Alpha always carries the probability. Outside remove-background mode
/// the RGB channels repeat it so the mask renders as grayscale.
pub fn mask_from_plane(plane: &[f32], size: Size, remove_mode: bool) -> Result<Mask> {
    if plane.len() != size.pixels() {
        return Err(SegmentationError::BufferLength {
            expected: size.pixels(),
            actual: plane.len(),
        });
    }
    let mut data = vec![0u8; size.rgba_len()];
    for (px, &p) in data.chunks_exact_mut(4).zip(plane) {
        let value = (p * 255.0).round().clamp(0.0, 255.0) as u8;
        if !remove_mode {
            px[0] = value;
            px[1] = value;
            px[2] = value;
        }
        px[3] = value;
    }
    FrameBuffer::from_rgba(size.width, size.height, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::SoftwareKernel;

    fn module() -> NativeModule {
        NativeModule::new(Box::new(SoftwareKernel::new()))
    }

    #[test]
    fn same_size_rgba_is_identity_without_kernel() {
        let mut module = module();
        let size = Size::new(3, 2);
        let pixels: Vec<u8> = (0..size.rgba_len() as u8).collect();
        let out = normalize(
            &mut module,
            &pixels,
            ColorSpace::Rgba,
            size,
            ColorSpace::Rgba,
            size,
        )
        .unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, pixels.as_slice());
        assert_eq!(module.stats().allocations, 0);
    }

    #[test]
    fn resize_allocates_and_frees_two_buffers() {
        let mut module = module();
        let pixels = [50u8, 60, 70, 255].repeat(16);
        let out = normalize(
            &mut module,
            &pixels,
            ColorSpace::Rgba,
            Size::new(4, 4),
            ColorSpace::Rgba,
            Size::new(8, 2),
        )
        .unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(module.stats().allocations, 2);
        assert_eq!(module.stats().live(), 0);
    }

    #[test]
    fn non_rgba_colorspace_is_rejected() {
        let mut module = module();
        let pixels = vec![0u8; 12];
        let err = try_normalize(
            &mut module,
            &pixels,
            ColorSpace::Rgb,
            Size::new(2, 2),
            ColorSpace::Rgba,
            Size::new(2, 2),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SegmentationError::UnsupportedColorSpace(ColorSpace::Rgb)
        ));
    }

    #[test]
    fn allocation_failure_yields_none_and_no_leak() {
        let mut module = NativeModule::new(Box::new(SoftwareKernel::new().with_memory_limit(70)));
        let pixels = [1u8, 2, 3, 4].repeat(16);
        let out = normalize(
            &mut module,
            &pixels,
            ColorSpace::Rgba,
            Size::new(4, 4),
            ColorSpace::Rgba,
            Size::new(4, 2),
        );
        assert!(out.is_none());
        assert_eq!(module.stats().allocations, 1);
        assert_eq!(module.stats().live(), 0);
    }

    #[test]
    fn tensor_is_nhwc_in_unit_range() {
        let mut module = module();
        let pixels = [255u8, 0, 51, 255].repeat(4);
        let tensor = Preprocessor::new(Size::new(2, 2))
            .to_tensor(&mut module, &pixels, Size::new(2, 2))
            .unwrap();
        assert_eq!(tensor.shape(), &[1, 2, 2, 3]);
        assert_eq!(tensor[[0, 1, 1, 0]], 1.0);
        assert_eq!(tensor[[0, 1, 1, 1]], 0.0);
        assert!((tensor[[0, 1, 1, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn fill_rgb_checks_region_length() {
        let pre = Preprocessor::new(Size::new(2, 1));
        let mut region = vec![0.0; 6];
        pre.fill_rgb(&[255, 0, 0, 255, 0, 255, 0, 255], &mut region)
            .unwrap();
        assert_eq!(region, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert!(pre.fill_rgb(&[0; 8], &mut [0.0; 5]).is_err());
    }

    #[test]
    fn mask_from_plane_hides_rgb_in_remove_mode() {
        let mask = mask_from_plane(&[1.0, 0.5], Size::new(2, 1), true).unwrap();
        assert_eq!(mask.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(mask.pixel(1, 0), [0, 0, 0, 128]);

        let mask = mask_from_plane(&[1.0, 0.0], Size::new(2, 1), false).unwrap();
        assert_eq!(mask.pixel(0, 0), [255, 255, 255, 255]);
        assert_eq!(mask.pixel(1, 0), [0, 0, 0, 0]);
    }
}

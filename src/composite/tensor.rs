use super::Blend;
use crate::config::ExtraParams;
use crate::error::{Result, SegmentationError};
use crate::filters;
use crate::frame::Size;
use crate::segmentation::Mask;
use image::{imageops, Rgba32FImage};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};

/// Scale on the blur composite so bright edges stay below the clip point
const BLUR_HEADROOM: f32 = 0.96;

/// `fg * mask + bg * (1 - mask)` per channel on `[0, 1]` tensors.
///
/// `fg` and `bg` are `[h, w, channels]`, `mask` is `[h, w]`.
pub fn blend(fg: ArrayView3<f32>, bg: ArrayView3<f32>, mask: ArrayView2<f32>) -> Result<Array3<f32>> {
    let (h, w, _) = fg.dim();
    if fg.dim() != bg.dim() || mask.dim() != (h, w) {
        return Err(SegmentationError::processing(format!(
            "blend shapes differ: fg {:?}, bg {:?}, mask {:?}",
            fg.dim(),
            bg.dim(),
            mask.dim()
        )));
    }
    let m = mask.insert_axis(Axis(2));
    let inv = m.mapv(|v| 1.0 - v);
    Ok(&fg * &m + &bg * &inv)
}

/// Every intermediate tensor is owned by this call and dropped on return.
pub(super) fn composite(
    blend_op: &Blend<'_>,
    frame: &[u8],
    size: Size,
    mask: &Mask,
    params: &ExtraParams,
) -> Result<Vec<u8>> {
    let alpha = mask_tensor(mask, size, params.erode_kernel_size())?;
    let mut fg = to_tensor(frame, size)?;
    if params.enhance_frame {
        let inv_gamma = 1.0 / params.gamma;
        fg.slice_mut(s![.., .., ..3])
            .mapv_inplace(|v| v.powf(inv_gamma));
    }

    let out = match *blend_op {
        Blend::Remove => {
            let _span = tracing::debug_span!("composite_remove").entered();
            let transparent = Array3::<f32>::zeros(fg.raw_dim());
            let mut out = blend(fg.view(), transparent.view(), alpha.view())?;
            out.slice_mut(s![.., .., 3]).assign(&alpha);
            out
        }
        Blend::Blur { blur_size } => {
            let _span = tracing::debug_span!("composite_blur").entered();
            let background = blurred_background(&fg, size, blur_size)?;
            let mut out = blend(fg.view(), background.view(), alpha.view())?;
            out.mapv_inplace(|v| v * BLUR_HEADROOM);
            out.slice_mut(s![.., .., 3]).fill(1.0);
            out
        }
        Blend::Replace { background } => {
            let _span = tracing::debug_span!("composite_replace").entered();
            let background = to_tensor(background, size)?;
            let mut out = blend(fg.view(), background.view(), alpha.view())?;
            out.slice_mut(s![.., .., 3]).fill(1.0);
            out
        }
    };

    Ok(to_pixels(&out))
}

fn to_tensor(pixels: &[u8], size: Size) -> Result<Array3<f32>> {
    let values = pixels.iter().map(|&v| v as f32 / 255.0).collect();
    Ok(Array3::from_shape_vec(
        (size.height as usize, size.width as usize, 4),
        values,
    )?)
}

fn to_pixels(tensor: &Array3<f32>) -> Vec<u8> {
    tensor
        .iter()
        .map(|&v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect()
}

/// Mask alpha at frame resolution as `[h, w]` in `[0, 1]`
fn mask_tensor(mask: &Mask, size: Size, erode_size: u32) -> Result<Array2<f32>> {
    let plane = filters::alpha_plane(mask.data(), mask.size(), size, erode_size)
        .ok_or_else(|| SegmentationError::processing("mask is not an RGBA buffer"))?;
    let values = plane.iter().map(|&v| v as f32 / 255.0).collect();
    Ok(Array2::from_shape_vec(
        (size.height as usize, size.width as usize),
        values,
    )?)
}

/// Foreground blurred at half resolution and scaled back up
fn blurred_background(fg: &Array3<f32>, size: Size, blur_size: u32) -> Result<Array3<f32>> {
    let reduced_size = Size::new((size.width / 2).max(1), (size.height / 2).max(1));
    let reduced = resize_tensor(fg, size, reduced_size)?;
    let blurred = depthwise_blur(&reduced, &filters::gaussian_weights(blur_size));
    resize_tensor(&blurred, reduced_size, size)
}

fn resize_tensor(tensor: &Array3<f32>, from: Size, to: Size) -> Result<Array3<f32>> {
    let image = Rgba32FImage::from_raw(from.width, from.height, tensor.iter().copied().collect())
        .ok_or_else(|| SegmentationError::processing("tensor does not match image size"))?;
    let resized = imageops::resize(&image, to.width, to.height, imageops::FilterType::Triangle);
    Ok(Array3::from_shape_vec(
        (to.height as usize, to.width as usize, 4),
        resized.into_raw(),
    )?)
}

/// Separable per-channel convolution, clamping at the edges
fn depthwise_blur(input: &Array3<f32>, weights: &[f32]) -> Array3<f32> {
    let (h, w, _) = input.dim();
    let radius = (weights.len() / 2) as isize;

    let mut horizontal = Array3::<f32>::zeros(input.raw_dim());
    for ((y, x, c), dst) in horizontal.indexed_iter_mut() {
        let mut acc = 0.0;
        for (k, &kw) in weights.iter().enumerate() {
            let sx = (x as isize + k as isize - radius).clamp(0, w as isize - 1) as usize;
            acc += kw * input[[y, sx, c]];
        }
        *dst = acc;
    }

    let mut out = Array3::<f32>::zeros(input.raw_dim());
    for ((y, x, c), dst) in out.indexed_iter_mut() {
        let mut acc = 0.0;
        for (k, &kw) in weights.iter().enumerate() {
            let sy = (y as isize + k as isize - radius).clamp(0, h as isize - 1) as usize;
            acc += kw * horizontal[[sy, x, c]];
        }
        *dst = acc;
    }
    out
}

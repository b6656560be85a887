//! CPU pixel filters shared by the software kernel and the tensor compositor.

use crate::frame::Size;
use image::{imageops, GrayImage};

/// Normalized 1-D Gaussian weights for an odd window of `size` taps.
///
/// Sigma follows the usual derivation from the window size,
/// `0.3 * ((size - 1) / 2 - 1) + 0.8`.
pub(crate) fn gaussian_weights(size: u32) -> Vec<f32> {
    let size = size.max(1) | 1;
    let radius = (size / 2) as i32;
    let sigma = (0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8).max(0.1);
    let denom = 2.0 * sigma * sigma;

    let mut weights: Vec<f32> = (-radius..=radius)
        .map(|i| {
            let x = i as f32;
            (-(x * x) / denom).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Separable Gaussian blur over all four channels of an RGBA buffer,
/// clamping at the edges.
pub(crate) fn blur_rgba(src: &[u8], size: Size, blur_size: u32) -> Vec<u8> {
    let weights = gaussian_weights(blur_size);
    if weights.len() == 1 {
        return src.to_vec();
    }
    let (w, h) = (size.width as usize, size.height as usize);
    let radius = weights.len() / 2;
    let mut tmp = vec![0u8; src.len()];
    let mut out = vec![0u8; src.len()];

    for y in 0..h {
        for x in 0..w {
            let mut acc = [0f32; 4];
            for (ki, &kw) in weights.iter().enumerate() {
                let sx = clamp_tap(x, ki, radius, w);
                let idx = (y * w + sx) * 4;
                for c in 0..4 {
                    acc[c] += kw * src[idx + c] as f32;
                }
            }
            let idx = (y * w + x) * 4;
            for c in 0..4 {
                tmp[idx + c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    for y in 0..h {
        for x in 0..w {
            let mut acc = [0f32; 4];
            for (ki, &kw) in weights.iter().enumerate() {
                let sy = clamp_tap(y, ki, radius, h);
                let idx = (sy * w + x) * 4;
                for c in 0..4 {
                    acc[c] += kw * tmp[idx + c] as f32;
                }
            }
            let idx = (y * w + x) * 4;
            for c in 0..4 {
                out[idx + c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Source coordinate of tap `k` around `pos`, clamped to `[0, len)`
fn clamp_tap(pos: usize, k: usize, radius: usize, len: usize) -> usize {
    (pos + k).saturating_sub(radius).min(len - 1)
}

/// Alpha channel of an RGBA mask, resampled to `target` and eroded.
///
/// Returns `None` when `mask` does not hold `mask_size` RGBA pixels.
pub(crate) fn alpha_plane(
    mask: &[u8],
    mask_size: Size,
    target: Size,
    erode_size: u32,
) -> Option<Vec<u8>> {
    if mask.len() != mask_size.rgba_len() {
        return None;
    }
    let plane: Vec<u8> = mask.chunks_exact(4).map(|px| px[3]).collect();

    let mut alpha = if mask_size == target {
        plane
    } else {
        let gray = GrayImage::from_raw(mask_size.width, mask_size.height, plane)?;
        imageops::resize(
            &gray,
            target.width,
            target.height,
            imageops::FilterType::Triangle,
        )
        .into_raw()
    };

    erode_plane(&mut alpha, target, erode_size);
    Some(alpha)
}

/// Min filter over a single-channel plane with an odd `window`.
pub(crate) fn erode_plane(plane: &mut [u8], size: Size, window: u32) {
    if window <= 1 {
        return;
    }
    let radius = (window / 2) as usize;
    let (w, h) = (size.width as usize, size.height as usize);
    let mut tmp = vec![0u8; plane.len()];

    for y in 0..h {
        let row = y * w;
        for x in 0..w {
            let lo = x.saturating_sub(radius);
            let hi = x.saturating_add(radius).min(w - 1);
            tmp[row + x] = plane[row + lo..=row + hi]
                .iter()
                .copied()
                .min()
                .unwrap_or(0);
        }
    }

    for y in 0..h {
        let lo = y.saturating_sub(radius);
        let hi = y.saturating_add(radius).min(h - 1);
        for x in 0..w {
            let mut min = u8::MAX;
            for sy in lo..=hi {
                min = min.min(tmp[sy * w + x]);
            }
            plane[y * w + x] = min;
        }
    }
}

/// Lookup table for `255 * (v / 255) ^ (1 / gamma)`
pub(crate) fn gamma_lut(gamma: f32) -> [u8; 256] {
    let inv = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        *slot = (255.0 * (v as f32 / 255.0).powf(inv)).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Apply a gamma curve to the RGB channels of an RGBA buffer
pub(crate) fn enhance_rgba(pixels: &mut [u8], gamma: f32) {
    let lut = gamma_lut(gamma);
    for px in pixels.chunks_exact_mut(4) {
        for c in &mut px[..3] {
            *c = lut[*c as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_weights_sum_to_one_and_peak_in_middle() {
        let weights = gaussian_weights(13);
        assert_eq!(weights.len(), 13);
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(weights[6] > weights[5]);
        assert!((weights[0] - weights[12]).abs() < 1e-7);
    }

    #[test]
    fn even_window_is_widened() {
        assert_eq!(gaussian_weights(4).len(), 5);
        assert_eq!(gaussian_weights(0).len(), 1);
    }

    #[test]
    fn blur_constant_image_is_identity() {
        let size = Size::new(5, 4);
        let src = [10u8, 20, 30, 255].repeat(size.pixels());
        assert_eq!(blur_rgba(&src, size, 7), src);
    }

    #[test]
    fn taps_clamp_to_the_edges() {
        assert_eq!(clamp_tap(0, 0, 3, 10), 0);
        assert_eq!(clamp_tap(1, 6, 3, 10), 4);
        assert_eq!(clamp_tap(9, 6, 3, 10), 9);
    }

    #[test]
    fn blur_spreads_single_pixel() {
        let size = Size::new(5, 5);
        let mut src = vec![0u8; size.rgba_len()];
        let center = (2 * 5 + 2) * 4;
        src[center..center + 4].copy_from_slice(&[255, 255, 255, 255]);
        let out = blur_rgba(&src, size, 3);
        assert!(out[center] < 255);
        assert!(out[center + 4] > 0);
    }

    #[test]
    fn alpha_plane_upsamples_constant_mask() {
        let mask = [0u8, 0, 0, 200].repeat(4);
        let alpha = alpha_plane(&mask, Size::new(2, 2), Size::new(6, 4), 0).unwrap();
        assert_eq!(alpha.len(), 24);
        assert!(alpha.iter().all(|&a| a == 200));
        assert!(alpha_plane(&mask[..12], Size::new(2, 2), Size::new(2, 2), 0).is_none());
    }

    #[test]
    fn erosion_shrinks_foreground() {
        let size = Size::new(5, 1);
        let mut plane = vec![0, 255, 255, 255, 0];
        erode_plane(&mut plane, size, 3);
        assert_eq!(plane, vec![0, 0, 255, 0, 0]);
    }

    #[test]
    fn unit_gamma_is_identity() {
        let mut px = vec![0, 64, 128, 200, 255, 1, 2, 3];
        let before = px.clone();
        enhance_rgba(&mut px, 1.0);
        assert_eq!(px, before);
    }

    #[test]
    fn gamma_above_one_brightens_midtones_only() {
        let lut = gamma_lut(2.0);
        assert_eq!(lut[0], 0);
        assert_eq!(lut[255], 255);
        assert!(lut[64] > 64);
    }
}

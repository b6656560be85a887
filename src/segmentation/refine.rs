use ndarray::Array2;

/// 1-D Gaussian taps (sigma 1.5); the 7x7 kernel is their outer product
const GAUSSIAN_TAPS: [f32; 7] = [
    0.036_632_8,
    0.111_280_8,
    0.216_745_3,
    0.270_682_1,
    0.216_745_3,
    0.111_280_8,
    0.036_632_8,
];

const EDGE_LOW: f32 = 0.3;
const EDGE_HIGH: f32 = 0.5;

/// Smoothstep with edges (0.3, 0.5)
pub fn smoothstep(x: f32) -> f32 {
    let z = ((x - EDGE_LOW) / (EDGE_HIGH - EDGE_LOW)).clamp(0.0, 1.0);
    z * z * (3.0 - 2.0 * z)
}

fn gaussian_kernel() -> [[f32; 7]; 7] {
    let mut kernel = [[0.0; 7]; 7];
    for (i, row) in kernel.iter_mut().enumerate() {
        for (j, w) in row.iter_mut().enumerate() {
            *w = GAUSSIAN_TAPS[i] * GAUSSIAN_TAPS[j];
        }
    }
    kernel
}

/// 2-D convolution with the 7x7 kernel, zero "same" padding
fn convolve_same(input: &Array2<f32>) -> Array2<f32> {
    let kernel = gaussian_kernel();
    let (h, w) = input.dim();
    let radius = 3isize;
    let mut out = Array2::<f32>::zeros((h, w));

    for ((y, x), dst) in out.indexed_iter_mut() {
        let mut acc = 0.0;
        for (ky, row) in kernel.iter().enumerate() {
            let sy = y as isize + ky as isize - radius;
            if sy < 0 || sy >= h as isize {
                continue;
            }
            for (kx, &weight) in row.iter().enumerate() {
                let sx = x as isize + kx as isize - radius;
                if sx < 0 || sx >= w as isize {
                    continue;
                }
                acc += weight * input[[sy as usize, sx as usize]];
            }
        }
        *dst = acc;
    }
    out
}

/// Turn a blocky binary mask into an edge-aware alpha in `[0, 1]`.
///
/// Blur, stretch to the full range, then pull the soft edge back toward
/// binary with the smoothstep curve.
pub fn refine(raw: &Array2<f32>) -> Array2<f32> {
    let _span = tracing::debug_span!("refine_mask").entered();
    let blurred = convolve_same(raw);

    let (min, max) = blurred
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = (max - min).max(f32::EPSILON);

    blurred.mapv(|v| smoothstep((v - min) / range))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothstep_edges() {
        for x in [-1.0, 0.0, 0.1, 0.3] {
            assert_eq!(smoothstep(x), 0.0);
        }
        for x in [0.5, 0.7, 1.0, 4.0] {
            assert_eq!(smoothstep(x), 1.0);
        }
        assert!((smoothstep(0.4) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn smoothstep_is_monotonic_between_edges() {
        let mut prev = smoothstep(0.3);
        for i in 1..=200 {
            let x = 0.3 + 0.2 * i as f32 / 200.0;
            let y = smoothstep(x);
            assert!(y >= prev, "decreased at {x}");
            prev = y;
        }
    }

    #[test]
    fn kernel_is_normalized() {
        let sum: f32 = gaussian_kernel().iter().flatten().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn refined_alpha_is_in_unit_range_and_keeps_the_subject() {
        let mut raw = Array2::<f32>::zeros((24, 24));
        for y in 6..18 {
            for x in 6..18 {
                raw[[y, x]] = 1.0;
            }
        }
        let alpha = refine(&raw);
        assert!(alpha.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(alpha[[12, 12]], 1.0);
        assert_eq!(alpha[[0, 0]], 0.0);
        assert_eq!(alpha[[23, 23]], 0.0);
    }

    #[test]
    fn empty_mask_stays_empty() {
        let raw = Array2::<f32>::zeros((8, 8));
        assert!(refine(&raw).iter().all(|&v| v == 0.0));
    }
}

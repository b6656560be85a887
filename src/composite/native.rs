use super::Blend;
use crate::config::ExtraParams;
use crate::error::Result;
use crate::frame::Size;
use crate::kernel::{KernelParams, MaskedOp, NativeModule};
use crate::segmentation::Mask;

/// Run one effect through the native kernel.
///
/// Frame, mask, output and (for replace) background buffers are held by a
/// single scope and released before this returns, whatever the outcome.
pub(super) fn composite(
    module: &mut NativeModule,
    blend: &Blend<'_>,
    frame: &[u8],
    size: Size,
    mask: &Mask,
    params: &ExtraParams,
) -> Result<Vec<u8>> {
    let mut scope = module.scope();
    let op = MaskedOp {
        frame: scope.allocate_with(size, frame)?,
        mask: scope.allocate_with(mask.size(), mask.data())?,
        output: scope.allocate(size)?,
        frame_size: size,
        mask_size: mask.size(),
        params: KernelParams::from(params),
    };

    match *blend {
        Blend::Remove => {
            let _span = tracing::debug_span!("composite_remove").entered();
            scope.kernel().remove_background(&op)?;
        }
        Blend::Blur { blur_size } => {
            let _span = tracing::debug_span!("composite_blur").entered();
            scope.kernel().blur_background(&op, blur_size)?;
        }
        Blend::Replace { background } => {
            let _span = tracing::debug_span!("composite_replace").entered();
            let background = scope.allocate_with(size, background)?;
            scope.kernel().replace_background(&op, background)?;
        }
    }

    let mut out = scope.copy_out(op.output, size.rgba_len())?;
    if let Blend::Remove = blend {
        clear_black_alpha(&mut out);
    }
    Ok(out)
}

/// Zero alpha wherever RGB is exactly black.
///
/// The remove kernel can leave alpha at 255 on fully transparent pixels,
/// which encoders then show as opaque black.
pub fn clear_black_alpha(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        if px[0] == 0 && px[1] == 0 && px[2] == 0 {
            px[3] = 0;
        }
    }
}

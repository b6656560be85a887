use super::preprocess::{mask_from_plane, resize_rgba, Preprocessor};
use super::registry::ModelLease;
use super::types::Mask;
use crate::error::{Result, SegmentationError};
use crate::frame::Size;
use crate::kernel::NativeModule;

/// Input resolution of the fixed-size native model
pub const NATIVE_INPUT_SIZE: Size = Size::new(160, 96);

/// Person probability from a (background, person) logit pair.
///
/// Shifts both logits by their max before exponentiating so large
/// logits cannot overflow.
pub fn person_probability(background: f32, person: f32) -> f32 {
    let shift = background.max(person);
    let background_exp = (background - shift).exp();
    let person_exp = (person - shift).exp();
    person_exp / (background_exp + person_exp)
}

/// Fixed-size inference path.
///
/// The model runs at its own small resolution and produces a smooth
/// probability mask that needs no refinement.
pub struct NativeEngine {
    model: ModelLease,
    preprocessor: Preprocessor,
}

impl NativeEngine {
    pub fn new(model: ModelLease) -> Result<Self> {
        let input_size = model.borrow_mut()?.as_fixed_mut()?.input_size();
        tracing::debug!(
            "Native engine input {}x{}",
            input_size.width,
            input_size.height
        );
        Ok(Self {
            model,
            preprocessor: Preprocessor::new(input_size),
        })
    }

    pub fn model(&self) -> &ModelLease {
        &self.model
    }

    pub fn input_size(&self) -> Size {
        self.preprocessor.target()
    }

    /// Segment one RGBA frame, returning the mask at model resolution
    pub fn infer(
        &mut self,
        module: &mut NativeModule,
        frame: &[u8],
        frame_size: Size,
        remove_mode: bool,
    ) -> Result<Mask> {
        let _span = tracing::debug_span!("native_inference").entered();
        let size = self.preprocessor.target();
        let resized = resize_rgba(module, frame, frame_size, size)?;

        let mut guard = self.model.borrow_mut()?;
        let model = guard.as_fixed_mut()?;
        self.preprocessor.fill_rgb(&resized, model.input_mut())?;
        model.invoke()?;

        let logits = model.output();
        if logits.len() != size.pixels() * 2 {
            return Err(SegmentationError::processing(format!(
                "native model produced {} logits, expected {}",
                logits.len(),
                size.pixels() * 2
            )));
        }
        let probabilities: Vec<f32> = logits
            .chunks_exact(2)
            .map(|pair| person_probability(pair[0], pair[1]))
            .collect();

        mask_from_plane(&probabilities, size, remove_mode)
    }
}

use super::preprocess::Preprocessor;
use super::registry::ModelLease;
use crate::error::{Result, SegmentationError};
use crate::frame::Size;
use crate::kernel::NativeModule;
use ndarray::{Array2, Array4, Axis};

/// Input resolution of the multi-class graph model
pub const GRAPH_INPUT_SIZE: Size = Size::new(192, 192);

/// Classes counted as the person: 1 and 2, and everything above 3
pub fn is_foreground_class(class: usize) -> bool {
    matches!(class, 1 | 2) || class > 3
}

/// Argmax over the class axis of `[1, h, w, classes]` scores, mapped to a
/// 0/1 foreground plane. Ties go to the lower class index.
pub fn foreground_mask(scores: &Array4<f32>) -> Result<Array2<f32>> {
    let shape = scores.shape();
    if shape[0] != 1 || shape[3] == 0 {
        return Err(SegmentationError::processing(format!(
            "graph model output has shape {shape:?}, expected [1, h, w, classes]"
        )));
    }

    let plane = scores.index_axis(Axis(0), 0);
    let mask = plane.map_axis(Axis(2), |classes| {
        let mut best = 0;
        for (class, &score) in classes.iter().enumerate() {
            if score > classes[best] {
                best = class;
            }
        }
        if is_foreground_class(best) {
            1.0
        } else {
            0.0
        }
    });
    Ok(mask)
}

/// Tensor-graph inference path producing a binary mask.
pub struct GraphEngine {
    model: ModelLease,
    preprocessor: Preprocessor,
}

impl GraphEngine {
    pub fn new(model: ModelLease) -> Result<Self> {
        let input_size = model.borrow_mut()?.as_graph_mut()?.input_size();
        tracing::debug!(
            "Graph engine input {}x{}",
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

    pub fn infer(
        &mut self,
        module: &mut NativeModule,
        frame: &[u8],
        frame_size: Size,
    ) -> Result<Array2<f32>> {
        let _span = tracing::debug_span!("graph_inference").entered();
        let input = self.preprocessor.to_tensor(module, frame, frame_size)?;

        let scores = {
            let mut guard = self.model.borrow_mut()?;
            let model = guard.as_graph_mut()?;
            model.run(input.view())?
        };

        let mask = foreground_mask(&scores)?;
        let size = self.preprocessor.target();
        if mask.dim() != (size.height as usize, size.width as usize) {
            return Err(SegmentationError::processing(format!(
                "graph model output is {:?}, expected {}x{}",
                mask.dim(),
                size.width,
                size.height
            )));
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreground_classes() {
        let fg: Vec<usize> = (0..7).filter(|&c| is_foreground_class(c)).collect();
        assert_eq!(fg, vec![1, 2, 4, 5, 6]);
    }

    #[test]
    fn argmax_maps_each_pixel() {
        // 1x2 image, 5 classes: pixel 0 is class 3 (background), pixel 1 is class 4
        let scores = Array4::from_shape_vec(
            (1, 1, 2, 5),
            vec![0.1, 0.0, 0.2, 0.9, 0.3, 0.0, 0.1, 0.2, 0.3, 0.8],
        )
        .unwrap();
        let mask = foreground_mask(&scores).unwrap();
        assert_eq!(mask.dim(), (1, 2));
        assert_eq!(mask[[0, 0]], 0.0);
        assert_eq!(mask[[0, 1]], 1.0);
    }

    #[test]
    fn ties_resolve_to_lowest_class() {
        let scores = Array4::from_shape_vec((1, 1, 1, 3), vec![0.5, 0.5, 0.5]).unwrap();
        assert_eq!(foreground_mask(&scores).unwrap()[[0, 0]], 0.0);
    }

    #[test]
    fn batched_output_is_rejected() {
        let scores = Array4::<f32>::zeros((2, 1, 1, 3));
        assert!(foreground_mask(&scores).is_err());
    }
}

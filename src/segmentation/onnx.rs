use super::graph::GRAPH_INPUT_SIZE;
use super::native::NATIVE_INPUT_SIZE;
use super::types::{FixedSizeModel, GraphModel, ModelLoader};
use crate::config::ModelSource;
use crate::error::{Result, SegmentationError};
use crate::frame::Size;
use anyhow::Context;
use ndarray::{Array4, ArrayView4};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;

/// Builds ONNX Runtime sessions for both model kinds.
///
/// # Default Configuration
/// - Graph optimization level 3
/// - 4 intra-op threads
pub struct OnnxModelLoader {
    intra_threads: usize,
}

impl OnnxModelLoader {
    pub fn new() -> Self {
        Self { intra_threads: 4 }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self
    }

    fn builder(&self) -> ort::Result<SessionBuilder> {
        Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)
    }

    fn session(&self, source: &ModelSource) -> anyhow::Result<Session> {
        let session = match source {
            ModelSource::Path(path) => self
                .builder()?
                .commit_from_file(path)
                .with_context(|| format!("Failed to load model from {}", path.display()))?,
            ModelSource::Bytes(bytes) => self
                .builder()?
                .commit_from_memory(bytes)
                .context("Failed to load model from memory")?,
            ModelSource::Url(url) => {
                anyhow::bail!("remote model {url} must be fetched by the host and passed as bytes")
            }
        };
        Ok(session)
    }

    fn load(&self, source: &ModelSource) -> Result<Session> {
        self.session(source)
            .map_err(|e| SegmentationError::ModelLoad(format!("{e:#}")))
    }
}

impl Default for OnnxModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load_graph(&self, source: &ModelSource) -> Result<Box<dyn GraphModel>> {
        let session = self.load(source)?;
        tracing::info!("Graph model loaded from {}", source);
        Ok(Box::new(OnnxGraphModel::new(session, GRAPH_INPUT_SIZE)))
    }

    fn load_fixed(&self, source: &ModelSource) -> Result<Box<dyn FixedSizeModel>> {
        let session = self.load(source)?;
        tracing::info!("Fixed-size model loaded from {}", source);
        Ok(Box::new(OnnxFixedSizeModel::new(session, NATIVE_INPUT_SIZE)))
    }
}

/// Run an NHWC float input through `session` and return its first output
/// as a flat vector plus dimensions.
fn run_first_output(
    session: &mut Session,
    shape: [usize; 4],
    data: Vec<f32>,
) -> Result<(Vec<usize>, Vec<f32>)> {
    let input = Tensor::from_array((shape, data))?;
    let outputs = session.run(ort::inputs![input])?;
    let (out_shape, out_data) = outputs[0].try_extract_tensor::<f32>()?;
    let dims = out_shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok((dims, out_data.to_vec()))
}

/// Multi-class segmentation graph on ONNX Runtime
pub struct OnnxGraphModel {
    session: Session,
    input_size: Size,
}

impl OnnxGraphModel {
    pub fn new(session: Session, input_size: Size) -> Self {
        Self {
            session,
            input_size,
        }
    }
}

impl GraphModel for OnnxGraphModel {
    fn input_size(&self) -> Size {
        self.input_size
    }

    fn run(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        let shape = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();
        let (dims, scores) =
            run_first_output(&mut self.session, [shape.0, shape.1, shape.2, shape.3], data)?;

        // Scores are expected as [1, H, W, classes]
        if dims.len() != 4 {
            return Err(SegmentationError::processing(format!(
                "graph model output has rank {}, expected 4",
                dims.len()
            )));
        }
        Ok(Array4::from_shape_vec(
            (dims[0], dims[1], dims[2], dims[3]),
            scores,
        )?)
    }
}

/// Two-class fixed-size model on ONNX Runtime.
///
/// Keeps its own input and output regions so callers can fill the input
/// in place between invocations.
pub struct OnnxFixedSizeModel {
    session: Session,
    input_size: Size,
    input: Vec<f32>,
    output: Vec<f32>,
}

impl OnnxFixedSizeModel {
    pub fn new(session: Session, input_size: Size) -> Self {
        let pixels = input_size.pixels();
        Self {
            session,
            input_size,
            input: vec![0.0; pixels * 3],
            output: vec![0.0; pixels * 2],
        }
    }
}

impl FixedSizeModel for OnnxFixedSizeModel {
    fn input_size(&self) -> Size {
        self.input_size
    }

    fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    fn invoke(&mut self) -> Result<()> {
        let shape = [
            1,
            self.input_size.height as usize,
            self.input_size.width as usize,
            3,
        ];
        let (_, logits) = run_first_output(&mut self.session, shape, self.input.clone())?;

        if logits.len() != self.output.len() {
            return Err(SegmentationError::processing(format!(
                "fixed-size model produced {} values, expected {}",
                logits.len(),
                self.output.len()
            )));
        }
        self.output = logits;
        Ok(())
    }

    fn output(&self) -> &[f32] {
        &self.output
    }
}

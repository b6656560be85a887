#![allow(dead_code)]

use camola_seg::kernel::{BufferHandle, MaskedOp};
use camola_seg::segmentation::{
    FixedSizeModel, GraphModel, ModelLoader, GRAPH_INPUT_SIZE, NATIVE_INPUT_SIZE,
};
use camola_seg::{
    Backend, FrameBuffer, ModelSource, NativeKernel, Result, Runtime, SegmentationError,
    SessionOptions, SetupInfo, Size, SoftwareKernel,
};
use ndarray::{Array4, ArrayView4};
use std::cell::Cell;
use std::rc::Rc;

pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];

/// Graph model that scores one class highest everywhere
pub struct ConstGraph {
    pub class: usize,
    pub classes: usize,
}

impl GraphModel for ConstGraph {
    fn input_size(&self) -> Size {
        GRAPH_INPUT_SIZE
    }

    fn run(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (n, h, w, _) = input.dim();
        let class = self.class;
        Ok(Array4::from_shape_fn((n, h, w, self.classes), |(_, _, _, c)| {
            if c == class {
                4.0
            } else {
                -4.0
            }
        }))
    }
}

/// Fixed-size model that emits the same logit pair for every pixel
pub struct ConstFixed {
    logits: [f32; 2],
    input: Vec<f32>,
    output: Vec<f32>,
}

impl ConstFixed {
    pub fn new(background: f32, person: f32) -> Self {
        let pixels = NATIVE_INPUT_SIZE.pixels();
        Self {
            logits: [background, person],
            input: vec![0.0; pixels * 3],
            output: vec![0.0; pixels * 2],
        }
    }
}

impl FixedSizeModel for ConstFixed {
    fn input_size(&self) -> Size {
        NATIVE_INPUT_SIZE
    }

    fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    fn invoke(&mut self) -> Result<()> {
        for pair in self.output.chunks_exact_mut(2) {
            pair.copy_from_slice(&self.logits);
        }
        Ok(())
    }

    fn output(&self) -> &[f32] {
        &self.output
    }
}

/// Loader handing out constant models and counting how often it ran
pub struct CountingLoader {
    pub class: usize,
    pub logits: [f32; 2],
    pub fail: bool,
    loads: Rc<Cell<u32>>,
}

impl CountingLoader {
    /// Everything is foreground
    pub fn person() -> Self {
        Self {
            class: 1,
            logits: [-4.0, 4.0],
            fail: false,
            loads: Rc::new(Cell::new(0)),
        }
    }

    /// Everything is background
    pub fn empty() -> Self {
        Self {
            class: 0,
            logits: [4.0, -4.0],
            ..Self::person()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::person()
        }
    }

    pub fn counter(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.loads)
    }

    fn count(&self, source: &ModelSource) -> Result<()> {
        if self.fail {
            return Err(SegmentationError::ModelLoad(format!("cannot read {source}")));
        }
        self.loads.set(self.loads.get() + 1);
        Ok(())
    }
}

impl ModelLoader for CountingLoader {
    fn load_graph(&self, source: &ModelSource) -> Result<Box<dyn GraphModel>> {
        self.count(source)?;
        Ok(Box::new(ConstGraph {
            class: self.class,
            classes: 6,
        }))
    }

    fn load_fixed(&self, source: &ModelSource) -> Result<Box<dyn FixedSizeModel>> {
        self.count(source)?;
        Ok(Box::new(ConstFixed::new(self.logits[0], self.logits[1])))
    }
}

/// Kernel operation a [`FailingKernel`] rejects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Nothing,
    Convert,
    Remove,
    Replace,
    Blur,
}

/// Software kernel that throws from one chosen operation
pub struct FailingKernel {
    inner: SoftwareKernel,
    fail_on: FailOn,
}

impl FailingKernel {
    pub fn new(fail_on: FailOn) -> Self {
        Self {
            inner: SoftwareKernel::new(),
            fail_on,
        }
    }

    fn check(&self, op: FailOn) -> Result<()> {
        if self.fail_on == op {
            return Err(SegmentationError::kernel(format!("{op:?} threw")));
        }
        Ok(())
    }
}

impl NativeKernel for FailingKernel {
    fn create_buffer(&mut self, bytes: usize) -> Result<BufferHandle> {
        self.inner.create_buffer(bytes)
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.inner.destroy_buffer(handle)
    }

    fn write(&mut self, handle: BufferHandle, bytes: &[u8]) -> Result<()> {
        self.inner.write(handle, bytes)
    }

    fn read(&self, handle: BufferHandle, len: usize) -> Result<Vec<u8>> {
        self.inner.read(handle, len)
    }

    fn convert_size(
        &mut self,
        src: BufferHandle,
        src_size: Size,
        dst: BufferHandle,
        dst_size: Size,
    ) -> Result<()> {
        self.check(FailOn::Convert)?;
        self.inner.convert_size(src, src_size, dst, dst_size)
    }

    fn remove_background(&mut self, op: &MaskedOp) -> Result<()> {
        self.check(FailOn::Remove)?;
        self.inner.remove_background(op)
    }

    fn replace_background(&mut self, op: &MaskedOp, background: BufferHandle) -> Result<()> {
        self.check(FailOn::Replace)?;
        self.inner.replace_background(op, background)
    }

    fn blur_background(&mut self, op: &MaskedOp, blur_size: u32) -> Result<()> {
        self.check(FailOn::Blur)?;
        self.inner.blur_background(op, blur_size)
    }
}

pub fn runtime(loader: CountingLoader, fail_on: FailOn) -> Runtime {
    Runtime::new(Box::new(loader), Box::new(FailingKernel::new(fail_on)))
}

pub fn options(backend: Backend, width: u32, height: u32) -> SessionOptions {
    SessionOptions::new(
        SetupInfo::new(width, height),
        backend,
        ModelSource::Path("models/segmentation.onnx".into()),
    )
}

pub fn solid(width: u32, height: u32, pixel: [u8; 4]) -> FrameBuffer {
    FrameBuffer::filled(width, height, pixel)
}

pub fn all_pixels(frame: &FrameBuffer, pixel: [u8; 4]) -> bool {
    frame.data().chunks_exact(4).all(|px| px == pixel)
}

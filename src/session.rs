use crate::composite::{blur_window, Blend, Compositor, Effect};
use crate::config::{Backend, ExtraParams, SessionOptions, SetupInfo};
use crate::error::{Result, SegmentationError};
use crate::frame::FrameBuffer;
use crate::kernel::{BridgeStats, NativeKernel, NativeModule, SoftwareKernel};
use crate::segmentation::preprocess::resize_rgba;
use crate::segmentation::{InferenceEngine, Mask, ModelKind, ModelLoader, ModelRegistry, OnnxModelLoader};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Frames between performance log lines
const STATS_INTERVAL: u64 = 30;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    /// The only state that accepts frames
    Ready,
    /// Model load failed; the session stays unusable
    Failed,
    Destroyed,
}

/// Shared services for every session in a process.
///
/// Holds the model registry, the loader used on cache misses and the one
/// native kernel module. Sessions keep their own handles to these, so the
/// runtime can be dropped before them.
pub struct Runtime {
    registry: ModelRegistry,
    loader: Rc<dyn ModelLoader>,
    native: Rc<RefCell<NativeModule>>,
}

impl Runtime {
    pub fn new(loader: Box<dyn ModelLoader>, kernel: Box<dyn NativeKernel>) -> Self {
        tracing::info!("Segmentation runtime created");
        Self {
            registry: ModelRegistry::new(),
            loader: Rc::from(loader),
            native: Rc::new(RefCell::new(NativeModule::new(kernel))),
        }
    }

    /// ONNX models with the pure-Rust kernel
    pub fn with_defaults() -> Self {
        Self::new(
            Box::new(OnnxModelLoader::new()),
            Box::new(SoftwareKernel::new()),
        )
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.native.borrow().stats()
    }

    /// Create a session and load its model.
    ///
    /// Always returns the session; check [`Session::state`] to see whether
    /// the load succeeded.
    pub fn create_session(&self, options: SessionOptions) -> Session {
        let mut session = Session::new(self, options);
        if let Err(e) = session.load() {
            tracing::error!("Session for {} backend failed to load: {}", session.backend(), e);
        }
        session
    }
}

/// Per-session frame counters and timings
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub frames: u64,
    pub dropped: u64,
    pub inference: Duration,
    pub composite: Duration,
}

impl FrameStats {
    fn record(&mut self, inference: Duration, composite: Duration) {
        self.frames += 1;
        self.inference += inference;
        self.composite += composite;

        if self.frames % STATS_INTERVAL == 0 {
            let avg_inference_ms = self.inference.as_secs_f64() * 1000.0 / self.frames as f64;
            let avg_composite_ms = self.composite.as_secs_f64() * 1000.0 / self.frames as f64;
            let total_ms = avg_inference_ms + avg_composite_ms;
            tracing::info!(
                "Frame {}: inference={:.1}ms, composite={:.1}ms, total={:.1}ms, dropped={}",
                self.frames,
                avg_inference_ms,
                avg_composite_ms,
                total_ms,
                self.dropped
            );
        }
    }
}

/// One segmentation pipeline at a fixed processing resolution.
///
/// Callers must not run two frames through the same session at once.
pub struct Session {
    options: SessionOptions,
    state: SessionState,
    compositor: Compositor,
    engine: Option<InferenceEngine>,
    registry: ModelRegistry,
    loader: Rc<dyn ModelLoader>,
    native: Rc<RefCell<NativeModule>>,
    stats: FrameStats,
}

impl Session {
    pub fn new(runtime: &Runtime, options: SessionOptions) -> Self {
        Self {
            compositor: Compositor::for_backend(options.backend),
            options,
            state: SessionState::Uninitialized,
            engine: None,
            registry: runtime.registry.clone(),
            loader: Rc::clone(&runtime.loader),
            native: Rc::clone(&runtime.native),
            stats: FrameStats::default(),
        }
    }

    /// Acquire the model and build the inference engine.
    ///
    /// A failed load is final; the session moves to `Failed` and is not
    /// retried.
    pub fn load(&mut self) -> Result<()> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Ready => return Ok(()),
            SessionState::Destroyed => return Err(SegmentationError::Destroyed),
            state => return Err(SegmentationError::NotReady { state }),
        }

        self.state = SessionState::Loading;
        match self.build_engine() {
            Ok(engine) => {
                let size = engine.input_size();
                tracing::info!(
                    "Session ready: backend={}, processing={}x{}, model={}x{}",
                    self.options.backend,
                    self.options.setup.color_width,
                    self.options.setup.color_height,
                    size.width,
                    size.height
                );
                self.engine = Some(engine);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn build_engine(&self) -> Result<InferenceEngine> {
        self.options.validate()?;
        let lease = self.registry.acquire(
            ModelKind::from(self.options.backend),
            &self.options.model,
            self.options.reload,
            &*self.loader,
        )?;
        InferenceEngine::from_lease(lease)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn backend(&self) -> Backend {
        self.options.backend
    }

    pub fn setup(&self) -> SetupInfo {
        self.options.setup
    }

    pub fn compositor(&self) -> Compositor {
        self.compositor
    }

    /// Identity of the model this session holds, if loaded
    pub fn model_id(&self) -> Option<u64> {
        self.engine.as_ref().map(|engine| engine.model().id())
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Release the model lease. Runs once; later calls do nothing.
    pub fn destroy(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        // Dropping the engine drops the lease; the registry frees the
        // model once no other session holds it.
        self.engine = None;
        self.state = SessionState::Destroyed;
        tracing::info!(
            "Session destroyed after {} frames ({} dropped)",
            self.stats.frames,
            self.stats.dropped
        );
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Destroyed => Err(SegmentationError::Destroyed),
            state => Err(SegmentationError::NotReady { state }),
        }
    }

    fn engine_mut(&mut self) -> Result<&mut InferenceEngine> {
        let state = self.state;
        self.engine
            .as_mut()
            .ok_or(SegmentationError::NotReady { state })
    }

    /// Write the alpha mask for `input` into `output`.
    ///
    /// The mask is grayscale in RGB with probability in alpha, resized to
    /// the output's dimensions.
    pub fn try_get_alpha(&mut self, input: &FrameBuffer, output: &mut FrameBuffer) -> Result<()> {
        self.ensure_ready()?;
        input.ensure_rgba()?;
        output.ensure_rgba()?;

        let size = self.options.setup.size();
        let native = Rc::clone(&self.native);
        let mut module = native.borrow_mut();

        let started = Instant::now();
        let frame = resize_rgba(&mut module, input.data(), input.size(), size)?;
        let mask = self
            .engine_mut()?
            .alpha_mask(&mut module, &frame, size, false)?;
        let inference = started.elapsed();

        let started = Instant::now();
        let pixels = resize_rgba(&mut module, mask.data(), mask.size(), output.size())?;
        output.write_pixels(&pixels)?;
        self.stats.record(inference, started.elapsed());
        Ok(())
    }

    pub fn get_alpha(&mut self, input: &FrameBuffer, output: &mut FrameBuffer) -> bool {
        let result = self.try_get_alpha(input, output);
        self.report("get_alpha", result)
    }

    /// Run `effect` on `input` and write the result into `output`.
    ///
    /// With `alpha` set, that mask is used instead of running inference,
    /// so one mask can drive several effects on the same frame.
    pub fn try_apply_effect(
        &mut self,
        effect: Effect<'_>,
        input: &FrameBuffer,
        alpha: Option<&FrameBuffer>,
        output: &mut FrameBuffer,
        params: &ExtraParams,
    ) -> Result<()> {
        self.ensure_ready()?;
        params.validate()?;
        input.ensure_rgba()?;
        output.ensure_rgba()?;
        if let Some(alpha) = alpha {
            alpha.ensure_rgba()?;
        }
        let _span = tracing::debug_span!("apply_effect", effect = effect.name()).entered();

        let size = self.options.setup.size();
        let compositor = self.compositor;
        let native = Rc::clone(&self.native);
        let mut module = native.borrow_mut();

        let started = Instant::now();
        let frame = resize_rgba(&mut module, input.data(), input.size(), size)?;
        let computed: Mask;
        let mask = match alpha {
            Some(alpha) => alpha,
            None => {
                let remove_mode = matches!(effect, Effect::Remove);
                computed = self
                    .engine_mut()?
                    .alpha_mask(&mut module, &frame, size, remove_mode)?;
                &computed
            }
        };
        let inference = started.elapsed();

        let started = Instant::now();
        let background;
        let blend = match effect {
            Effect::Remove => Blend::Remove,
            Effect::Blur { blur_size } => Blend::Blur {
                blur_size: blur_window(blur_size, size)?,
            },
            Effect::Replace { background: image } => {
                image.ensure_rgba()?;
                background = resize_rgba(&mut module, image.data(), image.size(), size)?;
                Blend::Replace {
                    background: &*background,
                }
            }
        };

        let pixels = compositor.composite(&mut module, &blend, &frame, size, mask, params)?;
        let pixels = resize_rgba(&mut module, &pixels, size, output.size())?;
        output.write_pixels(&pixels)?;
        self.stats.record(inference, started.elapsed());
        Ok(())
    }

    pub fn apply_effect(
        &mut self,
        effect: Effect<'_>,
        input: &FrameBuffer,
        alpha: Option<&FrameBuffer>,
        output: &mut FrameBuffer,
        params: &ExtraParams,
    ) -> bool {
        let result = self.try_apply_effect(effect, input, alpha, output, params);
        self.report(effect.name(), result)
    }

    pub fn try_replace_background(
        &mut self,
        input: &FrameBuffer,
        background: &FrameBuffer,
        output: &mut FrameBuffer,
        params: &ExtraParams,
    ) -> Result<()> {
        self.try_apply_effect(Effect::Replace { background }, input, None, output, params)
    }

    pub fn replace_background(
        &mut self,
        input: &FrameBuffer,
        background: &FrameBuffer,
        output: &mut FrameBuffer,
        params: &ExtraParams,
    ) -> bool {
        self.apply_effect(Effect::Replace { background }, input, None, output, params)
    }

    pub fn try_blur_background(
        &mut self,
        input: &FrameBuffer,
        output: &mut FrameBuffer,
        blur_size: u32,
        params: &ExtraParams,
    ) -> Result<()> {
        self.try_apply_effect(Effect::Blur { blur_size }, input, None, output, params)
    }

    pub fn blur_background(
        &mut self,
        input: &FrameBuffer,
        output: &mut FrameBuffer,
        blur_size: u32,
        params: &ExtraParams,
    ) -> bool {
        self.apply_effect(Effect::Blur { blur_size }, input, None, output, params)
    }

    pub fn try_remove_background(
        &mut self,
        input: &FrameBuffer,
        output: &mut FrameBuffer,
        params: &ExtraParams,
    ) -> Result<()> {
        self.try_apply_effect(Effect::Remove, input, None, output, params)
    }

    pub fn remove_background(
        &mut self,
        input: &FrameBuffer,
        output: &mut FrameBuffer,
        params: &ExtraParams,
    ) -> bool {
        self.apply_effect(Effect::Remove, input, None, output, params)
    }

    /// Log a failed call and turn the outcome into a status flag
    fn report(&mut self, operation: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) if e.is_skip_frame() => {
                self.stats.dropped += 1;
                tracing::warn!("{} dropped frame: {}", operation, e);
                false
            }
            Err(e) => {
                tracing::debug!("{} skipped: {}", operation, e);
                false
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

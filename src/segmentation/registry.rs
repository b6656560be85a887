use super::types::{FixedSizeModel, GraphModel, ModelLoader};
use crate::config::{Backend, ModelSource};
use crate::error::{Result, SegmentationError};
use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Which kind of model a backend runs; the registry caches one per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    NativeFixedSize,
    TensorGraph,
}

impl From<Backend> for ModelKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Tflite => ModelKind::NativeFixedSize,
            Backend::Wasm | Backend::Gpu => ModelKind::TensorGraph,
        }
    }
}

/// A loaded model of either kind
pub enum LoadedModel {
    Graph(Box<dyn GraphModel>),
    Fixed(Box<dyn FixedSizeModel>),
}

impl LoadedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            LoadedModel::Graph(_) => ModelKind::TensorGraph,
            LoadedModel::Fixed(_) => ModelKind::NativeFixedSize,
        }
    }

    pub fn as_graph_mut(&mut self) -> Result<&mut dyn GraphModel> {
        match self {
            LoadedModel::Graph(model) => Ok(model.as_mut()),
            LoadedModel::Fixed(_) => Err(SegmentationError::processing(
                "expected a graph model, found a fixed-size model",
            )),
        }
    }

    pub fn as_fixed_mut(&mut self) -> Result<&mut dyn FixedSizeModel> {
        match self {
            LoadedModel::Fixed(model) => Ok(model.as_mut()),
            LoadedModel::Graph(_) => Err(SegmentationError::processing(
                "expected a fixed-size model, found a graph model",
            )),
        }
    }
}

struct ModelSlot {
    id: u64,
    kind: ModelKind,
    source: ModelSource,
    model: RefCell<LoadedModel>,
}

impl Drop for ModelSlot {
    fn drop(&mut self) {
        tracing::info!("Released {:?} model #{} ({})", self.kind, self.id, self.source);
    }
}

/// Shared handle to a cached model.
///
/// The model is freed when the last lease referencing it drops, no matter
/// which session created it.
pub struct ModelLease {
    slot: Rc<ModelSlot>,
}

impl ModelLease {
    /// Load generation of the underlying model, unique per registry
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn kind(&self) -> ModelKind {
        self.slot.kind
    }

    /// Whether both leases point at the same model instance
    pub fn same_model(&self, other: &ModelLease) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }

    pub fn borrow_mut(&self) -> Result<RefMut<'_, LoadedModel>> {
        self.slot
            .model
            .try_borrow_mut()
            .map_err(|_| SegmentationError::ModelBusy)
    }
}

impl fmt::Debug for ModelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLease")
            .field("id", &self.slot.id)
            .field("kind", &self.slot.kind)
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    cache: HashMap<ModelKind, Weak<ModelSlot>>,
    loads: u64,
}

/// Per-kind model cache with reference-counted leases.
///
/// Sessions of the same kind share one model unless they ask for a
/// reload, which loads a fresh instance and makes it the cached one.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(
        &self,
        kind: ModelKind,
        source: &ModelSource,
        reload: bool,
        loader: &dyn ModelLoader,
    ) -> Result<ModelLease> {
        if !reload {
            if let Some(slot) = self.cached(kind) {
                if slot.source != *source {
                    tracing::warn!(
                        "Reusing cached {:?} model from {}, ignoring {}; request a reload to switch",
                        kind,
                        slot.source,
                        source
                    );
                }
                tracing::info!("Reusing cached {:?} model #{}", kind, slot.id);
                return Ok(ModelLease { slot });
            }
        }

        tracing::info!("Loading {:?} model from {}", kind, source);
        let model = match kind {
            ModelKind::TensorGraph => LoadedModel::Graph(loader.load_graph(source)?),
            ModelKind::NativeFixedSize => LoadedModel::Fixed(loader.load_fixed(source)?),
        };

        let mut inner = self.inner.borrow_mut();
        inner.loads += 1;
        let slot = Rc::new(ModelSlot {
            id: inner.loads,
            kind,
            source: source.clone(),
            model: RefCell::new(model),
        });
        inner.cache.insert(kind, Rc::downgrade(&slot));
        tracing::info!("Loaded {:?} model #{}", kind, slot.id);
        Ok(ModelLease { slot })
    }

    fn cached(&self, kind: ModelKind) -> Option<Rc<ModelSlot>> {
        self.inner.borrow().cache.get(&kind).and_then(Weak::upgrade)
    }

    /// Number of models loaded so far, cache hits excluded
    pub fn load_count(&self) -> u64 {
        self.inner.borrow().loads
    }

    pub fn is_cached(&self, kind: ModelKind) -> bool {
        self.cached(kind).is_some()
    }

    /// Leases currently holding the cached model of `kind`
    pub fn live_leases(&self, kind: ModelKind) -> usize {
        self.inner
            .borrow()
            .cache
            .get(&kind)
            .map(Weak::strong_count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Size;
    use ndarray::{Array4, ArrayView4};
    use std::cell::Cell;

    struct FlatGraph;

    impl GraphModel for FlatGraph {
        fn input_size(&self) -> Size {
            Size::new(4, 4)
        }

        fn run(&mut self, _input: ArrayView4<f32>) -> Result<Array4<f32>> {
            Ok(Array4::zeros((1, 4, 4, 2)))
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        calls: Cell<u32>,
    }

    impl ModelLoader for CountingLoader {
        fn load_graph(&self, _source: &ModelSource) -> Result<Box<dyn GraphModel>> {
            self.calls.set(self.calls.get() + 1);
            Ok(Box::new(FlatGraph))
        }

        fn load_fixed(&self, source: &ModelSource) -> Result<Box<dyn FixedSizeModel>> {
            Err(SegmentationError::ModelLoad(format!("no fixed model at {source}")))
        }
    }

    fn source() -> ModelSource {
        ModelSource::Path("graph.onnx".into())
    }

    #[test]
    fn second_acquire_reuses_cached_model() {
        let registry = ModelRegistry::new();
        let loader = CountingLoader::default();
        let a = registry
            .acquire(ModelKind::TensorGraph, &source(), false, &loader)
            .unwrap();
        let b = registry
            .acquire(ModelKind::TensorGraph, &source(), false, &loader)
            .unwrap();
        assert!(a.same_model(&b));
        assert_eq!(a.borrow_mut().unwrap().kind(), ModelKind::TensorGraph);
        assert_eq!(registry.load_count(), 1);
        assert_eq!(loader.calls.get(), 1);
        assert_eq!(registry.live_leases(ModelKind::TensorGraph), 2);
    }

    #[test]
    fn reload_replaces_cache_but_keeps_old_model_alive() {
        let registry = ModelRegistry::new();
        let loader = CountingLoader::default();
        let old = registry
            .acquire(ModelKind::TensorGraph, &source(), false, &loader)
            .unwrap();
        let fresh = registry
            .acquire(ModelKind::TensorGraph, &source(), true, &loader)
            .unwrap();
        assert!(!old.same_model(&fresh));
        assert_eq!(registry.load_count(), 2);
        assert!(old.borrow_mut().is_ok());

        let next = registry
            .acquire(ModelKind::TensorGraph, &source(), false, &loader)
            .unwrap();
        assert!(next.same_model(&fresh));
    }

    #[test]
    fn model_is_dropped_with_last_lease() {
        let registry = ModelRegistry::new();
        let loader = CountingLoader::default();
        let a = registry
            .acquire(ModelKind::TensorGraph, &source(), false, &loader)
            .unwrap();
        let b = registry
            .acquire(ModelKind::TensorGraph, &source(), false, &loader)
            .unwrap();
        drop(a);
        assert!(registry.is_cached(ModelKind::TensorGraph));
        drop(b);
        assert!(!registry.is_cached(ModelKind::TensorGraph));
        assert_eq!(registry.live_leases(ModelKind::TensorGraph), 0);
    }

    #[test]
    fn failed_load_caches_nothing() {
        let registry = ModelRegistry::new();
        let loader = CountingLoader::default();
        let err = registry
            .acquire(ModelKind::NativeFixedSize, &source(), false, &loader)
            .unwrap_err();
        assert!(matches!(err, SegmentationError::ModelLoad(_)));
        assert_eq!(registry.load_count(), 0);
        assert!(!registry.is_cached(ModelKind::NativeFixedSize));
    }

    #[test]
    fn concurrent_borrow_reports_busy() {
        let registry = ModelRegistry::new();
        let loader = CountingLoader::default();
        let a = registry
            .acquire(ModelKind::TensorGraph, &source(), false, &loader)
            .unwrap();
        let b = registry
            .acquire(ModelKind::TensorGraph, &source(), false, &loader)
            .unwrap();
        let _held = a.borrow_mut().unwrap();
        assert!(matches!(b.borrow_mut(), Err(SegmentationError::ModelBusy)));
    }

    #[test]
    fn kinds_follow_backends() {
        assert_eq!(ModelKind::from(Backend::Tflite), ModelKind::NativeFixedSize);
        assert_eq!(ModelKind::from(Backend::Wasm), ModelKind::TensorGraph);
        assert_eq!(ModelKind::from(Backend::Gpu), ModelKind::TensorGraph);
    }
}

use super::{BufferHandle, NativeKernel};
use crate::error::Result;
use crate::frame::Size;

/// Allocation counters for the native buffer bridge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub allocations: u64,
    pub releases: u64,
}

impl BridgeStats {
    /// Buffers currently held in kernel memory
    pub fn live(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }
}

/// The loaded native kernel plus bookkeeping for its buffers.
///
/// There is one per runtime. Buffers can only be obtained through a
/// [`BufferScope`], which frees them when it goes out of scope.
pub struct NativeModule {
    kernel: Box<dyn NativeKernel>,
    stats: BridgeStats,
}

impl NativeModule {
    pub fn new(kernel: Box<dyn NativeKernel>) -> Self {
        Self {
            kernel,
            stats: BridgeStats::default(),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Open an allocation scope for one kernel invocation
    pub fn scope(&mut self) -> BufferScope<'_> {
        BufferScope {
            module: self,
            handles: Vec::new(),
        }
    }
}

/// Acquire/use/release guard around native buffers.
///
/// Every handle allocated through the scope is destroyed when the scope
/// drops, on success, on `?` early returns and on unwinding alike.
pub struct BufferScope<'m> {
    module: &'m mut NativeModule,
    handles: Vec<BufferHandle>,
}

impl BufferScope<'_> {
    /// Allocate an RGBA buffer sized for `size`
    pub fn allocate(&mut self, size: Size) -> Result<BufferHandle> {
        size.ensure_non_empty()?;
        let bytes = self.module.kernel.buffer_size(size);
        let handle = self.module.kernel.create_buffer(bytes)?;
        self.module.stats.allocations += 1;
        self.handles.push(handle);
        Ok(handle)
    }

    /// Allocate a buffer for `size` and copy `pixels` into it
    pub fn allocate_with(&mut self, size: Size, pixels: &[u8]) -> Result<BufferHandle> {
        let handle = self.allocate(size)?;
        self.copy_in(handle, pixels)?;
        Ok(handle)
    }

    pub fn copy_in(&mut self, handle: BufferHandle, bytes: &[u8]) -> Result<()> {
        self.module.kernel.write(handle, bytes)
    }

    pub fn copy_out(&self, handle: BufferHandle, len: usize) -> Result<Vec<u8>> {
        self.module.kernel.read(handle, len)
    }

    pub fn kernel(&mut self) -> &mut dyn NativeKernel {
        self.module.kernel.as_mut()
    }

    pub fn held(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for BufferScope<'_> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..).rev() {
            match self.module.kernel.destroy_buffer(handle) {
                Ok(()) => self.module.stats.releases += 1,
                Err(e) => tracing::warn!("Failed to free native buffer {}: {}", handle.raw(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegmentationError;
    use crate::kernel::SoftwareKernel;

    #[test]
    fn scope_frees_everything_it_allocated() {
        let mut module = NativeModule::new(Box::new(SoftwareKernel::new()));
        {
            let mut scope = module.scope();
            let a = scope.allocate(Size::new(2, 2)).unwrap();
            let b = scope.allocate_with(Size::new(1, 1), &[1, 2, 3, 4]).unwrap();
            assert_ne!(a, b);
            assert_eq!(scope.copy_out(b, 4).unwrap(), vec![1, 2, 3, 4]);
            assert_eq!(scope.held(), 2);
        }
        let stats = module.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.releases, 2);
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn scope_frees_on_error_return() {
        fn failing(module: &mut NativeModule) -> Result<()> {
            let mut scope = module.scope();
            let handle = scope.allocate(Size::new(2, 2))?;
            scope.copy_in(handle, &[0; 16])?;
            Err(SegmentationError::kernel("native call threw"))
        }

        let mut module = NativeModule::new(Box::new(SoftwareKernel::new()));
        for _ in 0..5 {
            assert!(failing(&mut module).is_err());
        }
        assert_eq!(module.stats().allocations, 5);
        assert_eq!(module.stats().live(), 0);
    }

    #[test]
    fn empty_size_is_not_allocated() {
        let mut module = NativeModule::new(Box::new(SoftwareKernel::new()));
        let mut scope = module.scope();
        assert!(scope.allocate(Size::new(0, 4)).is_err());
        assert_eq!(scope.held(), 0);
    }
}

use std::collections::HashMap;

use glam::UVec3;

use crate::backend::{BackendError, BufferHandle, ComputeBackend, GridFormat};

/// Pool key: buffers are interchangeable when resolution and format match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridKey {
    pub resolution: UVec3,
    pub format: GridFormat,
}

impl GridKey {
    pub const fn new(resolution: UVec3, format: GridFormat) -> Self {
        Self { resolution, format }
    }

    pub fn float_count(&self) -> usize {
        let r = self.resolution;
        r.x as usize * r.y as usize * r.z as usize * self.format.channels()
    }
}

/// Allocate-or-reuse pool of grid buffers owned by the solver.
#[derive(Debug, Default)]
pub struct GridArena {
    free: HashMap<GridKey, Vec<BufferHandle>>,
    live: HashMap<BufferHandle, GridKey>,
}

impl GridArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a pooled buffer for `key`, allocating when none is free.
    pub fn acquire<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        key: GridKey,
    ) -> Result<BufferHandle, BackendError> {
        if let Some(handle) = self.free.get_mut(&key).and_then(Vec::pop) {
            log::trace!("[GridArena] Reusing {:?} for {:?}", handle, key);
            self.live.insert(handle, key);
            return Ok(handle);
        }

        let handle = backend.allocate_grid(key.resolution, key.format)?;
        log::debug!(
            "[GridArena] Allocated {:?} {:?} at {}x{}x{} ({:.2} MB)",
            handle,
            key.format,
            key.resolution.x,
            key.resolution.y,
            key.resolution.z,
            (key.float_count() * 4) as f32 / (1024.0 * 1024.0)
        );
        self.live.insert(handle, key);
        Ok(handle)
    }

    /// Return a buffer to the pool. Its contents are kept but undefined to
    /// the next user.
    pub fn recycle(&mut self, handle: BufferHandle) {
        match self.live.remove(&handle) {
            Some(key) => self.free.entry(key).or_default().push(handle),
            None => log::warn!("[GridArena] Recycle of unmanaged buffer {:?}", handle),
        }
    }

    /// Free every buffer, live or pooled. Used on resize and deinitialize.
    pub fn release_all<B: ComputeBackend + ?Sized>(&mut self, backend: &mut B) {
        let count = self.live.len() + self.free_count();
        for (handle, _) in self.live.drain() {
            backend.release_grid(handle);
        }
        for (_, pool) in self.free.drain() {
            for handle in pool {
                backend.release_grid(handle);
            }
        }
        if count > 0 {
            log::debug!("[GridArena] Released {} grid buffers", count);
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}

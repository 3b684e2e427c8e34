use std::collections::HashMap;

use crate::engine::error::RegistryError;
use crate::engine::message::Handle;

/// Maps opaque handles to live instances.
///
/// Confined to the worker thread; the realtime side only ever holds the
/// integer handle. Resolution hands out a non-owning borrow, so a caller can
/// never outlive the retirement of the handle it resolved.
pub struct HandleRegistry<T> {
    entries: HashMap<Handle, T>,
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        HandleRegistry {
            entries: HashMap::new(),
        }
    }

    /// Adds an instance under `handle`. Duplicate handles are a programming
    /// error and fail with [`RegistryError::DuplicateHandle`].
    pub fn register(&mut self, handle: Handle, instance: T) -> Result<(), RegistryError> {
        if self.entries.contains_key(&handle) {
            return Err(RegistryError::DuplicateHandle(handle));
        }
        self.entries.insert(handle, instance);
        Ok(())
    }

    pub fn resolve(&self, handle: Handle) -> Result<&T, RegistryError> {
        self.entries
            .get(&handle)
            .ok_or(RegistryError::HandleNotFound(handle))
    }

    pub fn resolve_mut(&mut self, handle: Handle) -> Result<&mut T, RegistryError> {
        self.entries
            .get_mut(&handle)
            .ok_or(RegistryError::HandleNotFound(handle))
    }

    /// Removes the mapping and drops the instance. Idempotent; returns
    /// whether anything was removed.
    pub fn retire(&mut self, handle: Handle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn instances_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.values_mut()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

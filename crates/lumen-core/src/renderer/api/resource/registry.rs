// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A generation-checked slot arena for device objects.

use std::marker::PhantomData;

use super::handle::{Handle, RawHandle};
use crate::renderer::error::ResourceError;

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
    pending_uses: u32,
}

/// Owns device objects and hands out generation-checked handles to them.
///
/// Besides lookup, the registry counts *pending uses*: a submission layer calls
/// [`retain`](Self::retain) for every object referenced by a command buffer it sends to
/// the device and [`release`](Self::release) once the work completed. An object with
/// pending uses cannot be removed.
#[derive(Debug)]
pub struct ResourceRegistry<H: Handle, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _handle: PhantomData<fn() -> H>,
}

impl<H: Handle, T> Default for ResourceRegistry<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Handle, T> ResourceRegistry<H, T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _handle: PhantomData,
        }
    }

    /// Stores `value` and returns its handle.
    pub fn insert(&mut self, value: T) -> H {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            slot.pending_uses = 0;
            return H::from_raw(RawHandle {
                index,
                generation: slot.generation,
            });
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
            pending_uses: 0,
        });
        H::from_raw(RawHandle {
            index,
            generation: 1,
        })
    }

    fn slot(&self, handle: H) -> Option<&Slot<T>> {
        let raw = handle.raw();
        self.slots
            .get(raw.index as usize)
            .filter(|slot| slot.generation == raw.generation && slot.value.is_some())
    }

    fn slot_mut(&mut self, handle: H) -> Option<&mut Slot<T>> {
        let raw = handle.raw();
        self.slots
            .get_mut(raw.index as usize)
            .filter(|slot| slot.generation == raw.generation && slot.value.is_some())
    }

    /// Returns the object behind `handle`, or `None` if the handle is stale.
    pub fn get(&self, handle: H) -> Option<&T> {
        self.slot(handle).and_then(|slot| slot.value.as_ref())
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        self.slot_mut(handle).and_then(|slot| slot.value.as_mut())
    }

    /// `true` when `handle` refers to a live object.
    pub fn contains(&self, handle: H) -> bool {
        self.slot(handle).is_some()
    }

    /// Removes the object, invalidating every copy of `handle`.
    ///
    /// # Errors
    /// * [`ResourceError::InvalidHandle`] for a stale handle.
    /// * [`ResourceError::InUse`] while pending work still references the object.
    pub fn remove(&mut self, handle: H) -> Result<T, ResourceError> {
        let raw = handle.raw();
        let slot = self.slot_mut(handle).ok_or(ResourceError::InvalidHandle)?;
        if slot.pending_uses > 0 {
            return Err(ResourceError::InUse {
                pending_uses: slot.pending_uses,
            });
        }

        let value = slot.value.take().ok_or(ResourceError::InvalidHandle)?;
        // Skip generation 0 on wrap so it stays reserved for null handles.
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(raw.index);
        self.len -= 1;
        Ok(value)
    }

    /// Records one more pending use of the object.
    pub fn retain(&mut self, handle: H) -> Result<(), ResourceError> {
        let slot = self.slot_mut(handle).ok_or(ResourceError::InvalidHandle)?;
        slot.pending_uses += 1;
        Ok(())
    }

    /// Drops one pending use of the object.
    pub fn release(&mut self, handle: H) -> Result<(), ResourceError> {
        let slot = self.slot_mut(handle).ok_or(ResourceError::InvalidHandle)?;
        if slot.pending_uses == 0 {
            log::warn!("ResourceRegistry: release of {handle:?} without a matching retain");
        }
        slot.pending_uses = slot.pending_uses.saturating_sub(1);
        Ok(())
    }

    /// The number of pending uses of a live object.
    pub fn pending_uses(&self, handle: H) -> Option<u32> {
        self.slot(handle).map(|slot| slot.pending_uses)
    }

    /// The number of live objects.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when the registry holds no live object.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over live objects and their handles.
    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    H::from_raw(RawHandle {
                        index: index as u32,
                        generation: slot.generation,
                    }),
                    value,
                )
            })
        })
    }

    /// Handles of every live object.
    pub fn handles(&self) -> Vec<H> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::api::resource::BufferId;

    #[test]
    fn stale_handle_is_rejected_after_slot_reuse() {
        let mut registry: ResourceRegistry<BufferId, &str> = ResourceRegistry::new();
        let first = registry.insert("first");
        assert_eq!(registry.remove(first), Ok("first"));

        let second = registry.insert("second");
        assert_eq!(first.index(), second.index());
        assert!(registry.get(first).is_none());
        assert_eq!(registry.get(second), Some(&"second"));
        assert_eq!(registry.remove(first), Err(ResourceError::InvalidHandle));
    }

    #[test]
    fn retained_object_cannot_be_removed() {
        let mut registry: ResourceRegistry<BufferId, u32> = ResourceRegistry::new();
        let handle = registry.insert(7);
        registry.retain(handle).unwrap();
        registry.retain(handle).unwrap();
        assert_eq!(
            registry.remove(handle),
            Err(ResourceError::InUse { pending_uses: 2 })
        );

        registry.release(handle).unwrap();
        registry.release(handle).unwrap();
        assert_eq!(registry.remove(handle), Ok(7));
        assert!(registry.is_empty());
    }

    #[test]
    fn null_handle_never_resolves() {
        let mut registry: ResourceRegistry<BufferId, u32> = ResourceRegistry::new();
        registry.insert(1);
        assert!(!registry.contains(BufferId::NULL));
        assert_eq!(registry.retain(BufferId::NULL), Err(ResourceError::InvalidHandle));
    }

    #[test]
    fn iter_skips_removed_slots() {
        let mut registry: ResourceRegistry<BufferId, u32> = ResourceRegistry::new();
        let a = registry.insert(1);
        let b = registry.insert(2);
        registry.remove(a).unwrap();
        let live: Vec<_> = registry.iter().collect();
        assert_eq!(live, vec![(b, &2)]);
        assert_eq!(registry.len(), 1);
    }
}

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

//! Descriptor sets: the resources a pipeline's shaders read and write.

use crate::renderer::api::resource::{AccelerationStructureId, BufferId, ImageId, ResourceHandle};

/// A resource bound to one descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    /// An image read and written by shaders. Expected in `ShaderWrite` or `General`.
    StorageImage(ImageId),
    /// An image sampled by shaders. Expected in `ShaderRead`.
    SampledImage(ImageId),
    /// A uniform buffer.
    UniformBuffer(BufferId),
    /// A storage buffer.
    StorageBuffer(BufferId),
    /// A top-level acceleration structure traversed by rays.
    AccelerationStructure(AccelerationStructureId),
}

impl DescriptorResource {
    /// The device object behind the binding.
    pub fn handle(&self) -> ResourceHandle {
        match *self {
            DescriptorResource::StorageImage(id) | DescriptorResource::SampledImage(id) => {
                ResourceHandle::Image(id)
            }
            DescriptorResource::UniformBuffer(id) | DescriptorResource::StorageBuffer(id) => {
                ResourceHandle::Buffer(id)
            }
            DescriptorResource::AccelerationStructure(id) => {
                ResourceHandle::AccelerationStructure(id)
            }
        }
    }
}

/// One binding of a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    /// Binding index in the set.
    pub binding: u32,
    /// The bound resource.
    pub resource: DescriptorResource,
}

/// Describes a descriptor set to allocate and fill.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptorSetDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// The bindings, in any order.
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetDescriptor {
    /// Adds a binding.
    #[must_use]
    pub fn with(mut self, binding: u32, resource: DescriptorResource) -> Self {
        self.bindings.push(DescriptorBinding { binding, resource });
        self
    }

    /// The resource at `binding`.
    pub fn resource(&self, binding: u32) -> Option<DescriptorResource> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.resource)
    }

    /// Every device object the set binds, in binding order.
    pub fn resources(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.bindings.iter().map(|b| b.resource.handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_resources_resolve_to_their_handles() {
        let set = DescriptorSetDescriptor::default()
            .with(0, DescriptorResource::AccelerationStructure(AccelerationStructureId::new(4, 1)))
            .with(1, DescriptorResource::StorageImage(ImageId::new(2, 1)))
            .with(2, DescriptorResource::StorageBuffer(BufferId::new(7, 3)));
        assert_eq!(
            set.resources().collect::<Vec<_>>(),
            vec![
                ResourceHandle::AccelerationStructure(AccelerationStructureId::new(4, 1)),
                ResourceHandle::Image(ImageId::new(2, 1)),
                ResourceHandle::Buffer(BufferId::new(7, 3)),
            ]
        );
        assert_eq!(set.resource(1), Some(DescriptorResource::StorageImage(ImageId::new(2, 1))));
        assert_eq!(set.resource(9), None);
    }
}

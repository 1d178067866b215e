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

//! Computes synchronization for resource state transitions and batches it.
//!
//! A transition asks to move a resource region from one [`ResourceState`] to another.
//! Each state maps to an [`AccessScope`]; a transition whose two scopes are identical needs
//! no synchronization and is elided. Every remaining transition becomes a buffer or image
//! barrier, and all barriers requested together merge into one [`PipelineBarrier`].

use crate::renderer::api::resource::{
    BufferId, BufferRange, ImageId, ImageSubresourceRange, ResourceKind, ResourceState,
};

use super::{AccessFlags, ImageLayout, PipelineStage};

/// The canonical (stages, access, layout) triple of a resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessScope {
    /// Stages that access the resource in this state.
    pub stages: PipelineStage,
    /// How they access it.
    pub access: AccessFlags,
    /// The image layout. Always [`ImageLayout::Undefined`] for buffers.
    pub layout: ImageLayout,
}

fn scope_of(state: ResourceState, kind: ResourceKind) -> AccessScope {
    state.access_scope(kind).unwrap_or_else(|| {
        panic!("ResourceState::{state:?} has no meaning for {kind:?} resources")
    })
}

/// A request to move a buffer range between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferTransition {
    /// The buffer.
    pub buffer: BufferId,
    /// The state the range is in.
    pub old_state: ResourceState,
    /// The state the range must be in afterwards.
    pub new_state: ResourceState,
    /// The affected bytes; whole buffer by default.
    pub range: BufferRange,
}

impl BufferTransition {
    /// A whole-buffer transition.
    pub const fn new(buffer: BufferId, old_state: ResourceState, new_state: ResourceState) -> Self {
        Self {
            buffer,
            old_state,
            new_state,
            range: BufferRange::WHOLE,
        }
    }

    /// Restricts the transition to `range`.
    #[must_use]
    pub const fn with_range(mut self, range: BufferRange) -> Self {
        self.range = range;
        self
    }
}

/// A request to move an image subresource range between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageTransition {
    /// The image.
    pub image: ImageId,
    /// The state the range is in.
    pub old_state: ResourceState,
    /// The state the range must be in afterwards.
    pub new_state: ResourceState,
    /// The affected subresources; whole color image by default.
    pub range: ImageSubresourceRange,
}

impl ImageTransition {
    /// A whole-image (color aspect) transition.
    pub const fn new(image: ImageId, old_state: ResourceState, new_state: ResourceState) -> Self {
        Self {
            image,
            old_state,
            new_state,
            range: ImageSubresourceRange::WHOLE_COLOR,
        }
    }

    /// Restricts the transition to `range`.
    #[must_use]
    pub const fn with_range(mut self, range: ImageSubresourceRange) -> Self {
        self.range = range;
        self
    }
}

/// Either kind of transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// A buffer transition.
    Buffer(BufferTransition),
    /// An image transition.
    Image(ImageTransition),
}

impl From<BufferTransition> for Transition {
    fn from(t: BufferTransition) -> Self {
        Transition::Buffer(t)
    }
}

impl From<ImageTransition> for Transition {
    fn from(t: ImageTransition) -> Self {
        Transition::Image(t)
    }
}

/// A global memory dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryBarrier {
    /// Accesses made available.
    pub src_access: AccessFlags,
    /// Accesses made visible.
    pub dst_access: AccessFlags,
}

/// A memory dependency restricted to a buffer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferBarrier {
    /// The buffer.
    pub buffer: BufferId,
    /// Scope before the barrier.
    pub src: AccessScope,
    /// Scope after the barrier.
    pub dst: AccessScope,
    /// The bytes covered.
    pub range: BufferRange,
}

/// A memory dependency and layout transition for an image subresource range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageBarrier {
    /// The image.
    pub image: ImageId,
    /// Scope (and old layout) before the barrier.
    pub src: AccessScope,
    /// Scope (and new layout) after the barrier.
    pub dst: AccessScope,
    /// The subresources covered.
    pub range: ImageSubresourceRange,
}

impl ImageBarrier {
    /// The layout the image is in before the barrier.
    pub fn old_layout(&self) -> ImageLayout {
        self.src.layout
    }

    /// The layout the image is in after the barrier.
    pub fn new_layout(&self) -> ImageLayout {
        self.dst.layout
    }
}

/// The synchronization a single transition needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierSpec {
    /// Both states map to the same scope; nothing to record.
    NoOp,
    /// A buffer barrier.
    Buffer(BufferBarrier),
    /// An image barrier.
    Image(ImageBarrier),
}

impl BarrierSpec {
    /// `true` for [`BarrierSpec::NoOp`].
    pub fn is_noop(&self) -> bool {
        matches!(self, BarrierSpec::NoOp)
    }
}

/// Computes the barrier for one transition.
///
/// # Panics
/// When the new state is [`ResourceState::Undefined`], or when either state has no
/// meaning for the resource kind (e.g. an image in [`ResourceState::HostRead`]).
pub fn compute_barrier(transition: impl Into<Transition>) -> BarrierSpec {
    match transition.into() {
        Transition::Buffer(t) => {
            let (src, dst) = transition_scopes(t.old_state, t.new_state, ResourceKind::Buffer);
            if src == dst {
                return BarrierSpec::NoOp;
            }
            BarrierSpec::Buffer(BufferBarrier {
                buffer: t.buffer,
                src,
                dst,
                range: t.range,
            })
        }
        Transition::Image(t) => {
            let (src, dst) = transition_scopes(t.old_state, t.new_state, ResourceKind::Image);
            if src == dst {
                return BarrierSpec::NoOp;
            }
            BarrierSpec::Image(ImageBarrier {
                image: t.image,
                src,
                dst,
                range: t.range,
            })
        }
    }
}

fn transition_scopes(
    old: ResourceState,
    new: ResourceState,
    kind: ResourceKind,
) -> (AccessScope, AccessScope) {
    assert!(
        new != ResourceState::Undefined,
        "Cannot transition a {kind:?} to ResourceState::Undefined (from {old:?})"
    );
    (scope_of(old, kind), scope_of(new, kind))
}

/// A set of transitions requested together.
///
/// Every way of asking for transitions (one buffer, one image, slices of either, or both
/// at once) converts into this type, so they all reach the same recording primitive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitionSet {
    /// Buffer transitions.
    pub buffers: Vec<BufferTransition>,
    /// Image transitions.
    pub images: Vec<ImageTransition>,
}

impl TransitionSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a buffer transition.
    #[must_use]
    pub fn buffer(mut self, transition: BufferTransition) -> Self {
        self.buffers.push(transition);
        self
    }

    /// Adds an image transition.
    #[must_use]
    pub fn image(mut self, transition: ImageTransition) -> Self {
        self.images.push(transition);
        self
    }

    /// Adds either kind of transition.
    pub fn push(&mut self, transition: impl Into<Transition>) {
        match transition.into() {
            Transition::Buffer(t) => self.buffers.push(t),
            Transition::Image(t) => self.images.push(t),
        }
    }

    /// Total number of requested transitions.
    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    /// `true` when nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }
}

impl From<BufferTransition> for TransitionSet {
    fn from(t: BufferTransition) -> Self {
        Self::new().buffer(t)
    }
}

impl From<ImageTransition> for TransitionSet {
    fn from(t: ImageTransition) -> Self {
        Self::new().image(t)
    }
}

impl From<&[BufferTransition]> for TransitionSet {
    fn from(buffers: &[BufferTransition]) -> Self {
        Self {
            buffers: buffers.to_vec(),
            images: Vec::new(),
        }
    }
}

impl From<&[ImageTransition]> for TransitionSet {
    fn from(images: &[ImageTransition]) -> Self {
        Self {
            buffers: Vec::new(),
            images: images.to_vec(),
        }
    }
}

impl<const N: usize> From<[BufferTransition; N]> for TransitionSet {
    fn from(buffers: [BufferTransition; N]) -> Self {
        Self {
            buffers: buffers.to_vec(),
            images: Vec::new(),
        }
    }
}

impl<const N: usize> From<[ImageTransition; N]> for TransitionSet {
    fn from(images: [ImageTransition; N]) -> Self {
        Self {
            buffers: Vec::new(),
            images: images.to_vec(),
        }
    }
}

impl From<Vec<BufferTransition>> for TransitionSet {
    fn from(buffers: Vec<BufferTransition>) -> Self {
        Self {
            buffers,
            images: Vec::new(),
        }
    }
}

impl From<Vec<ImageTransition>> for TransitionSet {
    fn from(images: Vec<ImageTransition>) -> Self {
        Self {
            buffers: Vec::new(),
            images,
        }
    }
}

impl From<(&[BufferTransition], &[ImageTransition])> for TransitionSet {
    fn from((buffers, images): (&[BufferTransition], &[ImageTransition])) -> Self {
        Self {
            buffers: buffers.to_vec(),
            images: images.to_vec(),
        }
    }
}

impl From<(Vec<BufferTransition>, Vec<ImageTransition>)> for TransitionSet {
    fn from((buffers, images): (Vec<BufferTransition>, Vec<ImageTransition>)) -> Self {
        Self { buffers, images }
    }
}

impl FromIterator<Transition> for TransitionSet {
    fn from_iter<I: IntoIterator<Item = Transition>>(iter: I) -> Self {
        let mut set = Self::new();
        for transition in iter {
            set.push(transition);
        }
        set
    }
}

/// One pipeline-barrier command: an execution dependency between two stage sets plus any
/// number of memory, buffer and image barriers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineBarrier {
    /// Stages that must complete before the barrier.
    pub src_stages: PipelineStage,
    /// Stages that wait on the barrier.
    pub dst_stages: PipelineStage,
    /// Global memory barriers.
    pub memory_barriers: Vec<MemoryBarrier>,
    /// Buffer barriers.
    pub buffer_barriers: Vec<BufferBarrier>,
    /// Image barriers.
    pub image_barriers: Vec<ImageBarrier>,
}

impl PipelineBarrier {
    /// A barrier with a single global memory dependency.
    pub fn memory(
        src_stages: PipelineStage,
        src_access: AccessFlags,
        dst_stages: PipelineStage,
        dst_access: AccessFlags,
    ) -> Self {
        Self {
            src_stages,
            dst_stages,
            memory_barriers: vec![MemoryBarrier {
                src_access,
                dst_access,
            }],
            ..Default::default()
        }
    }

    /// Number of memory, buffer and image barriers.
    pub fn barrier_count(&self) -> usize {
        self.memory_barriers.len() + self.buffer_barriers.len() + self.image_barriers.len()
    }
}

/// The result of batching a [`TransitionSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BarrierBatch {
    /// The merged barrier, `None` when every transition was elided.
    pub barrier: Option<PipelineBarrier>,
    /// How many transitions needed no synchronization.
    pub elided: usize,
}

/// Computes every transition of `set` and merges the non-trivial ones into one barrier.
///
/// The source and destination stage masks are the unions of the individual scopes; an
/// empty union falls back to `TOP_OF_PIPE` and `BOTTOM_OF_PIPE` respectively.
///
/// # Panics
/// Under the same conditions as [`compute_barrier`].
pub fn batch_transitions(set: &TransitionSet) -> BarrierBatch {
    let mut barrier = PipelineBarrier::default();
    let mut elided = 0;

    let specs = set
        .buffers
        .iter()
        .map(|t| compute_barrier(*t))
        .chain(set.images.iter().map(|t| compute_barrier(*t)));

    for spec in specs {
        match spec {
            BarrierSpec::NoOp => elided += 1,
            BarrierSpec::Buffer(b) => {
                barrier.src_stages |= b.src.stages;
                barrier.dst_stages |= b.dst.stages;
                barrier.buffer_barriers.push(b);
            }
            BarrierSpec::Image(i) => {
                barrier.src_stages |= i.src.stages;
                barrier.dst_stages |= i.dst.stages;
                barrier.image_barriers.push(i);
            }
        }
    }

    if barrier.barrier_count() == 0 {
        return BarrierBatch {
            barrier: None,
            elided,
        };
    }

    if barrier.src_stages.is_empty() {
        barrier.src_stages = PipelineStage::TOP_OF_PIPE;
    }
    if barrier.dst_stages.is_empty() {
        barrier.dst_stages = PipelineStage::BOTTOM_OF_PIPE;
    }

    BarrierBatch {
        barrier: Some(barrier),
        elided,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(index: u32) -> BufferId {
        BufferId::new(index, 1)
    }

    fn image(index: u32) -> ImageId {
        ImageId::new(index, 1)
    }

    #[test]
    fn identical_states_are_elided() {
        for state in ResourceState::ALL {
            if state == ResourceState::Undefined {
                continue;
            }
            if state.is_valid_for(ResourceKind::Image) {
                assert!(compute_barrier(ImageTransition::new(image(0), state, state)).is_noop());
            }
            if state.is_valid_for(ResourceKind::Buffer) {
                assert!(compute_barrier(BufferTransition::new(buffer(0), state, state)).is_noop());
            }
        }
    }

    #[test]
    fn image_barrier_carries_layouts() {
        let spec = compute_barrier(ImageTransition::new(
            image(1),
            ResourceState::Undefined,
            ResourceState::TransferDst,
        ));
        let BarrierSpec::Image(barrier) = spec else {
            panic!("expected an image barrier, got {spec:?}");
        };
        assert_eq!(barrier.old_layout(), ImageLayout::Undefined);
        assert_eq!(barrier.new_layout(), ImageLayout::TransferDstOptimal);
        assert_eq!(barrier.dst.access, AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.src.stages, PipelineStage::TOP_OF_PIPE);
    }

    #[test]
    #[should_panic(expected = "ResourceState::Undefined")]
    fn transition_to_undefined_panics() {
        compute_barrier(BufferTransition::new(
            buffer(0),
            ResourceState::General,
            ResourceState::Undefined,
        ));
    }

    #[test]
    #[should_panic(expected = "has no meaning for Image resources")]
    fn buffer_only_state_on_image_panics() {
        compute_barrier(ImageTransition::new(
            image(0),
            ResourceState::TransferDst,
            ResourceState::HostRead,
        ));
    }

    #[test]
    fn batch_unions_stage_masks_and_counts_elisions() {
        let set = TransitionSet::new()
            .buffer(BufferTransition::new(
                buffer(0),
                ResourceState::TransferDst,
                ResourceState::ShaderRead,
            ))
            .buffer(BufferTransition::new(
                buffer(1),
                ResourceState::ShaderRead,
                ResourceState::ShaderRead,
            ))
            .image(ImageTransition::new(
                image(0),
                ResourceState::ShaderWrite,
                ResourceState::TransferSrc,
            ));

        let batch = batch_transitions(&set);
        assert_eq!(batch.elided, 1);
        let barrier = batch.barrier.expect("two transitions need synchronization");
        assert_eq!(barrier.buffer_barriers.len(), 1);
        assert_eq!(barrier.image_barriers.len(), 1);
        assert!(barrier.src_stages.contains(PipelineStage::TRANSFER));
        assert!(barrier.src_stages.contains(PipelineStage::RAY_TRACING_SHADER));
        assert!(barrier.dst_stages.contains(PipelineStage::TRANSFER));
        assert!(barrier.dst_stages.contains(PipelineStage::COMPUTE_SHADER));
    }

    #[test]
    fn fully_elided_batch_has_no_barrier() {
        let batch = batch_transitions(&TransitionSet::from(ImageTransition::new(
            image(2),
            ResourceState::General,
            ResourceState::General,
        )));
        assert_eq!(batch.barrier, None);
        assert_eq!(batch.elided, 1);
    }

    #[test]
    fn conversions_funnel_into_one_set() {
        let b = BufferTransition::new(buffer(0), ResourceState::HostWrite, ResourceState::TransferSrc);
        let i = ImageTransition::new(image(0), ResourceState::Undefined, ResourceState::General);
        assert_eq!(TransitionSet::from(b).len(), 1);
        assert_eq!(TransitionSet::from([i, i]).len(), 2);
        let mixed: TransitionSet = (vec![b, b], vec![i]).into();
        assert_eq!(mixed.buffers.len(), 2);
        assert_eq!(mixed.images.len(), 1);
        let collected: TransitionSet = [Transition::from(b), Transition::from(i)]
            .into_iter()
            .collect();
        assert_eq!(collected, TransitionSet::new().buffer(b).image(i));
    }
}

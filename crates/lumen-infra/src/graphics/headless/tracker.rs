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

//! Per-subresource layout tracking of images, as seen by executed barriers.

use std::collections::HashMap;

use lumen_core::renderer::api::resource::{ImageId, ImageSubresourceRange};
use lumen_core::renderer::api::sync::ImageLayout;

#[derive(Debug, Clone)]
struct ImageLayouts {
    levels: u32,
    layers: u32,
    // Indexed by `layer * levels + level`.
    layouts: Vec<ImageLayout>,
}

impl ImageLayouts {
    fn index(&self, level: u32, layer: u32) -> usize {
        (layer * self.levels + level) as usize
    }
}

/// The layout each image subresource is in after the barriers executed so far.
#[derive(Debug, Default)]
pub(crate) struct StateTracker {
    images: HashMap<ImageId, ImageLayouts>,
}

/// A subresource whose tracked layout differs from the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LayoutMismatch {
    pub(crate) level: u32,
    pub(crate) layer: u32,
    pub(crate) actual: ImageLayout,
}

impl StateTracker {
    /// Starts tracking a new image, every subresource `Undefined`.
    pub(crate) fn register(&mut self, image: ImageId, levels: u32, layers: u32) {
        self.images.insert(
            image,
            ImageLayouts {
                levels,
                layers,
                layouts: vec![ImageLayout::Undefined; (levels * layers) as usize],
            },
        );
    }

    pub(crate) fn forget(&mut self, image: ImageId) {
        self.images.remove(&image);
    }

    pub(crate) fn layout(&self, image: ImageId, level: u32, layer: u32) -> Option<ImageLayout> {
        let tracked = self.images.get(&image)?;
        if level >= tracked.levels || layer >= tracked.layers {
            return None;
        }
        Some(tracked.layouts[tracked.index(level, layer)])
    }

    /// Subresources of `range` that are not in `expected`.
    pub(crate) fn mismatches(
        &self,
        image: ImageId,
        range: &ImageSubresourceRange,
        expected: ImageLayout,
    ) -> Vec<LayoutMismatch> {
        let Some(tracked) = self.images.get(&image) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for layer in range.layers(tracked.layers) {
            for level in range.levels(tracked.levels) {
                let actual = tracked.layouts[tracked.index(level, layer)];
                if actual != expected {
                    out.push(LayoutMismatch {
                        level,
                        layer,
                        actual,
                    });
                }
            }
        }
        out
    }

    /// Moves every subresource of `range` to `layout`.
    pub(crate) fn transition(
        &mut self,
        image: ImageId,
        range: &ImageSubresourceRange,
        layout: ImageLayout,
    ) {
        let Some(tracked) = self.images.get_mut(&image) else {
            return;
        };
        for layer in range.layers(tracked.layers) {
            for level in range.levels(tracked.levels) {
                let index = tracked.index(level, layer);
                tracked.layouts[index] = layout;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::renderer::api::resource::ImageAspect;

    #[test]
    fn transitions_only_touch_the_range() {
        let image = ImageId::new(0, 1);
        let mut tracker = StateTracker::default();
        tracker.register(image, 2, 3);

        let single = ImageSubresourceRange::single(ImageAspect::COLOR, 1, 2);
        tracker.transition(image, &single, ImageLayout::General);
        assert_eq!(tracker.layout(image, 1, 2), Some(ImageLayout::General));
        assert_eq!(tracker.layout(image, 0, 2), Some(ImageLayout::Undefined));

        let mismatches = tracker.mismatches(
            image,
            &ImageSubresourceRange::WHOLE_COLOR,
            ImageLayout::Undefined,
        );
        assert_eq!(
            mismatches,
            vec![LayoutMismatch {
                level: 1,
                layer: 2,
                actual: ImageLayout::General
            }]
        );
    }

    #[test]
    fn forgotten_images_are_untracked() {
        let image = ImageId::new(4, 1);
        let mut tracker = StateTracker::default();
        tracker.register(image, 1, 1);
        tracker.forget(image);
        assert_eq!(tracker.layout(image, 0, 0), None);
    }
}

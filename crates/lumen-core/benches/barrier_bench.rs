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

use criterion::{criterion_group, criterion_main, Criterion};
use lumen_core::renderer::api::command::{CommandBuffer, CommandBufferLevel, CommandBufferUsage};
use lumen_core::renderer::api::resource::{BufferId, ImageId, ResourceState};
use lumen_core::renderer::api::sync::{
    batch_transitions, BufferTransition, ImageTransition, TransitionSet,
};
use std::hint::black_box;

fn transition_set(count: u32) -> TransitionSet {
    let mut set = TransitionSet::new();
    for i in 0..count {
        set.push(BufferTransition::new(
            BufferId::new(i, 1),
            ResourceState::TransferDst,
            ResourceState::ShaderRead,
        ));
        set.push(ImageTransition::new(
            ImageId::new(i, 1),
            ResourceState::ShaderWrite,
            ResourceState::TransferSrc,
        ));
        // Every fourth image is already in place and gets elided.
        if i % 4 == 0 {
            set.push(ImageTransition::new(
                ImageId::new(count + i, 1),
                ResourceState::ShaderRead,
                ResourceState::ShaderRead,
            ));
        }
    }
    set
}

fn bench_barriers(c: &mut Criterion) {
    let mut group = c.benchmark_group("Barrier batching");

    for count in [1u32, 16, 256] {
        let set = transition_set(count);
        group.bench_function(format!("batch_transitions ({count} pairs)"), |b| {
            b.iter(|| black_box(batch_transitions(black_box(&set))));
        });
    }

    let set = transition_set(64);
    group.bench_function("record 64 pairs into a command buffer", |b| {
        b.iter(|| {
            let mut cb = CommandBuffer::detached(CommandBufferLevel::Primary);
            cb.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
            cb.resource_barrier(set.clone());
            cb.end().unwrap();
            black_box(cb.stats());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_barriers);
criterion_main!(benches);

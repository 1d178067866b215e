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

//! Backend-agnostic command recording and resource transition API.
//!
//! Organized into several logical sub-modules:
//!
//! - **[`resource`]**: Generation-checked handles, the registry, usage states and descriptors.
//! - **[`sync`]**: Stage/access masks, barrier computation and batching, fences.
//! - **[`command`]**: The command buffer and the vocabulary of recorded operations.
//! - **[`pipeline`]**: Pipelines, ray-tracing pipelines and shader binding tables.
//! - **[`acceleration`]**: Acceleration-structure descriptions and instance records.
//! - **[`core`]**: Settings and statistics.

pub mod acceleration;
pub mod command;
pub mod common;
pub mod core;
pub mod pipeline;
pub mod resource;
pub mod sync;

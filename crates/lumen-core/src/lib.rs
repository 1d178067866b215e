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

//! # Lumen Core
//!
//! Foundational crate of the raytracing backend: the resource state model, barrier
//! computation, the command buffer, pipeline and acceleration-structure descriptions,
//! and the interfaces the scene graph and concrete devices plug into.

#![warn(missing_docs)]

pub mod math;
pub mod renderer;
pub mod scene;
pub mod utils;

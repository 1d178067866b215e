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

//! Pipelines, descriptor sets, ray-tracing pipelines and shader binding tables.

mod binding;
mod descriptor;
mod ray_tracing;
mod sbt;

pub use self::binding::*;
pub use self::descriptor::*;
pub use self::ray_tracing::*;
pub use self::sbt::*;

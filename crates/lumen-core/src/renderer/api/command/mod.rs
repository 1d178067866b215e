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

//! Command recording: the command buffer, its recorded vocabulary and its device hooks.

mod backend;
mod buffer;
mod commands;
mod query;
mod types;

pub use self::backend::*;
pub use self::buffer::*;
pub use self::commands::*;
pub use self::query::*;
pub use self::types::*;

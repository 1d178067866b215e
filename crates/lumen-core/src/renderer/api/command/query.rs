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

//! Query pools.

use crate::renderer::api::resource::QueryPoolId;

/// What the slots of a query pool record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// Device timestamps, in ticks of the device timestamp period.
    Timestamp,
    /// Samples passing the depth test.
    Occlusion,
}

/// An array of query slots addressed by index. Slots must be reset before each reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryPool {
    /// The device object.
    pub id: QueryPoolId,
    /// What the slots record.
    pub ty: QueryType,
    /// Number of slots.
    pub count: u32,
}

impl QueryPool {
    /// `true` when `[first, first + count)` lies inside the pool.
    pub fn contains_range(&self, first: u32, count: u32) -> bool {
        first
            .checked_add(count)
            .is_some_and(|end| end <= self.count)
    }
}

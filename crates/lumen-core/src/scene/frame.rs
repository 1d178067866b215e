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

//! The clock that paces frame production.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Provides a monotonic time, in nanoseconds, for each new frame.
pub trait FrameAdvanceService: Send + Sync + Debug {
    /// Blocks until the next frame may start and returns its time.
    fn wait_for_next_frame(&self) -> i64;
    /// Starts the clock.
    fn start(&self);
    /// Stops the clock.
    fn stop(&self);
}

/// A clock that advances by a fixed step per frame without sleeping.
#[derive(Debug)]
pub struct FixedStepFrameAdvance {
    step_ns: i64,
    now_ns: AtomicI64,
    running: AtomicBool,
}

impl FixedStepFrameAdvance {
    /// A clock advancing `step_ns` per frame.
    pub fn new(step_ns: i64) -> Self {
        assert!(step_ns > 0, "Frame step must be positive");
        Self {
            step_ns,
            now_ns: AtomicI64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// A 60 Hz clock.
    pub fn sixty_hertz() -> Self {
        Self::new(1_000_000_000 / 60)
    }

    /// `true` between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl FrameAdvanceService for FixedStepFrameAdvance {
    fn wait_for_next_frame(&self) -> i64 {
        if !self.is_running() {
            return self.now_ns.load(Ordering::Acquire);
        }
        self.now_ns.fetch_add(self.step_ns, Ordering::AcqRel) + self.step_ns
    }

    fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_is_monotonic_while_running() {
        let clock = FixedStepFrameAdvance::new(10);
        assert_eq!(clock.wait_for_next_frame(), 0);
        clock.start();
        assert_eq!(clock.wait_for_next_frame(), 10);
        assert_eq!(clock.wait_for_next_frame(), 20);
        clock.stop();
        assert_eq!(clock.wait_for_next_frame(), 20);
    }
}

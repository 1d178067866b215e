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

//! A host-visible completion signal.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct FenceState {
    signaled: Mutex<bool>,
    cond: Condvar,
}

/// A shareable signal the device raises when a submission completed.
///
/// Clones observe the same fence. Command buffers hold one while Pending and look at it
/// lazily to find out whether they may return to the Executable state.
#[derive(Debug, Clone, Default)]
pub struct Fence {
    state: Arc<FenceState>,
}

impl Fence {
    /// Creates an unsignaled fence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fence that is already signaled.
    pub fn signaled() -> Self {
        let fence = Self::new();
        fence.signal();
        fence
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // A poisoned fence only means a signaling thread panicked after setting the flag.
        self.state
            .signaled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Raises the fence and wakes every waiter.
    pub fn signal(&self) {
        *self.lock() = true;
        self.state.cond.notify_all();
    }

    /// Lowers the fence.
    pub fn reset(&self) {
        *self.lock() = false;
    }

    /// `true` once the fence has been signaled.
    pub fn is_signaled(&self) -> bool {
        *self.lock()
    }

    /// Blocks until the fence is signaled.
    pub fn wait(&self) {
        let mut signaled = self.lock();
        while !*signaled {
            signaled = self
                .state
                .cond
                .wait(signaled)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Blocks until the fence is signaled or `timeout` elapsed. Returns whether it was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let signaled = self.lock();
        let (signaled, _) = self
            .state
            .cond
            .wait_timeout_while(signaled, timeout, |signaled| !*signaled)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *signaled
    }

    /// `true` when both values observe the same fence.
    pub fn same_as(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_returns_after_signal_from_another_thread() {
        let fence = Fence::new();
        let remote = fence.clone();
        let handle = thread::spawn(move || remote.signal());
        fence.wait();
        handle.join().unwrap();
        assert!(fence.is_signaled());
    }

    #[test]
    fn wait_timeout_reports_unsignaled() {
        let fence = Fence::new();
        assert!(!fence.wait_timeout(Duration::from_millis(5)));
        fence.signal();
        assert!(fence.wait_timeout(Duration::from_millis(5)));
        fence.reset();
        assert!(!fence.is_signaled());
    }
}

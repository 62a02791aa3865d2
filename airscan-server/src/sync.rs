// Copyright 2025 Google LLC
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

//! Asynchronous mutual exclusion with FIFO hand-off

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A non-reentrant async mutex that wakes waiters strictly in arrival order
///
/// Acquiring an uncontended mutex completes without suspending. Under
/// contention, callers queue up and each release hands the lock to the
/// longest-waiting caller. Acquiring twice from the same task without
/// releasing first never completes.
///
/// A caller that stops waiting (its acquire future is dropped) leaves the
/// queue without taking the lock.
#[derive(Debug, Clone)]
pub struct AsyncMutex {
    lock: Arc<Mutex<()>>,
}

/// Holds the lock until dropped
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct AsyncMutexGuard {
    _guard: OwnedMutexGuard<()>,
}

impl AsyncMutex {
    /// Create an unlocked mutex
    pub fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Wait for the lock
    pub async fn acquire(&self) -> AsyncMutexGuard {
        AsyncMutexGuard {
            _guard: Arc::clone(&self.lock).lock_owned().await,
        }
    }

    /// Take the lock only if it is free and nobody is queued
    pub fn try_acquire(&self) -> Option<AsyncMutexGuard> {
        Arc::clone(&self.lock)
            .try_lock_owned()
            .ok()
            .map(|guard| AsyncMutexGuard { _guard: guard })
    }

    /// Whether the lock is currently held
    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

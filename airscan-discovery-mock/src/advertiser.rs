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

//! Mock device advertiser implementation

use crate::backend::MockBackend;
use airscan_discovery::{Advertisement, DeviceAdvertiser, DiscoveryError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// Mock implementation of DeviceAdvertiser
///
/// This advertiser stores devices in an in-memory backend that answers
/// queries the way a multicast responder would.
pub struct MockAdvertiser {
    backend: MockBackend,
    advertise_calls: AtomicUsize,
    unadvertise_calls: AtomicUsize,
}

impl MockAdvertiser {
    /// Create a new mock advertiser
    ///
    /// # Example
    ///
    /// ```
    /// use airscan_discovery_mock::{MockAdvertiser, MockBackend};
    ///
    /// let backend = MockBackend::new();
    /// let advertiser = MockAdvertiser::new(backend);
    /// ```
    pub fn new(backend: MockBackend) -> Self {
        Self {
            backend,
            advertise_calls: AtomicUsize::new(0),
            unadvertise_calls: AtomicUsize::new(0),
        }
    }

    /// Backend this advertiser publishes into
    pub fn backend(&self) -> &MockBackend {
        &self.backend
    }

    /// Number of advertise calls so far
    pub fn advertise_calls(&self) -> usize {
        self.advertise_calls.load(Ordering::SeqCst)
    }

    /// Number of unadvertise calls so far
    pub fn unadvertise_calls(&self) -> usize {
        self.unadvertise_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceAdvertiser for MockAdvertiser {
    async fn advertise(&self, advertisement: &Advertisement) -> Result<(), DiscoveryError> {
        self.advertise_calls.fetch_add(1, Ordering::SeqCst);
        self.backend.announce(advertisement.clone()).await;
        Ok(())
    }

    async fn unadvertise(&self, uuid: Uuid) -> Result<(), DiscoveryError> {
        self.unadvertise_calls.fetch_add(1, Ordering::SeqCst);
        self.backend.retract(uuid).await;
        Ok(())
    }
}

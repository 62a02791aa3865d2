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

//! Shared mock backend for an in-memory DNS-SD catalog

use airscan_discovery::{Advertisement, DnsRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Event types for the mock backend
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A device was announced (unsolicited multicast)
    Announced(Advertisement),
    /// A device was retracted
    Retracted(Uuid),
}

/// Shared in-memory catalog of advertised devices
///
/// This backend is shared between `MockAdvertiser` instances and test code
/// to simulate a multicast responder in memory.
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<MockBackendInner>,
}

struct MockBackendInner {
    /// Advertised devices
    devices: RwLock<HashMap<Uuid, Advertisement>>,
    /// Event broadcast channel
    event_tx: broadcast::Sender<BackendEvent>,
}

impl MockBackend {
    /// Create a new mock backend
    ///
    /// # Example
    ///
    /// ```
    /// use airscan_discovery_mock::MockBackend;
    ///
    /// let backend = MockBackend::new();
    /// ```
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(MockBackendInner {
                devices: RwLock::new(HashMap::new()),
                event_tx,
            }),
        }
    }

    /// Announce and register a device (called by MockAdvertiser)
    pub(crate) async fn announce(&self, advertisement: Advertisement) {
        self.inner
            .devices
            .write()
            .await
            .insert(advertisement.uuid(), advertisement.clone());

        let _ = self
            .inner
            .event_tx
            .send(BackendEvent::Announced(advertisement));
    }

    /// Retract a device (called by MockAdvertiser)
    pub(crate) async fn retract(&self, uuid: Uuid) -> bool {
        let removed = self.inner.devices.write().await.remove(&uuid).is_some();
        if removed {
            let _ = self.inner.event_tx.send(BackendEvent::Retracted(uuid));
        }
        removed
    }

    /// Answer a query for a service type across all advertised devices
    pub async fn query(&self, service_type: &str) -> Vec<DnsRecord> {
        self.inner
            .devices
            .read()
            .await
            .values()
            .flat_map(|ad| ad.answer(service_type))
            .collect()
    }

    /// Answer a query for a service type, restricted to one device
    pub async fn query_device(&self, uuid: Uuid, service_type: &str) -> Vec<DnsRecord> {
        self.inner
            .devices
            .read()
            .await
            .get(&uuid)
            .map(|ad| ad.answer(service_type))
            .unwrap_or_default()
    }

    /// Current advertisement of a device
    pub async fn advertisement(&self, uuid: Uuid) -> Option<Advertisement> {
        self.inner.devices.read().await.get(&uuid).cloned()
    }

    /// Subscribe to backend events
    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Get count of advertised devices (for testing)
    pub async fn device_count(&self) -> usize {
        self.inner.devices.read().await.len()
    }

    /// Clear all devices (for testing)
    pub async fn clear(&self) {
        self.inner.devices.write().await.clear();
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airscan_discovery::AdvertiseInfo;

    fn create_test_advertisement(http_port: Option<u16>, https_port: Option<u16>) -> Advertisement {
        Advertisement::build(&AdvertiseInfo {
            uuid: Uuid::new_v4(),
            make_and_model: "Test Scanner".to_string(),
            http_port,
            https_port,
            has_icon: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_backend_announce_and_query() {
        let backend = MockBackend::new();
        backend
            .announce(create_test_advertisement(Some(10080), None))
            .await;

        assert_eq!(backend.device_count().await, 1);
        assert_eq!(backend.query("_uscan._tcp.local").await.len(), 4);
        assert!(backend.query("_uscans._tcp.local").await.is_empty());
    }

    #[tokio::test]
    async fn test_backend_retract() {
        let backend = MockBackend::new();
        let ad = create_test_advertisement(Some(10080), Some(10443));
        let uuid = ad.uuid();

        backend.announce(ad).await;
        assert!(backend.retract(uuid).await);
        assert!(!backend.retract(uuid).await);
        assert_eq!(backend.device_count().await, 0);
    }

    #[tokio::test]
    async fn test_backend_query_device_scoping() {
        let backend = MockBackend::new();
        let first = create_test_advertisement(Some(10080), None);
        let second = create_test_advertisement(None, Some(10443));
        let (first_uuid, second_uuid) = (first.uuid(), second.uuid());

        backend.announce(first).await;
        backend.announce(second).await;

        assert!(backend
            .query_device(first_uuid, "_uscans._tcp")
            .await
            .is_empty());
        assert!(!backend
            .query_device(second_uuid, "_uscans._tcp")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_backend_clear() {
        let backend = MockBackend::new();

        backend.announce(create_test_advertisement(Some(1), None)).await;
        backend.announce(create_test_advertisement(Some(2), None)).await;

        backend.clear().await;
        assert_eq!(backend.device_count().await, 0);
    }
}

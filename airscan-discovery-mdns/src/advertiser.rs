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

//! mDNS advertiser implementation

use crate::utils::service_infos_for;
use airscan_discovery::{Advertisement, DeviceAdvertiser, DiscoveryError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// mDNS-based implementation of DeviceAdvertiser
///
/// Registering a service with mdns-sd both announces it (unsolicited
/// multicast) and makes the daemon answer queries for it.
pub struct MdnsAdvertiser {
    mdns: mdns_sd::ServiceDaemon,
    /// Registered service fullnames per device
    registrations: Mutex<HashMap<Uuid, Vec<String>>>,
}

impl MdnsAdvertiser {
    /// Create a new mDNS advertiser on the standard mDNS port (5353).
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be started.
    pub fn new() -> Result<Self, DiscoveryError> {
        let mdns = mdns_sd::ServiceDaemon::new().map_err(|e| {
            DiscoveryError::PublishFailed(format!("Failed to create mDNS daemon: {e}"))
        })?;

        Ok(Self {
            mdns,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    fn unregister_all(&self, uuid: Uuid, fullnames: Vec<String>) -> Result<(), DiscoveryError> {
        let mut first_error = None;
        for fullname in fullnames {
            match self.mdns.unregister(&fullname) {
                Ok(_) => log::info!("Unpublished mDNS service: {fullname}"),
                Err(e) => {
                    log::warn!("Failed to unregister {fullname} for device {uuid}: {e}");
                    first_error.get_or_insert_with(|| {
                        DiscoveryError::UnpublishFailed(format!(
                            "Failed to unregister service {fullname}: {e}"
                        ))
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl DeviceAdvertiser for MdnsAdvertiser {
    async fn advertise(&self, advertisement: &Advertisement) -> Result<(), DiscoveryError> {
        let uuid = advertisement.uuid();

        // Re-advertising replaces whatever was registered before
        let previous = self.registrations.lock().remove(&uuid);
        if let Some(previous) = previous {
            self.unregister_all(uuid, previous)?;
        }

        let service_infos = service_infos_for(advertisement).map_err(|e| {
            DiscoveryError::PublishFailed(format!("Failed to create service info: {e}"))
        })?;

        let mut registered = Vec::with_capacity(service_infos.len());
        for service_info in service_infos {
            let fullname = service_info.get_fullname().to_string();
            let port = service_info.get_port();

            if let Err(e) = self.mdns.register(service_info) {
                // Roll back the variants already registered for this device
                let _ = self.unregister_all(uuid, registered);
                return Err(DiscoveryError::PublishFailed(format!(
                    "Failed to register service {fullname}: {e}"
                )));
            }

            log::info!(
                "Published mDNS service: {fullname} ({}:{port})",
                advertisement.host_name()
            );
            registered.push(fullname);
        }

        self.registrations.lock().insert(uuid, registered);
        Ok(())
    }

    async fn unadvertise(&self, uuid: Uuid) -> Result<(), DiscoveryError> {
        let registered = self.registrations.lock().remove(&uuid);
        match registered {
            Some(fullnames) => self.unregister_all(uuid, fullnames),
            None => Ok(()),
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        // Best-effort unpublish on drop
        let registrations: Vec<_> = self.registrations.get_mut().drain().collect();
        for (uuid, fullnames) in registrations {
            let _ = self.unregister_all(uuid, fullnames);
        }
        let _ = self.mdns.shutdown();
    }
}

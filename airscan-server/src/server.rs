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

//! Scan service orchestrator

use crate::cert::{CertificateKey, CertificateProvisioner};
use crate::config::{DeviceConfig, SecurityPolicy, ServerOptions};
use crate::supervisor::{DeviceSupervisor, RunningDevice, SharedDeviceConfig};
use crate::ServerError;
use airscan_discovery::DeviceAdvertiser;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

type DeviceSlot = Arc<tokio::sync::Mutex<Option<RunningDevice>>>;

struct DeviceEntry {
    config: SharedDeviceConfig,
    /// Holds the running device; locked for the whole start so a stop waits for it
    slot: DeviceSlot,
    token: CancellationToken,
}

struct ServerState {
    devices: HashMap<Uuid, DeviceEntry>,
    started: bool,
    shutdown: CancellationToken,
    certificate: Option<Arc<CertificateKey>>,
}

/// Publishes a set of virtual eSCL scanners
///
/// Devices can be added and removed at any time. While the server is started,
/// every device is served on its own listeners and advertised through the
/// [`DeviceAdvertiser`] given at construction.
///
/// # Example
///
/// ```no_run
/// use airscan_discovery_mock::{MockAdvertiser, MockBackend};
/// use airscan_server::{ScanServer, ServerOptions};
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), airscan_server::ServerError> {
/// let advertiser = Arc::new(MockAdvertiser::new(MockBackend::new()));
/// let server = ScanServer::new(ServerOptions::default(), advertiser);
/// server.start().await?;
/// // ... add devices ...
/// server.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ScanServer {
    options: ServerOptions,
    supplied_certificate: Option<Arc<CertificateKey>>,
    advertiser: Arc<dyn DeviceAdvertiser>,
    provisioner: CertificateProvisioner,
    state: Mutex<ServerState>,
}

impl ScanServer {
    pub fn new(options: ServerOptions, advertiser: Arc<dyn DeviceAdvertiser>) -> Self {
        Self::with_provisioner(options, advertiser, CertificateProvisioner::new())
    }

    /// Create a server with a custom certificate provisioner
    pub fn with_provisioner(
        options: ServerOptions,
        advertiser: Arc<dyn DeviceAdvertiser>,
        provisioner: CertificateProvisioner,
    ) -> Self {
        let supplied_certificate = options.certificate.clone().map(Arc::new);
        Self {
            options,
            supplied_certificate,
            advertiser,
            provisioner,
            state: Mutex::new(ServerState {
                devices: HashMap::new(),
                started: false,
                shutdown: CancellationToken::new(),
                certificate: None,
            }),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Certificate used for HTTPS, once started
    pub fn certificate(&self) -> Option<Arc<CertificateKey>> {
        self.state.lock().certificate.clone()
    }

    /// Registered device identifiers
    pub fn devices(&self) -> Vec<Uuid> {
        self.state.lock().devices.keys().copied().collect()
    }

    /// Current configuration of a device, including bound ports
    pub fn device_config(&self, uuid: Uuid) -> Option<DeviceConfig> {
        let state = self.state.lock();
        let entry = state.devices.get(&uuid)?;
        let config = entry.config.lock().clone();
        Some(config)
    }

    /// `(http_port, tls_port)` of a device; bound ports once it has started
    pub fn device_ports(&self, uuid: Uuid) -> Option<(u16, u16)> {
        self.device_config(uuid)
            .map(|config| (config.port, config.tls_port))
    }

    /// Register a device
    ///
    /// If the server is started, the device is started in the background and
    /// this call returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if a device with the same UUID is
    /// already registered.
    pub fn add_device(&self, config: DeviceConfig) -> Result<(), ServerError> {
        let uuid = config.uuid;
        let mut state = self.state.lock();
        if state.devices.contains_key(&uuid) {
            return Err(ServerError::Config(format!(
                "Device {uuid} is already registered"
            )));
        }

        let entry = DeviceEntry {
            config: Arc::new(Mutex::new(config)),
            slot: DeviceSlot::default(),
            token: state.shutdown.child_token(),
        };
        if state.started {
            self.spawn_device_start(&entry, state.certificate.clone());
        }
        state.devices.insert(uuid, entry);
        debug!(device = %uuid, "Registered device");
        Ok(())
    }

    /// Unregister a device, stopping it first if it is running
    ///
    /// Returns `false` if no such device is registered. Other devices are
    /// not affected.
    pub async fn remove_device(&self, uuid: Uuid) -> bool {
        let Some(entry) = self.state.lock().devices.remove(&uuid) else {
            return false;
        };
        entry.token.cancel();
        stop_slot(&entry.slot).await;
        debug!(device = %uuid, "Removed device");
        true
    }

    /// Start serving every registered device
    ///
    /// The security policy is validated and the certificate obtained before
    /// any listener is bound. Devices start in parallel; a device that fails
    /// to start does not affect the others.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` for an inconsistent policy, in which
    /// case nothing is started. Otherwise returns the first device start
    /// failure, if any, after every device has been attempted.
    pub async fn start(&self) -> Result<(), ServerError> {
        let policy = self.options.security_policy;
        policy.validate(self.supplied_certificate.as_deref())?;

        let certificate = if policy.allows_https() {
            self.provisioner
                .get_or_create(self.supplied_certificate.as_ref())
                .await
        } else {
            None
        };
        if policy.contains(SecurityPolicy::REQUIRE_HTTPS) && certificate.is_none() {
            return Err(ServerError::Config(
                "REQUIRE_HTTPS is set but no certificate is available".into(),
            ));
        }

        let tasks: Vec<JoinHandle<Result<(), ServerError>>> = {
            let mut state = self.state.lock();
            if state.started {
                return Ok(());
            }
            state.started = true;
            state.shutdown = CancellationToken::new();
            state.certificate = certificate.clone();

            let shutdown = state.shutdown.clone();
            state
                .devices
                .values_mut()
                .map(|entry| {
                    entry.token = shutdown.child_token();
                    self.spawn_device_start(entry, certificate.clone())
                })
                .collect()
        };
        info!(devices = tasks.len(), "Starting scan server");

        let mut first_error = None;
        for result in futures::future::join_all(tasks).await {
            let result = result.unwrap_or_else(|e| {
                Err(ServerError::Io(std::io::Error::other(format!(
                    "Device start task failed: {e}"
                ))))
            });
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop every device
    ///
    /// Devices stay registered and are started again by the next
    /// [`start`](Self::start).
    pub async fn stop(&self) {
        let slots: Vec<DeviceSlot> = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            state.started = false;
            state.shutdown.cancel();
            state
                .devices
                .values()
                .map(|entry| Arc::clone(&entry.slot))
                .collect()
        };

        futures::future::join_all(slots.iter().map(|slot| stop_slot(slot))).await;
        info!("Scan server stopped");
    }

    fn spawn_device_start(
        &self,
        entry: &DeviceEntry,
        certificate: Option<Arc<CertificateKey>>,
    ) -> JoinHandle<Result<(), ServerError>> {
        let supervisor = DeviceSupervisor::new(
            Arc::clone(&entry.config),
            self.options.security_policy,
            self.options.bind_address,
            self.options.job_cleanup,
            certificate,
            Arc::clone(&self.advertiser),
        );
        let slot = Arc::clone(&entry.slot);
        let token = entry.token.clone();
        let uuid = entry.config.lock().uuid;

        tokio::spawn(async move {
            let mut slot = slot.lock().await;
            match supervisor.start(token).await {
                Ok(running) => {
                    *slot = Some(running);
                    Ok(())
                }
                Err(ServerError::Cancelled) => {
                    debug!(device = %uuid, "Device start cancelled");
                    Ok(())
                }
                Err(e) => {
                    error!(device = %uuid, "Failed to start device: {e}");
                    Err(e)
                }
            }
        })
    }
}

async fn stop_slot(slot: &DeviceSlot) {
    let running = slot.lock().await.take();
    if let Some(running) = running {
        running.stop().await;
    }
}

impl fmt::Debug for ScanServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScanServer")
            .field("options", &self.options)
            .field("devices", &state.devices.len())
            .field("started", &state.started)
            .finish_non_exhaustive()
    }
}

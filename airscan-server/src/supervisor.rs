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

//! Per-device server lifecycle
//!
//! A [`DeviceSupervisor`] brings one device from configured to serving: it
//! binds the enabled listeners, writes the bound ports back to the shared
//! [`DeviceConfig`] and advertises the device once. [`RunningDevice::stop`]
//! reverses this, retracting the advertisement only after the listeners have
//! shut down.

use crate::api::{self, DeviceContext};
use crate::cert::CertificateKey;
use crate::config::{DeviceConfig, SecurityPolicy};
use crate::jobs::{JobCleanupConfig, JobTable};
use crate::port::{bind_tcp, run_with_port};
use crate::ServerError;
use airscan_discovery::{AdvertiseInfo, Advertisement, DeviceAdvertiser};
use axum_server::tls_rustls::RustlsConfig;
use parking_lot::Mutex;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Grace period for in-flight requests on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Extra wait for a listener to return after its grace period ends
const LISTENER_ABORT_SLACK: Duration = Duration::from_secs(1);

/// Device configuration shared between the orchestrator and the supervisor
pub type SharedDeviceConfig = Arc<Mutex<DeviceConfig>>;

/// Starts one device
pub struct DeviceSupervisor {
    config: SharedDeviceConfig,
    policy: SecurityPolicy,
    bind_address: IpAddr,
    job_cleanup: JobCleanupConfig,
    certificate: Option<Arc<CertificateKey>>,
    advertiser: Arc<dyn DeviceAdvertiser>,
}

impl DeviceSupervisor {
    pub fn new(
        config: SharedDeviceConfig,
        policy: SecurityPolicy,
        bind_address: IpAddr,
        job_cleanup: JobCleanupConfig,
        certificate: Option<Arc<CertificateKey>>,
        advertiser: Arc<dyn DeviceAdvertiser>,
    ) -> Self {
        Self {
            config,
            policy,
            bind_address,
            job_cleanup,
            certificate,
            advertiser,
        }
    }

    /// Bind listeners, mount the eSCL API and advertise the device
    ///
    /// `token` is the device's cancellation token; cancelling it aborts port
    /// retries and stops the listeners.
    ///
    /// # Errors
    ///
    /// Fails if a listener cannot be bound within the retry ceiling, if `token`
    /// is cancelled during startup, or if advertising fails. Listeners that
    /// were already started are shut down before the error is returned.
    pub async fn start(&self, token: CancellationToken) -> Result<RunningDevice, ServerError> {
        if token.is_cancelled() {
            return Err(ServerError::Cancelled);
        }
        let config = self.config.lock().clone();
        let uuid = config.uuid;
        let context = Arc::new(DeviceContext::new(
            &config,
            self.job_cleanup,
            token.child_token(),
        ));
        let allow_cors = self.policy.contains(SecurityPolicy::ALLOW_CORS);

        let mut running = RunningDevice {
            uuid,
            token: token.clone(),
            listeners: Vec::new(),
            jobs: context.jobs().clone(),
            advertiser: Arc::clone(&self.advertiser),
            http_port: None,
            https_port: None,
            advertised: false,
        };

        if self.policy.allows_http() {
            match self.start_http(&config, &context, allow_cors, &token).await {
                Ok((port, task)) => {
                    running.http_port = Some(port);
                    running.listeners.push(task);
                }
                Err(e) => {
                    running.shutdown_listeners().await;
                    return Err(e);
                }
            }
        }

        if let Some(certificate) = self.certificate.as_ref().filter(|_| self.policy.allows_https()) {
            match self
                .start_https(&config, &context, certificate, allow_cors, &token)
                .await
            {
                Ok((port, task)) => {
                    running.https_port = Some(port);
                    running.listeners.push(task);
                }
                Err(e) => {
                    running.shutdown_listeners().await;
                    return Err(e);
                }
            }
        }

        {
            let mut shared = self.config.lock();
            if let Some(port) = running.http_port {
                shared.port = port;
            }
            if let Some(port) = running.https_port {
                shared.tls_port = port;
            }
        }

        if running.http_port.is_none() && running.https_port.is_none() {
            warn!(device = %uuid, "No protocol enabled, device is not served");
            return Ok(running);
        }

        let info = AdvertiseInfo {
            uuid,
            make_and_model: config.capabilities.make_and_model.clone(),
            http_port: running.http_port,
            https_port: running.https_port,
            has_icon: config.capabilities.icon_png.is_some(),
        };
        let advertised = match Advertisement::build(&info) {
            Ok(advertisement) => self.advertiser.advertise(&advertisement).await,
            Err(e) => Err(e),
        };
        if let Err(e) = advertised {
            running.shutdown_listeners().await;
            return Err(e.into());
        }
        running.advertised = true;

        info!(
            device = %uuid,
            http_port = ?running.http_port,
            https_port = ?running.https_port,
            "Device started"
        );
        Ok(running)
    }

    async fn start_http(
        &self,
        config: &DeviceConfig,
        context: &Arc<DeviceContext>,
        allow_cors: bool,
        token: &CancellationToken,
    ) -> Result<(u16, JoinHandle<()>), ServerError> {
        let address = self.bind_address;
        let (_, (listener, port)) =
            run_with_port(config.port, |port| bind_tcp(address, port), token).await?;

        let app = api::router(Arc::clone(context), "http", allow_cors);
        let shutdown = token.clone();
        let uuid = config.uuid;
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            match result {
                Ok(()) => debug!(device = %uuid, port, "HTTP listener stopped"),
                Err(e) => error!(device = %uuid, port, "HTTP listener failed: {e}"),
            }
        });
        Ok((port, task))
    }

    async fn start_https(
        &self,
        config: &DeviceConfig,
        context: &Arc<DeviceContext>,
        certificate: &CertificateKey,
        allow_cors: bool,
        token: &CancellationToken,
    ) -> Result<(u16, JoinHandle<()>), ServerError> {
        let tls = RustlsConfig::from_config(Arc::new(certificate.rustls_server_config()?));
        let address = self.bind_address;
        let (_, (listener, port)) =
            run_with_port(config.tls_port, |port| bind_tcp(address, port), token).await?;
        let listener = listener.into_std()?;

        let app = api::router(Arc::clone(context), "https", allow_cors);
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let shutdown = token.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        let uuid = config.uuid;
        let task = tokio::spawn(async move {
            let result = axum_server::from_tcp_rustls(listener, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await;
            match result {
                Ok(()) => debug!(device = %uuid, port, "HTTPS listener stopped"),
                Err(e) => error!(device = %uuid, port, "HTTPS listener failed: {e}"),
            }
        });
        Ok((port, task))
    }
}

/// A device that is being served
pub struct RunningDevice {
    uuid: Uuid,
    token: CancellationToken,
    listeners: Vec<JoinHandle<()>>,
    jobs: JobTable,
    advertiser: Arc<dyn DeviceAdvertiser>,
    http_port: Option<u16>,
    https_port: Option<u16>,
    advertised: bool,
}

impl fmt::Debug for RunningDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningDevice")
            .field("uuid", &self.uuid)
            .field("http_port", &self.http_port)
            .field("https_port", &self.https_port)
            .field("advertised", &self.advertised)
            .finish_non_exhaustive()
    }
}

impl RunningDevice {
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Bound HTTP port, if HTTP is served
    pub fn http_port(&self) -> Option<u16> {
        self.http_port
    }

    /// Bound HTTPS port, if HTTPS is served
    pub fn https_port(&self) -> Option<u16> {
        self.https_port
    }

    /// Jobs of this device
    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    /// Stop the listeners, then retract the advertisement
    ///
    /// Jobs are dropped once the listeners are down.
    pub async fn stop(mut self) {
        self.shutdown_listeners().await;
        self.jobs.clear();

        if self.advertised {
            if let Err(e) = self.advertiser.unadvertise(self.uuid).await {
                warn!(device = %self.uuid, "Failed to retract advertisement: {e}");
            }
        }
        info!(device = %self.uuid, "Device stopped");
    }

    /// Cancel the listeners and wait for them to drain
    ///
    /// A listener still busy after the grace period is aborted, so a request
    /// stuck in the scan engine cannot hold up the stop.
    async fn shutdown_listeners(&mut self) {
        self.token.cancel();
        let deadline = Instant::now() + SHUTDOWN_GRACE + LISTENER_ABORT_SLACK;
        for mut task in self.listeners.drain(..) {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(device = %self.uuid, "Listener task failed: {e}"),
                Err(_) => {
                    warn!(device = %self.uuid, "Listener did not drain in time, aborting");
                    task.abort();
                    let _ = task.await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Capabilities;
    use crate::jobs::{ScanJob, ScanJobFactory};
    use crate::settings::ScanSettings;
    use airscan_discovery::DiscoveryError;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;

    struct NoJobs;

    #[async_trait]
    impl ScanJobFactory for NoJobs {
        async fn create_job(&self, _settings: &ScanSettings) -> anyhow::Result<Box<dyn ScanJob>> {
            anyhow::bail!("no scanner attached")
        }
    }

    /// Records whether the advertised port accepted connections at each call
    #[derive(Default)]
    struct ReachabilityAdvertiser {
        port: Mutex<Option<u16>>,
        reachable_on_advertise: Mutex<Option<bool>>,
        reachable_on_unadvertise: Mutex<Option<bool>>,
    }

    async fn reachable(port: u16) -> bool {
        tokio::net::TcpStream::connect((Ipv4Addr::LOCALHOST, port))
            .await
            .is_ok()
    }

    #[async_trait]
    impl DeviceAdvertiser for ReachabilityAdvertiser {
        async fn advertise(&self, advertisement: &Advertisement) -> Result<(), DiscoveryError> {
            let port = advertisement.primary().port;
            *self.port.lock() = Some(port);
            let ok = reachable(port).await;
            *self.reachable_on_advertise.lock() = Some(ok);
            Ok(())
        }

        async fn unadvertise(&self, _uuid: Uuid) -> Result<(), DiscoveryError> {
            let port = self.port.lock().unwrap_or(0);
            let ok = reachable(port).await;
            *self.reachable_on_unadvertise.lock() = Some(ok);
            Ok(())
        }
    }

    fn supervisor(
        policy: SecurityPolicy,
        advertiser: Arc<dyn DeviceAdvertiser>,
    ) -> (DeviceSupervisor, SharedDeviceConfig) {
        let config = Arc::new(Mutex::new(DeviceConfig::new(
            Uuid::new_v4(),
            Capabilities::new("Reachability"),
            Arc::new(NoJobs),
        )));
        let supervisor = DeviceSupervisor::new(
            Arc::clone(&config),
            policy,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            JobCleanupConfig::default(),
            None,
            advertiser,
        );
        (supervisor, config)
    }

    #[tokio::test]
    async fn test_advertise_after_bind_and_unadvertise_after_unbind() {
        let advertiser = Arc::new(ReachabilityAdvertiser::default());
        let (supervisor, config) = supervisor(SecurityPolicy::empty(), advertiser.clone());

        let running = supervisor.start(CancellationToken::new()).await.unwrap();
        let port = running.http_port().unwrap();
        assert_eq!(config.lock().port, port);
        assert_eq!(running.https_port(), None, "no certificate, no HTTPS");
        assert_eq!(*advertiser.reachable_on_advertise.lock(), Some(true));

        running.stop().await;
        assert_eq!(*advertiser.reachable_on_unadvertise.lock(), Some(false));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_start() {
        let advertiser = Arc::new(ReachabilityAdvertiser::default());
        let (supervisor, _) = supervisor(SecurityPolicy::empty(), advertiser.clone());

        let token = CancellationToken::new();
        token.cancel();
        let err = supervisor.start(token).await.unwrap_err();
        assert!(matches!(err, ServerError::Cancelled));
        assert!(advertiser.port.lock().is_none());
    }

    #[tokio::test]
    async fn test_nothing_to_serve_is_not_advertised() {
        let advertiser = Arc::new(ReachabilityAdvertiser::default());
        let (supervisor, _) = supervisor(SecurityPolicy::REQUIRE_HTTPS, advertiser.clone());

        let running = supervisor.start(CancellationToken::new()).await.unwrap();
        assert_eq!(running.http_port(), None);
        assert_eq!(running.https_port(), None);
        running.stop().await;

        assert!(advertiser.reachable_on_advertise.lock().is_none());
        assert!(advertiser.reachable_on_unadvertise.lock().is_none());
    }
}

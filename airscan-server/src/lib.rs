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

//! eSCL (AirScan) scan service publisher
//!
//! Exposes virtual network scanners over HTTP and HTTPS and advertises them
//! through DNS-SD so driverless scan clients can find them.
//!
//! # Architecture
//!
//! - [`ScanServer`] owns the device map, validates the [`SecurityPolicy`] and
//!   provisions the shared TLS certificate
//! - one [`DeviceSupervisor`] per device binds listeners (with port fallback),
//!   mounts the eSCL API and advertises the device
//! - each device keeps its scan jobs in a [`JobTable`]; the scan engine itself
//!   is supplied by the host through [`ScanJobFactory`] and [`ScanJob`]
//! - advertisement goes through the [`DeviceAdvertiser`] trait, implemented by
//!   `airscan-discovery-mdns` for real networks

#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod api;
pub mod cert;
pub mod config;
mod error;
pub mod jobs;
pub mod port;
mod server;
pub mod settings;
pub mod supervisor;
pub mod sync;

pub use airscan_discovery::{DeviceAdvertiser, DiscoveryError};
pub use cert::{CertificateKey, CertificateOrigin, CertificateProvisioner, Fingerprint};
pub use config::{Capabilities, DeviceConfig, SecurityPolicy, ServerOptions};
pub use error::ServerError;
pub use jobs::{
    JobCleanupConfig, JobInfo, JobState, JobTable, ScanJob, ScanJobFactory, StatusCallback,
    StatusTransition,
};
pub use server::ScanServer;
pub use settings::{ColorMode, InputSource, ScanRegion, ScanSettings, SettingsError};
pub use supervisor::{DeviceSupervisor, RunningDevice};
pub use sync::{AsyncMutex, AsyncMutexGuard};

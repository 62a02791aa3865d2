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

//! Device and server configuration

use crate::cert::{CertificateKey, CertificateOrigin};
use crate::jobs::{JobCleanupConfig, ScanJobFactory};
use crate::ServerError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use uuid::Uuid;

/// eSCL version reported in the capabilities document
pub const DEFAULT_ESCL_VERSION: &str = "2.63";

/// Global security policy flags
///
/// Flags are independent bits; combine them with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SecurityPolicy(u8);

impl SecurityPolicy {
    /// Only serve HTTPS; never open a plain HTTP listener
    pub const REQUIRE_HTTPS: Self = Self(1 << 0);
    /// Never serve HTTPS
    pub const DISABLE_HTTPS: Self = Self(1 << 1);
    /// Refuse to start with a generated (self-signed) certificate
    pub const REQUIRE_TRUSTED_CERTIFICATE: Self = Self(1 << 2);
    /// Answer cross-origin requests (browser-based clients)
    pub const ALLOW_CORS: Self = Self(1 << 3);

    /// No flags set
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether no flag is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every flag of `other` is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether a plain HTTP listener may be opened
    pub const fn allows_http(self) -> bool {
        !self.contains(Self::REQUIRE_HTTPS)
    }

    /// Whether an HTTPS listener may be opened
    pub const fn allows_https(self) -> bool {
        !self.contains(Self::DISABLE_HTTPS)
    }

    /// Check the policy for internal consistency and against the embedder-supplied certificate
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if `REQUIRE_HTTPS` and `DISABLE_HTTPS` are both
    /// set, or if `REQUIRE_TRUSTED_CERTIFICATE` is set without a supplied certificate.
    pub fn validate(self, certificate: Option<&CertificateKey>) -> Result<(), ServerError> {
        if self.contains(Self::REQUIRE_HTTPS) && self.contains(Self::DISABLE_HTTPS) {
            return Err(ServerError::Config(
                "REQUIRE_HTTPS and DISABLE_HTTPS are mutually exclusive".into(),
            ));
        }
        if self.contains(Self::REQUIRE_TRUSTED_CERTIFICATE) {
            match certificate {
                Some(cert) if cert.origin == CertificateOrigin::Supplied => {}
                _ => {
                    return Err(ServerError::Config(
                        "REQUIRE_TRUSTED_CERTIFICATE needs a certificate supplied by the host"
                            .into(),
                    ))
                }
            }
        }
        Ok(())
    }
}

impl BitOr for SecurityPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SecurityPolicy {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Static scanner description served in `ScannerCapabilities`
#[derive(Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// eSCL version (`pwg:Version`)
    pub version: String,
    /// Make and model (`pwg:MakeAndModel`, `ty=` TXT field)
    pub make_and_model: String,
    /// Serial number (`pwg:SerialNumber`)
    pub serial_number: String,
    /// PNG icon served at `/eSCL/icon.png`
    pub icon_png: Option<Vec<u8>>,
}

impl Capabilities {
    /// Capabilities with the default eSCL version, no serial number and no icon
    pub fn new(make_and_model: impl Into<String>) -> Self {
        Self {
            version: DEFAULT_ESCL_VERSION.to_string(),
            make_and_model: make_and_model.into(),
            serial_number: String::new(),
            icon_png: None,
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("version", &self.version)
            .field("make_and_model", &self.make_and_model)
            .field("serial_number", &self.serial_number)
            .field("icon_png", &self.icon_png.as_ref().map(Vec::len))
            .finish()
    }
}

/// One advertised virtual scanner
///
/// `port` and `tls_port` are the preferred ports (0 = assign dynamically). Once a
/// listener is bound the server writes the actual port back, so
/// [`ScanServer::device_config`](crate::ScanServer::device_config) always reports
/// the ports that are really in use.
#[derive(Clone)]
pub struct DeviceConfig {
    /// Stable device identity
    pub uuid: Uuid,
    /// Scanner description
    pub capabilities: Capabilities,
    /// HTTP port (0 = dynamic)
    pub port: u16,
    /// HTTPS port (0 = dynamic)
    pub tls_port: u16,
    /// Creates the scan engine job for each accepted scan request
    pub create_job: Arc<dyn ScanJobFactory>,
}

impl DeviceConfig {
    /// Device with dynamic ports
    pub fn new(uuid: Uuid, capabilities: Capabilities, create_job: Arc<dyn ScanJobFactory>) -> Self {
        Self {
            uuid,
            capabilities,
            port: 0,
            tls_port: 0,
            create_job,
        }
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("uuid", &self.uuid)
            .field("capabilities", &self.capabilities)
            .field("port", &self.port)
            .field("tls_port", &self.tls_port)
            .finish_non_exhaustive()
    }
}

/// Server-wide options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Security policy applied to every device
    pub security_policy: SecurityPolicy,
    /// Host-supplied TLS identity; a self-signed one is generated when absent
    pub certificate: Option<CertificateKey>,
    /// Address every listener binds to
    pub bind_address: IpAddr,
    /// Job table cleanup timing
    pub job_cleanup: JobCleanupConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            security_policy: SecurityPolicy::empty(),
            certificate: None,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            job_cleanup: JobCleanupConfig::default(),
        }
    }
}

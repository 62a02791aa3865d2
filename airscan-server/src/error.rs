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

//! Error types for the scan server

use airscan_discovery::DiscoveryError;

/// Errors that can occur while starting or running the scan server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Inconsistent or unsatisfiable configuration; fatal at start
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No port could be bound within the retry ceiling
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Startup was cancelled before a listener could be bound
    #[error("Operation cancelled")]
    Cancelled,

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Advertisement failed
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Whether this is a configuration error (as opposed to a runtime failure)
    pub fn is_config(&self) -> bool {
        matches!(self, ServerError::Config(_))
    }
}

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

//! Device advertiser trait

use crate::{Advertisement, DiscoveryError};
use async_trait::async_trait;
use uuid::Uuid;

/// Advertises eSCL scanners on the local network
///
/// One advertiser is shared by every device of a process, so implementations
/// track their registrations per device UUID. A single [`Advertisement`] may
/// map onto more than one registration in the underlying responder (one per
/// service type), and [`DeviceAdvertiser::unadvertise`] must retract all of them.
#[async_trait]
pub trait DeviceAdvertiser: Send + Sync {
    /// Announce the device and start answering queries for it
    ///
    /// Advertising a device that is already advertised replaces the previous
    /// registrations.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::PublishFailed` if the records cannot be registered.
    async fn advertise(&self, advertisement: &Advertisement) -> Result<(), DiscoveryError>;

    /// Retract every registration made for the device
    ///
    /// Unadvertising a device that is not advertised is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::UnpublishFailed` if a registration cannot be removed.
    async fn unadvertise(&self, uuid: Uuid) -> Result<(), DiscoveryError>;
}

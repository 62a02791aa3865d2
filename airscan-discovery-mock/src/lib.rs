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

//! Mock implementation of eSCL discovery for testing
//!
//! This crate provides an in-memory responder that answers DNS-SD queries the
//! way a multicast responder would, useful for testing advertisement without
//! requiring actual mDNS networking.
//!
//! # Example
//!
//! ```
//! use airscan_discovery::{AdvertiseInfo, Advertisement, DeviceAdvertiser};
//! use airscan_discovery_mock::{MockAdvertiser, MockBackend};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MockBackend::new();
//! let advertiser = MockAdvertiser::new(backend.clone());
//!
//! let info = AdvertiseInfo {
//!     uuid: uuid::Uuid::new_v4(),
//!     make_and_model: "Test Scanner".to_string(),
//!     http_port: Some(9801),
//!     https_port: Some(9802),
//!     has_icon: false,
//! };
//! advertiser.advertise(&Advertisement::build(&info)?).await?;
//!
//! // Either service type resolves to both variants
//! assert_eq!(backend.query("_uscans._tcp.local").await.len(), 7);
//! # Ok(())
//! # }
//! ```

mod advertiser;
mod backend;

pub use advertiser::MockAdvertiser;
pub use backend::{BackendEvent, MockBackend};

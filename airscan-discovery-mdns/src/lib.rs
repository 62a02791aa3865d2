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

//! mDNS implementation of eSCL discovery using mdns-sd
//!
//! This crate provides the production implementation of
//! [`DeviceAdvertiser`](airscan_discovery::DeviceAdvertiser) using the `mdns-sd`
//! library for multicast DNS service discovery.
//!
//! `mdns-sd` tracks exactly one record set per registered service name and
//! answers a browse only with the instances of the browsed type. A device served
//! over both HTTP and HTTPS is therefore registered four times on one host name:
//! each variant under its own service type and once more under the other one.
//! All registrations are tracked under the device UUID so that unadvertising
//! removes them together.
//!
//! # Example
//!
//! ```no_run
//! use airscan_discovery::{AdvertiseInfo, Advertisement, DeviceAdvertiser};
//! use airscan_discovery_mdns::MdnsAdvertiser;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let advertiser = MdnsAdvertiser::new()?;
//!
//! let info = AdvertiseInfo {
//!     uuid: uuid::Uuid::new_v4(),
//!     make_and_model: "My Scanner".to_string(),
//!     http_port: Some(9801),
//!     https_port: None,
//!     has_icon: false,
//! };
//!
//! advertiser.advertise(&Advertisement::build(&info)?).await?;
//! # Ok(())
//! # }
//! ```

mod advertiser;
mod utils;

pub use advertiser::MdnsAdvertiser;

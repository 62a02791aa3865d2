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

//! eSCL scanner discovery
//!
//! This crate provides the types and traits for advertising eSCL ("AirScan")
//! scanners on the local network using DNS-SD (mDNS). It defines the record
//! synthesis without being tied to a specific mDNS implementation.
//!
//! ## Architecture
//!
//! - **Record synthesis**: [`Advertisement::build`] turns a device description into
//!   the complete set of PTR/SRV/TXT/NSEC records, including the dual HTTP+HTTPS case
//! - **Core trait**: [`DeviceAdvertiser`] for publishing and retracting a device
//! - **Pluggable backends**: Implementations are provided in separate crates
//!   (`airscan-discovery-mdns`, `airscan-discovery-mock`)
//!
//! ## Dual-protocol advertisement
//!
//! A scanner reachable over both HTTP and HTTPS is advertised under both
//! `_uscan._tcp` and `_uscans._tcp` with one shared host name. Querying either
//! service type resolves to both variants:
//!
//! ```text
//! _uscan._tcp.local  -> PTR/SRV/TXT (http port) + PTR/SRV/TXT (https port) + NSEC
//! _uscans._tcp.local -> same record set
//! ```

pub mod advertisement;
pub mod advertiser;
pub mod error;

pub use advertisement::{
    AdvertiseInfo, Advertisement, DnsRecord, RecordType, ServiceKind, ServiceProfile, TxtRecords,
};
pub use advertiser::DeviceAdvertiser;
pub use error::DiscoveryError;

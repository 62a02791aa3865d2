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

//! DNS-SD record synthesis for eSCL scanners
//!
//! Everything in this module is a pure function of the device description:
//! the same [`AdvertiseInfo`] always produces the same [`Advertisement`]. Backends
//! only translate the result into their own registration calls.

use crate::DiscoveryError;
use uuid::Uuid;

/// mDNS domain every record lives in
pub const DOMAIN: &str = "local";

/// Path of the scanner icon relative to the listener root
pub const ICON_PATH: &str = "/eSCL/icon.png";

/// Maximum instance name length (RFC 1035 label limit)
const MAX_INSTANCE_NAME_LEN: usize = 63;

/// Transport variant of an eSCL service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Plain HTTP, advertised as `_uscan._tcp`
    Http,
    /// HTTP over TLS, advertised as `_uscans._tcp`
    Https,
}

impl ServiceKind {
    /// DNS-SD service type without the domain
    pub const fn service_type(self) -> &'static str {
        match self {
            ServiceKind::Http => "_uscan._tcp",
            ServiceKind::Https => "_uscans._tcp",
        }
    }

    /// URL scheme clients use to reach this variant
    pub const fn scheme(self) -> &'static str {
        match self {
            ServiceKind::Http => "http",
            ServiceKind::Https => "https",
        }
    }

    /// Service type qualified with the mDNS domain (e.g. `_uscan._tcp.local`)
    pub fn qualified_type(self) -> String {
        format!("{}.{DOMAIN}", self.service_type())
    }

    /// Match a query name against this service type
    ///
    /// Accepts the bare type, the domain-qualified type and the fully
    /// qualified form with a trailing dot.
    pub fn matches(self, query: &str) -> bool {
        let query = query.trim_end_matches('.');
        let query = query
            .strip_suffix(&format!(".{DOMAIN}"))
            .unwrap_or(query);
        query.eq_ignore_ascii_case(self.service_type())
    }
}

/// Information needed to advertise one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseInfo {
    /// Stable device identity
    pub uuid: Uuid,

    /// Human-readable make and model (`ty=` TXT field, instance name)
    pub make_and_model: String,

    /// Bound HTTP port, `None` if HTTP is not served
    pub http_port: Option<u16>,

    /// Bound HTTPS port, `None` if HTTPS is not served
    pub https_port: Option<u16>,

    /// Whether the device serves an icon at [`ICON_PATH`]
    pub has_icon: bool,
}

/// DNS record types referenced by the synthesized records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Ptr,
    Srv,
    Txt,
    Nsec,
}

/// A synthesized DNS resource record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRecord {
    /// Service type -> service instance
    Ptr { name: String, target: String },
    /// Service instance -> host and port
    Srv {
        name: String,
        target: String,
        port: u16,
    },
    /// Service instance metadata
    Txt { name: String, entries: Vec<String> },
    /// Negative existence: `absent` record types do not exist under `name`
    Nsec {
        name: String,
        absent: Vec<RecordType>,
    },
}

impl DnsRecord {
    /// Owner name of the record
    pub fn name(&self) -> &str {
        match self {
            DnsRecord::Ptr { name, .. }
            | DnsRecord::Srv { name, .. }
            | DnsRecord::Txt { name, .. }
            | DnsRecord::Nsec { name, .. } => name,
        }
    }

    /// Type of the record
    pub fn record_type(&self) -> RecordType {
        match self {
            DnsRecord::Ptr { .. } => RecordType::Ptr,
            DnsRecord::Srv { .. } => RecordType::Srv,
            DnsRecord::Txt { .. } => RecordType::Txt,
            DnsRecord::Nsec { .. } => RecordType::Nsec,
        }
    }
}

/// eSCL TXT record data
///
/// Entries are kept in wire order; keys are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecords {
    entries: Vec<(String, String)>,
}

impl TxtRecords {
    /// Build the TXT entries for one service variant
    ///
    /// The `representation` entry (icon URL) is only present when the device has an icon.
    pub fn for_service(info: &AdvertiseInfo, kind: ServiceKind, host_name: &str, port: u16) -> Self {
        let mut entries: Vec<(String, String)> = vec![
            ("txtvers".into(), "1".into()),
            ("Vers".into(), "2.0".into()),
        ];
        if info.has_icon {
            entries.push((
                "representation".into(),
                format!("{}://{host_name}:{port}{ICON_PATH}", kind.scheme()),
            ));
        }
        entries.extend([
            ("rs".into(), "eSCL".into()),
            ("ty".into(), info.make_and_model.clone()),
            ("pdl".into(), "application/pdf,image/jpeg,image/png".into()),
            ("uuid".into(), info.uuid.to_string()),
            ("cs".into(), "color,grayscale,binary".into()),
            ("is".into(), "platen".into()),
            ("duplex".into(), "F".into()),
        ]);
        Self { entries }
    }

    /// Look up a TXT value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(key, value)` pairs in wire order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Format as `key=value` strings
    pub fn to_strings(&self) -> Vec<String> {
        self.entries.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// One advertised service variant of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProfile {
    /// Transport variant
    pub kind: ServiceKind,

    /// Service instance name (the device's make and model)
    pub instance_name: String,

    /// Host name shared by every variant of the device
    pub host_name: String,

    /// Port the listener is actually bound to
    pub port: u16,

    /// TXT entries
    pub txt: TxtRecords,
}

impl ServiceProfile {
    /// Fully qualified service instance name, e.g. `Scanner._uscan._tcp.local`
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.instance_name, self.kind.qualified_type())
    }

    /// PTR, SRV and TXT records of this variant
    pub fn records(&self) -> Vec<DnsRecord> {
        let fullname = self.fullname();
        vec![
            DnsRecord::Ptr {
                name: self.kind.qualified_type(),
                target: fullname.clone(),
            },
            DnsRecord::Srv {
                name: fullname.clone(),
                target: self.host_name.clone(),
                port: self.port,
            },
            DnsRecord::Txt {
                name: fullname,
                entries: self.txt.to_strings(),
            },
        ]
    }
}

/// Complete advertisement of one device
///
/// Holds one [`ServiceProfile`] per enabled protocol. The first profile is the
/// primary one; HTTP is primary whenever it is enabled, since discovery clients
/// query `_uscan._tcp` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    uuid: Uuid,
    host_name: String,
    profiles: Vec<ServiceProfile>,
}

impl Advertisement {
    /// Synthesize the advertisement for a device
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::InvalidAdvertisement` if neither protocol has a port.
    ///
    /// # Example
    ///
    /// ```
    /// # use airscan_discovery::{AdvertiseInfo, Advertisement, ServiceKind};
    /// # use uuid::Uuid;
    /// let info = AdvertiseInfo {
    ///     uuid: Uuid::nil(),
    ///     make_and_model: "Test Scanner".to_string(),
    ///     http_port: Some(9801),
    ///     https_port: Some(9802),
    ///     has_icon: false,
    /// };
    /// let ad = Advertisement::build(&info).unwrap();
    /// assert_eq!(ad.primary().kind, ServiceKind::Http);
    /// assert_eq!(ad.answer("_uscans._tcp.local").len(), ad.records().len());
    /// ```
    pub fn build(info: &AdvertiseInfo) -> Result<Self, DiscoveryError> {
        let host_name = host_name(info.uuid);
        let instance_name = instance_name(&info.make_and_model);

        let profiles: Vec<ServiceProfile> = [
            (ServiceKind::Http, info.http_port),
            (ServiceKind::Https, info.https_port),
        ]
        .into_iter()
        .filter_map(|(kind, port)| port.map(|port| (kind, port)))
        .map(|(kind, port)| ServiceProfile {
            kind,
            instance_name: instance_name.clone(),
            host_name: host_name.clone(),
            port,
            txt: TxtRecords::for_service(info, kind, &host_name, port),
        })
        .collect();

        if profiles.is_empty() {
            return Err(DiscoveryError::InvalidAdvertisement(format!(
                "device {} has neither an HTTP nor an HTTPS port",
                info.uuid
            )));
        }

        Ok(Self {
            uuid: info.uuid,
            host_name,
            profiles,
        })
    }

    /// Device identity
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Host name shared by all variants (`naps2-<uuid>.local`)
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// All profiles, primary first
    pub fn profiles(&self) -> &[ServiceProfile] {
        &self.profiles
    }

    /// The primary profile
    pub fn primary(&self) -> &ServiceProfile {
        // build() rejects empty profile lists
        &self.profiles[0]
    }

    /// The secondary profile, present only when both protocols are enabled
    pub fn secondary(&self) -> Option<&ServiceProfile> {
        self.profiles.get(1)
    }

    /// Profile of a given variant
    pub fn profile(&self, kind: ServiceKind) -> Option<&ServiceProfile> {
        self.profiles.iter().find(|p| p.kind == kind)
    }

    /// Whether the device is advertised over HTTP
    pub fn has_http(&self) -> bool {
        self.profile(ServiceKind::Http).is_some()
    }

    /// Whether the device is advertised over HTTPS
    pub fn has_https(&self) -> bool {
        self.profile(ServiceKind::Https).is_some()
    }

    /// The full record set of the device
    ///
    /// Primary PTR/SRV/TXT first, then the secondary variant's records appended
    /// into the same set, then the NSEC record for the host name.
    pub fn records(&self) -> Vec<DnsRecord> {
        let mut records: Vec<DnsRecord> = self
            .profiles
            .iter()
            .flat_map(ServiceProfile::records)
            .collect();
        records.push(DnsRecord::Nsec {
            name: self.host_name.clone(),
            absent: vec![RecordType::A, RecordType::Aaaa],
        });
        records
    }

    /// Answer a query for a service type
    ///
    /// A query for any advertised variant resolves to the records of every
    /// variant. A query for a type the device does not advertise resolves to nothing.
    pub fn answer(&self, service_type: &str) -> Vec<DnsRecord> {
        if self.profiles.iter().any(|p| p.kind.matches(service_type)) {
            self.records()
        } else {
            Vec::new()
        }
    }
}

/// Host name of a device: `naps2-<uuid>.local`
pub fn host_name(uuid: Uuid) -> String {
    format!("naps2-{uuid}.{DOMAIN}")
}

/// Instance name for a make/model string, truncated to the DNS label limit
pub fn instance_name(make_and_model: &str) -> String {
    if make_and_model.len() <= MAX_INSTANCE_NAME_LEN {
        return make_and_model.to_string();
    }
    let mut end = MAX_INSTANCE_NAME_LEN;
    while !make_and_model.is_char_boundary(end) {
        end -= 1;
    }
    make_and_model[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "11111111-1111-1111-1111-111111111111";

    fn info(http_port: Option<u16>, https_port: Option<u16>) -> AdvertiseInfo {
        AdvertiseInfo {
            uuid: UUID.parse().unwrap(),
            make_and_model: "Test Scanner".to_string(),
            http_port,
            https_port,
            has_icon: false,
        }
    }

    fn srv_ports(records: &[DnsRecord]) -> Vec<u16> {
        records
            .iter()
            .filter_map(|r| match r {
                DnsRecord::Srv { port, .. } => Some(*port),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_host_name_format() {
        assert_eq!(
            host_name(UUID.parse().unwrap()),
            "naps2-11111111-1111-1111-1111-111111111111.local"
        );
    }

    #[test]
    fn test_txt_fields_exact() {
        let ad = Advertisement::build(&info(Some(9801), None)).unwrap();
        let txt = ad.primary().txt.to_strings();
        assert_eq!(
            txt,
            vec![
                "txtvers=1",
                "Vers=2.0",
                "rs=eSCL",
                "ty=Test Scanner",
                "pdl=application/pdf,image/jpeg,image/png",
                "uuid=11111111-1111-1111-1111-111111111111",
                "cs=color,grayscale,binary",
                "is=platen",
                "duplex=F",
            ]
        );
    }

    #[test]
    fn test_txt_representation_with_icon() {
        let mut info = info(None, Some(9802));
        info.has_icon = true;
        let ad = Advertisement::build(&info).unwrap();
        assert_eq!(
            ad.primary().txt.get("representation"),
            Some("https://naps2-11111111-1111-1111-1111-111111111111.local:9802/eSCL/icon.png")
        );
        // Inserted right after the version fields
        assert_eq!(ad.primary().txt.iter().nth(2).map(|(k, _)| k), Some("representation"));
    }

    #[test]
    fn test_http_is_primary_when_both_enabled() {
        let ad = Advertisement::build(&info(Some(1), Some(2))).unwrap();
        assert_eq!(ad.primary().kind, ServiceKind::Http);
        assert_eq!(ad.secondary().map(|p| p.kind), Some(ServiceKind::Https));
        assert_eq!(ad.primary().host_name, ad.secondary().unwrap().host_name);
    }

    #[test]
    fn test_https_only_primary() {
        let ad = Advertisement::build(&info(None, Some(2))).unwrap();
        assert_eq!(ad.primary().kind, ServiceKind::Https);
        assert!(ad.secondary().is_none());
        assert!(!ad.has_http());
        assert!(ad.has_https());
    }

    #[test]
    fn test_no_ports_is_invalid() {
        assert!(matches!(
            Advertisement::build(&info(None, None)),
            Err(DiscoveryError::InvalidAdvertisement(_))
        ));
    }

    #[test]
    fn test_dual_answer_resolves_both_ports() {
        let ad = Advertisement::build(&info(Some(10080), Some(10443))).unwrap();
        for query in ["_uscan._tcp", "_uscans._tcp.local", "_uscan._tcp.local."] {
            let mut ports = srv_ports(&ad.answer(query));
            ports.sort_unstable();
            assert_eq!(ports, vec![10080, 10443], "query {query}");
        }
    }

    #[test]
    fn test_single_protocol_other_type_resolves_nothing() {
        let ad = Advertisement::build(&info(Some(10080), None)).unwrap();
        assert_eq!(srv_ports(&ad.answer("_uscan._tcp.local")), vec![10080]);
        assert!(ad.answer("_uscans._tcp.local").is_empty());
    }

    #[test]
    fn test_nsec_covers_host_addresses() {
        let ad = Advertisement::build(&info(Some(1), None)).unwrap();
        let nsec = ad
            .records()
            .into_iter()
            .find(|r| r.record_type() == RecordType::Nsec)
            .unwrap();
        assert_eq!(
            nsec,
            DnsRecord::Nsec {
                name: ad.host_name().to_string(),
                absent: vec![RecordType::A, RecordType::Aaaa],
            }
        );
    }

    #[test]
    fn test_instance_name_truncation() {
        assert_eq!(instance_name("Short"), "Short");
        assert_eq!(instance_name(&"A".repeat(100)).len(), 63);
        // Never splits a multi-byte character
        let name = "é".repeat(40);
        let truncated = instance_name(&name);
        assert!(truncated.len() <= 63);
        assert!(name.starts_with(&truncated));
    }

    #[test]
    fn test_service_kind_matches() {
        assert!(ServiceKind::Http.matches("_uscan._tcp.local."));
        assert!(ServiceKind::Http.matches("_USCAN._tcp"));
        assert!(!ServiceKind::Http.matches("_uscans._tcp.local"));
        assert!(ServiceKind::Https.matches("_uscans._tcp.local"));
    }
}

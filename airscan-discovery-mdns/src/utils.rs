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

//! Utility functions for mDNS service handling

use airscan_discovery::{Advertisement, ServiceKind, ServiceProfile, TxtRecords};

/// Maximum length of a DNS label
const MAX_LABEL_LEN: usize = 63;

/// Append the trailing root label mdns-sd requires (`.local` -> `.local.`)
pub fn to_fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Build TXT record properties from TxtRecords.
///
/// Returns TxtProperty values in wire order, suitable for mdns-sd.
pub fn build_txt_properties(txt: &TxtRecords) -> Vec<mdns_sd::TxtProperty> {
    txt.iter().map(mdns_sd::TxtProperty::from).collect()
}

/// Instance name a variant is listed under when it appears below the
/// other variant's service type, e.g. `Scanner (HTTPS)`
pub fn cross_instance_name(profile: &ServiceProfile) -> String {
    let suffix = format!(" ({})", profile.kind.scheme().to_uppercase());
    let mut end = profile
        .instance_name
        .len()
        .min(MAX_LABEL_LEN - suffix.len());
    while !profile.instance_name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{suffix}", &profile.instance_name[..end])
}

fn service_info(
    service_kind: ServiceKind,
    instance_name: &str,
    profile: &ServiceProfile,
) -> Result<mdns_sd::ServiceInfo, mdns_sd::Error> {
    let service_info = mdns_sd::ServiceInfo::new(
        &to_fqdn(&service_kind.qualified_type()),
        instance_name,
        &to_fqdn(&profile.host_name),
        (),
        profile.port,
        build_txt_properties(&profile.txt),
    )?
    .enable_addr_auto();
    Ok(service_info)
}

/// Build every mdns-sd ServiceInfo a device needs
///
/// mdns-sd answers a browse for a service type with the instances registered
/// under that type only. Each variant is registered under its own type and,
/// when the device serves both protocols, once more under the other type with
/// its own port and TXT, so that a browse for either type finds both.
///
/// Addresses are left empty and detected automatically from the available
/// network interfaces.
pub fn service_infos_for(
    advertisement: &Advertisement,
) -> Result<Vec<mdns_sd::ServiceInfo>, mdns_sd::Error> {
    let profiles = advertisement.profiles();
    let mut infos = Vec::with_capacity(profiles.len() * profiles.len());
    for listed_under in profiles {
        for profile in profiles {
            let info = if profile.kind == listed_under.kind {
                service_info(profile.kind, &profile.instance_name, profile)?
            } else {
                service_info(listed_under.kind, &cross_instance_name(profile), profile)?
            };
            infos.push(info);
        }
    }
    Ok(infos)
}

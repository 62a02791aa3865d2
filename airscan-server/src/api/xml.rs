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

//! eSCL XML documents

use crate::config::Capabilities;
use crate::jobs::JobInfo;
use crate::settings::{MAX_HEIGHT, MAX_WIDTH};
use std::fmt::Write;
use uuid::Uuid;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const NAMESPACES: &str = r#"xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm""#;

/// Color modes offered on the platen, matching the `cs` TXT entry
pub const COLOR_MODES: [&str; 3] = ["RGB24", "Grayscale8", "BlackAndWhite1"];
/// Document formats offered on the platen, matching the `pdl` TXT entry
pub const DOCUMENT_FORMATS: [&str; 3] = ["application/pdf", "image/jpeg", "image/png"];
pub const RESOLUTIONS: [u32; 5] = [100, 150, 200, 300, 600];

/// Escape text for use in element content or attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// `scan:ScannerCapabilities`
pub fn scanner_capabilities(caps: &Capabilities, uuid: Uuid, icon_uri: Option<&str>) -> String {
    let mut xml = String::new();
    let _ = writeln!(xml, "{XML_HEADER}");
    let _ = writeln!(xml, "<scan:ScannerCapabilities {NAMESPACES}>");
    let _ = writeln!(xml, "  <pwg:Version>{}</pwg:Version>", escape(&caps.version));
    let _ = writeln!(
        xml,
        "  <pwg:MakeAndModel>{}</pwg:MakeAndModel>",
        escape(&caps.make_and_model)
    );
    if !caps.serial_number.is_empty() {
        let _ = writeln!(
            xml,
            "  <pwg:SerialNumber>{}</pwg:SerialNumber>",
            escape(&caps.serial_number)
        );
    }
    let _ = writeln!(xml, "  <scan:UUID>{uuid}</scan:UUID>");
    if let Some(icon_uri) = icon_uri {
        let _ = writeln!(xml, "  <scan:IconURI>{}</scan:IconURI>", escape(icon_uri));
    }

    xml.push_str("  <scan:Platen>\n    <scan:PlatenInputCaps>\n");
    let _ = writeln!(xml, "      <scan:MinWidth>1</scan:MinWidth>");
    let _ = writeln!(xml, "      <scan:MaxWidth>{MAX_WIDTH}</scan:MaxWidth>");
    let _ = writeln!(xml, "      <scan:MinHeight>1</scan:MinHeight>");
    let _ = writeln!(xml, "      <scan:MaxHeight>{MAX_HEIGHT}</scan:MaxHeight>");
    xml.push_str("      <scan:SettingProfiles>\n        <scan:SettingProfile>\n");

    xml.push_str("          <scan:ColorModes>\n");
    for mode in COLOR_MODES {
        let _ = writeln!(xml, "            <scan:ColorMode>{mode}</scan:ColorMode>");
    }
    xml.push_str("          </scan:ColorModes>\n");

    xml.push_str("          <scan:DocumentFormats>\n");
    for format in DOCUMENT_FORMATS {
        let _ = writeln!(xml, "            <pwg:DocumentFormat>{format}</pwg:DocumentFormat>");
        let _ = writeln!(
            xml,
            "            <scan:DocumentFormatExt>{format}</scan:DocumentFormatExt>"
        );
    }
    xml.push_str("          </scan:DocumentFormats>\n");

    xml.push_str("          <scan:SupportedResolutions>\n            <scan:DiscreteResolutions>\n");
    for dpi in RESOLUTIONS {
        let _ = writeln!(
            xml,
            "              <scan:DiscreteResolution><scan:XResolution>{dpi}</scan:XResolution><scan:YResolution>{dpi}</scan:YResolution></scan:DiscreteResolution>"
        );
    }
    xml.push_str("            </scan:DiscreteResolutions>\n          </scan:SupportedResolutions>\n");

    xml.push_str("        </scan:SettingProfile>\n      </scan:SettingProfiles>\n");
    xml.push_str("    </scan:PlatenInputCaps>\n  </scan:Platen>\n");
    xml.push_str("</scan:ScannerCapabilities>\n");
    xml
}

/// `scan:ScannerStatus`
pub fn scanner_status(version: &str, is_processing: bool, jobs: &[std::sync::Arc<JobInfo>]) -> String {
    let mut xml = String::new();
    let _ = writeln!(xml, "{XML_HEADER}");
    let _ = writeln!(xml, "<scan:ScannerStatus {NAMESPACES}>");
    let _ = writeln!(xml, "  <pwg:Version>{}</pwg:Version>", escape(version));
    let state = if is_processing { "Processing" } else { "Idle" };
    let _ = writeln!(xml, "  <pwg:State>{state}</pwg:State>");
    if !jobs.is_empty() {
        xml.push_str("  <scan:Jobs>\n");
        for job in jobs {
            let id = job.id();
            xml.push_str("    <scan:JobInfo>\n");
            let _ = writeln!(xml, "      <pwg:JobUri>{}</pwg:JobUri>", super::job_path(id));
            let _ = writeln!(xml, "      <pwg:JobUuid>{id}</pwg:JobUuid>");
            let _ = writeln!(xml, "      <pwg:JobState>{}</pwg:JobState>", job.state().as_str());
            xml.push_str("    </scan:JobInfo>\n");
        }
        xml.push_str("  </scan:Jobs>\n");
    }
    xml.push_str("</scan:ScannerStatus>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("A&B <\"x\"> 'y'"), "A&amp;B &lt;&quot;x&quot;&gt; &apos;y&apos;");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_capabilities_document() {
        let mut caps = Capabilities::new("Acme <Scan> & Co");
        caps.serial_number = "SN1".into();
        let uuid = Uuid::from_u128(7);
        let xml = scanner_capabilities(&caps, uuid, Some("http://h:1/eSCL/icon.png"));

        assert!(xml.starts_with(XML_HEADER));
        assert!(xml.contains("<pwg:MakeAndModel>Acme &lt;Scan&gt; &amp; Co</pwg:MakeAndModel>"));
        assert!(xml.contains("<pwg:Version>2.63</pwg:Version>"));
        assert!(xml.contains("<pwg:SerialNumber>SN1</pwg:SerialNumber>"));
        assert!(xml.contains(&format!("<scan:UUID>{uuid}</scan:UUID>")));
        assert!(xml.contains("<scan:IconURI>http://h:1/eSCL/icon.png</scan:IconURI>"));
        assert!(xml.contains("<scan:ColorMode>Grayscale8</scan:ColorMode>"));
        assert!(xml.contains("<pwg:DocumentFormat>image/png</pwg:DocumentFormat>"));
        assert!(xml.trim_end().ends_with("</scan:ScannerCapabilities>"));
    }

    #[test]
    fn test_capabilities_without_optional_parts() {
        let caps = Capabilities::new("Plain");
        let xml = scanner_capabilities(&caps, Uuid::nil(), None);
        assert!(!xml.contains("IconURI"));
        assert!(!xml.contains("SerialNumber"));
    }

    #[test]
    fn test_idle_status() {
        let xml = scanner_status("2.63", false, &[]);
        assert!(xml.contains("<pwg:State>Idle</pwg:State>"));
        assert!(!xml.contains("<scan:Jobs>"));
    }
}

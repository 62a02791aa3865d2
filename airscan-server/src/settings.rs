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

//! Scan settings sent with `POST /eSCL/ScanJobs`
//!
//! Elements are matched by local name so `<scan:ColorMode>`, `<pwg:ColorMode>`
//! and `<ColorMode>` are all accepted.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Platen width in 1/300 inch (Letter)
pub const MAX_WIDTH: u32 = 2550;
/// Platen height in 1/300 inch (A4)
pub const MAX_HEIGHT: u32 = 3508;

/// Settings XML could not be understood
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("missing ScanSettings root element")]
    MissingRoot,

    #[error("invalid value {value:?} for {element}")]
    InvalidValue { element: &'static str, value: String },

    #[error("{element} {value} exceeds the platen limit of {max}")]
    RegionOutOfRange {
        element: &'static str,
        value: u32,
        max: u32,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputSource {
    #[default]
    Platen,
    Feeder,
    Camera,
}

impl InputSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            InputSource::Platen => "Platen",
            InputSource::Feeder => "Feeder",
            InputSource::Camera => "Camera",
        }
    }
}

impl FromStr for InputSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Platen" => Ok(InputSource::Platen),
            "Feeder" => Ok(InputSource::Feeder),
            "Camera" => Ok(InputSource::Camera),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorMode {
    BlackAndWhite1,
    Grayscale8,
    Grayscale16,
    #[default]
    Rgb24,
    Rgb48,
}

impl ColorMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ColorMode::BlackAndWhite1 => "BlackAndWhite1",
            ColorMode::Grayscale8 => "Grayscale8",
            ColorMode::Grayscale16 => "Grayscale16",
            ColorMode::Rgb24 => "RGB24",
            ColorMode::Rgb48 => "RGB48",
        }
    }

    /// Whether the mode produces single-channel output
    pub const fn is_gray(self) -> bool {
        !matches!(self, ColorMode::Rgb24 | ColorMode::Rgb48)
    }
}

impl FromStr for ColorMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BlackAndWhite1" => Ok(ColorMode::BlackAndWhite1),
            "Grayscale8" => Ok(ColorMode::Grayscale8),
            "Grayscale16" => Ok(ColorMode::Grayscale16),
            "RGB24" => Ok(ColorMode::Rgb24),
            "RGB48" => Ok(ColorMode::Rgb48),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested scan area in 1/300 inch units; zero means "whole platen"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanRegion {
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
}

/// Parsed scan request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSettings {
    pub input_source: InputSource,
    pub color_mode: ColorMode,
    /// MIME type from `DocumentFormatExt`, falling back to `DocumentFormat`
    pub document_format: Option<String>,
    pub duplex: bool,
    pub x_resolution: u32,
    pub y_resolution: u32,
    pub region: ScanRegion,
    pub compression_factor: Option<u32>,
}

impl ScanSettings {
    /// Parse a `scan:ScanSettings` document
    pub fn parse(xml: &str) -> Result<Self, SettingsError> {
        let root = element_text(xml, "ScanSettings").ok_or(SettingsError::MissingRoot)?;

        let input_source = match element_text(root, "InputSource") {
            Some(value) => parse_enum("InputSource", value)?,
            None => InputSource::default(),
        };
        let color_mode = match element_text(root, "ColorMode") {
            Some(value) => parse_enum("ColorMode", value)?,
            None => ColorMode::default(),
        };
        let document_format = element_text(root, "DocumentFormatExt")
            .or_else(|| element_text(root, "DocumentFormat"))
            .map(unescape)
            .filter(|format| !format.is_empty());
        let duplex = element_text(root, "Duplex").is_some_and(|value| value.trim() == "true");

        let region = match element_text(root, "ScanRegion") {
            Some(region) => ScanRegion {
                width: parse_extent(region, "Width", MAX_WIDTH)?,
                height: parse_extent(region, "Height", MAX_HEIGHT)?,
                x_offset: parse_extent(region, "XOffset", MAX_WIDTH)?,
                y_offset: parse_extent(region, "YOffset", MAX_HEIGHT)?,
            },
            None => ScanRegion::default(),
        };

        Ok(Self {
            input_source,
            color_mode,
            document_format,
            duplex,
            x_resolution: parse_number(root, "XResolution")?.unwrap_or(0),
            y_resolution: parse_number(root, "YResolution")?.unwrap_or(0),
            region,
            compression_factor: parse_number(root, "CompressionFactor")?,
        })
    }
}

impl FromStr for ScanSettings {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_enum<T: FromStr>(element: &'static str, value: &str) -> Result<T, SettingsError> {
    let value = value.trim();
    value.parse().map_err(|_| SettingsError::InvalidValue {
        element,
        value: value.to_string(),
    })
}

fn parse_number(xml: &str, element: &'static str) -> Result<Option<u32>, SettingsError> {
    element_text(xml, element)
        .map(|value| parse_enum(element, value))
        .transpose()
}

/// Region value in 1/300 inch, bounded by the platen
fn parse_extent(xml: &str, element: &'static str, max: u32) -> Result<u32, SettingsError> {
    let value = parse_number(xml, element)?.unwrap_or(0);
    if value > max {
        return Err(SettingsError::RegionOutOfRange {
            element,
            value,
            max,
        });
    }
    Ok(value)
}

/// Inner text of the first element whose local name is `name`
fn element_text<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(offset) = xml[search_from..].find('<') {
        let tag_start = search_from + offset + 1;
        let tag_end = tag_start + xml[tag_start..].find('>')?;
        let tag = &xml[tag_start..tag_end];
        search_from = tag_end + 1;

        if tag.starts_with(['/', '?', '!']) || tag.ends_with('/') {
            continue;
        }
        let qualified = tag.split(|c: char| c.is_whitespace()).next().unwrap_or(tag);
        let local = qualified.rsplit(':').next().unwrap_or(qualified);
        if local != name {
            continue;
        }

        let close = format!("</{qualified}>");
        let content_end = search_from + xml[search_from..].find(&close)?;
        return Some(&xml[search_from..content_end]);
    }
    None
}

fn unescape(text: &str) -> String {
    text.trim()
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

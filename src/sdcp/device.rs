// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Printer identity as reported by discovery and stored in the address book.

use serde::{Deserialize, Serialize};

/// Identity fields of one printer.
///
/// `mainboard_id` is the routing key for every SDCP topic and `mainboard_ip`
/// is where the device is reached. Both must be known before a session can
/// open its transport; sessions never invent them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(rename = "MainboardIP", default, skip_serializing_if = "Option::is_none")]
    pub mainboard_ip: Option<String>,
    #[serde(rename = "MainboardID", default, skip_serializing_if = "Option::is_none")]
    pub mainboard_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

impl DeviceIdentity {
    /// Identity with only the address known; the rest comes from discovery.
    pub fn with_address(ip: impl Into<String>) -> Self {
        Self {
            mainboard_ip: Some(ip.into()),
            ..Self::default()
        }
    }

    /// Whether the session can reach and address the device without discovery.
    pub fn is_resolved(&self) -> bool {
        self.mainboard_id.is_some() && self.mainboard_ip.is_some()
    }

    /// Major protocol version, parsed from strings like "V3.0.0".
    pub fn protocol_major(&self) -> Option<u32> {
        self.protocol_version.as_deref().and_then(protocol_major)
    }

    /// Copies every field `other` knows into `self`.
    pub fn merge(&mut self, other: DeviceIdentity) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            id,
            name,
            machine_name,
            brand_name,
            mainboard_ip,
            mainboard_id,
            protocol_version,
            firmware_version
        );
    }
}

/// Parses the major number of a protocol version string ("V3.0.0" -> 3).
pub fn protocol_major(version: &str) -> Option<u32> {
    version
        .trim()
        .trim_start_matches(['V', 'v'])
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protocol_major() {
        assert_eq!(protocol_major("V3.0.0"), Some(3));
        assert_eq!(protocol_major("v1.0.0"), Some(1));
        assert_eq!(protocol_major("2"), Some(2));
        assert_eq!(protocol_major("garbage"), None);
    }

    #[test]
    fn serializes_with_protocol_field_names() {
        let identity = DeviceIdentity {
            id: Some("abc".into()),
            mainboard_ip: Some("10.0.0.2".into()),
            mainboard_id: Some("ffee".into()),
            protocol_version: Some("V3.0.0".into()),
            ..DeviceIdentity::default()
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["MainboardIP"], "10.0.0.2");
        assert_eq!(json["MainboardID"], "ffee");
        assert_eq!(json["ProtocolVersion"], "V3.0.0");
        assert!(json.get("Name").is_none());
        let back: DeviceIdentity = serde_json::from_value(json).unwrap();
        assert_eq!(back, identity);
    }

    #[test]
    fn merge_keeps_known_fields() {
        let mut identity = DeviceIdentity::with_address("10.0.0.2");
        identity.merge(DeviceIdentity {
            mainboard_id: Some("id".into()),
            ..DeviceIdentity::default()
        });
        assert!(identity.is_resolved());
        assert_eq!(identity.mainboard_ip.as_deref(), Some("10.0.0.2"));
    }
}

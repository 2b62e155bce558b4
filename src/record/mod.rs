//! Installed-apps records and the line parser.
//!
//! One input line is `device_type\tdevice_id\tlat\tlon\tapp,app,...`.
//! Corrupt app ids and coordinates are tolerated; a missing device type or
//! id, or too few fields, rejects the whole line.

mod check;
mod codec;

pub use check::{SAMPLE, self_check};
pub use codec::{UserApps, decode};

use bytes::Bytes;
use prost::Message;
use snafu::prelude::*;
use tracing::debug;

use crate::error::{
    EmptyDeviceIdSnafu, EmptyDeviceTypeSnafu, ParseFailure, TooFewFieldsSnafu, UnstorableKeySnafu,
};

/// Number of tab-separated fields in a record line.
pub const FIELD_COUNT: usize = 5;

/// Longest key memcached accepts, in bytes.
pub const MAX_KEY_LEN: usize = 250;

/// Geographic position of a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// A validated installed-apps record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    device_type: String,
    device_id: String,
    coordinates: Option<Coordinates>,
    apps: Vec<u32>,
}

impl Record {
    /// Build a record, rejecting an empty device type or id and any identity
    /// that would not make a valid store key.
    pub fn new(
        device_type: impl Into<String>,
        device_id: impl Into<String>,
        coordinates: Option<Coordinates>,
        apps: Vec<u32>,
    ) -> Result<Self, ParseFailure> {
        let device_type = device_type.into();
        let device_id = device_id.into();
        ensure!(!device_type.is_empty(), EmptyDeviceTypeSnafu);
        ensure!(!device_id.is_empty(), EmptyDeviceIdSnafu);
        let storable = |s: &str| !s.chars().any(|c| c.is_whitespace() || c.is_control());
        ensure!(
            storable(&device_type)
                && storable(&device_id)
                && device_type.len() + 1 + device_id.len() <= MAX_KEY_LEN,
            UnstorableKeySnafu {
                key: format!("{device_type}:{device_id}"),
            }
        );
        Ok(Self {
            device_type,
            device_id,
            coordinates,
            apps,
        })
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// `None` when the source line had unparsable coordinates.
    pub fn coordinates(&self) -> Option<Coordinates> {
        self.coordinates
    }

    pub fn has_coordinates(&self) -> bool {
        self.coordinates.is_some()
    }

    pub fn apps(&self) -> &[u32] {
        &self.apps
    }

    /// Store key, `"{device_type}:{device_id}"`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.device_type, self.device_id)
    }

    /// The protobuf message stored as the value.
    pub fn to_user_apps(&self) -> UserApps {
        UserApps {
            apps: self.apps.clone(),
            lat: self.coordinates.map(|c| c.lat),
            lon: self.coordinates.map(|c| c.lon),
        }
    }

    /// Serialized store value.
    pub fn encode(&self) -> Bytes {
        Bytes::from(self.to_user_apps().encode_to_vec())
    }
}

/// Parse one input line into a [`Record`].
pub fn parse_line(line: &str) -> Result<Record, ParseFailure> {
    // Tabs are field separators, so empty leading/trailing fields must survive.
    let line = line.trim_matches(|c: char| c != '\t' && c.is_whitespace());
    let parts: Vec<&str> = line.split('\t').collect();
    ensure!(
        parts.len() >= FIELD_COUNT,
        TooFewFieldsSnafu { found: parts.len() }
    );

    let (device_type, device_id) = (parts[0].trim(), parts[1].trim());
    ensure!(!device_type.is_empty(), EmptyDeviceTypeSnafu);
    ensure!(!device_id.is_empty(), EmptyDeviceIdSnafu);

    let coordinates = parse_coordinates(parts[2], parts[3]);
    if coordinates.is_none() {
        debug!("Invalid geo coords: `{}`", line);
    }

    let (apps, dropped) = parse_apps(parts[4]);
    if dropped > 0 {
        debug!("Not all user apps are digits ({} dropped): `{}`", dropped, line);
    }

    Record::new(device_type, device_id, coordinates, apps)
}

fn parse_coordinates(lat: &str, lon: &str) -> Option<Coordinates> {
    let lat = lat.trim().parse::<f64>().ok()?;
    let lon = lon.trim().parse::<f64>().ok()?;
    Some(Coordinates { lat, lon })
}

/// Parse a comma-separated app list, returning the ids and how many tokens were dropped.
fn parse_apps(raw: &str) -> (Vec<u32>, usize) {
    let mut apps = Vec::new();
    let mut dropped = 0;
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<u32>() {
            Ok(app) => apps.push(app),
            Err(_) => dropped += 1,
        }
    }
    (apps, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_idfa_sample() {
        let record = parse_line("idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23").unwrap();
        assert_eq!(record.device_type(), "idfa");
        assert_eq!(record.device_id(), "1rfw452y52g2gq4g");
        assert_eq!(
            record.coordinates(),
            Some(Coordinates {
                lat: 55.55,
                lon: 42.42
            })
        );
        assert_eq!(record.apps(), &[1423, 43, 567, 3, 7, 23]);
        assert_eq!(record.key(), "idfa:1rfw452y52g2gq4g");
    }

    #[test]
    fn test_parse_gaid_sample() {
        let record = parse_line("gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424").unwrap();
        assert_eq!(record.device_type(), "gaid");
        assert_eq!(record.apps(), &[7423, 424]);
    }

    #[test]
    fn test_too_few_fields() {
        assert_eq!(
            parse_line("idfa\tabc\t55.55\t42.42"),
            Err(ParseFailure::TooFewFields { found: 4 })
        );
        assert_eq!(
            parse_line("garbage"),
            Err(ParseFailure::TooFewFields { found: 1 })
        );
    }

    #[test]
    fn test_empty_identity_fields() {
        assert_eq!(
            parse_line("\tabc\t1\t2\t3"),
            Err(ParseFailure::EmptyDeviceType)
        );
        assert_eq!(
            parse_line("idfa\t\t1\t2\t3"),
            Err(ParseFailure::EmptyDeviceId)
        );
    }

    #[test]
    fn test_unstorable_device_id_rejected() {
        assert_eq!(
            parse_line("idfa\tab cd\t1\t2\t3"),
            Err(ParseFailure::UnstorableKey {
                key: "idfa:ab cd".to_string()
            })
        );
        assert!(matches!(
            parse_line("gaid\tab\u{1}cd\t1\t2\t3"),
            Err(ParseFailure::UnstorableKey { .. })
        ));

        let long_id = "x".repeat(MAX_KEY_LEN);
        assert!(matches!(
            Record::new("idfa", long_id, None, vec![]),
            Err(ParseFailure::UnstorableKey { .. })
        ));
        let fits = "x".repeat(MAX_KEY_LEN - "idfa:".len());
        assert!(Record::new("idfa", fits, None, vec![]).is_ok());
    }

    #[test]
    fn test_bad_app_tokens_dropped() {
        let record = parse_line("adid\tdev\t1.0\t2.0\t12,abc,,-4,34").unwrap();
        assert_eq!(record.apps(), &[12, 34]);
    }

    #[test]
    fn test_empty_app_list() {
        let record = parse_line("dvid\tdev\t1.0\t2.0\t").unwrap();
        assert!(record.apps().is_empty());
    }

    #[test]
    fn test_bad_coordinates_flagged() {
        let record = parse_line("idfa\tdev\tnorth\t42.42\t1,2").unwrap();
        assert!(!record.has_coordinates());
        assert_eq!(record.apps(), &[1, 2]);

        let user_apps = record.to_user_apps();
        assert_eq!(user_apps.lat, None);
        assert_eq!(user_apps.lon, None);
    }

    #[test]
    fn test_line_ending_trimmed() {
        let record = parse_line("gaid\tdev\t1\t2\t5,6\r\n").unwrap();
        assert_eq!(record.apps(), &[5, 6]);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let record = parse_line("idfa\tdev\t1\t2\t3,4\textra").unwrap();
        assert_eq!(record.apps(), &[3, 4]);
    }

    #[test]
    fn test_record_new_validates() {
        assert_eq!(
            Record::new("", "id", None, vec![]),
            Err(ParseFailure::EmptyDeviceType)
        );
        assert!(Record::new("idfa", "id", None, vec![]).is_ok());
    }
}

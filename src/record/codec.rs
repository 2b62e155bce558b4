//! Protobuf exchange format for stored values.

use prost::Message;
use snafu::prelude::*;

use crate::error::{CodecError, DecodeSnafu};

/// Value stored under each device key.
///
/// Wire-compatible with the proto2 definition
/// `repeated uint32 apps = 1; optional double lat = 2; optional double lon = 3;`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserApps {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub apps: Vec<u32>,
    #[prost(double, optional, tag = "2")]
    pub lat: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub lon: Option<f64>,
}

/// Decode a stored value.
pub fn decode(bytes: &[u8]) -> Result<UserApps, CodecError> {
    UserApps::decode(bytes).context(DecodeSnafu)
}

//! Routing of records to memcached shards by device type.

use std::collections::HashMap;
use std::fmt;

use crate::error::UnknownShard;

/// Device types with a shard in the reference deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Idfa,
    Gaid,
    Adid,
    Dvid,
}

impl DeviceType {
    pub const ALL: [DeviceType; 4] = [
        DeviceType::Idfa,
        DeviceType::Gaid,
        DeviceType::Adid,
        DeviceType::Dvid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Idfa => "idfa",
            DeviceType::Gaid => "gaid",
            DeviceType::Adid => "adid",
            DeviceType::Dvid => "dvid",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static mapping from device type to shard address, fixed for a run.
#[derive(Debug, Clone, Default)]
pub struct ShardRouter {
    targets: HashMap<String, String>,
}

impl ShardRouter {
    /// Build a router from `(device_type, address)` pairs.
    pub fn new<I, K, V>(targets: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            targets: targets
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Address for `device_type`, or [`UnknownShard`] if it has none.
    pub fn route(&self, device_type: &str) -> Result<&str, UnknownShard> {
        self.targets
            .get(device_type)
            .map(String::as_str)
            .ok_or_else(|| UnknownShard {
                device_type: device_type.to_string(),
            })
    }

    /// Distinct shard addresses, sorted.
    pub fn addresses(&self) -> Vec<&str> {
        let mut addresses: Vec<&str> = self.targets.values().map(String::as_str).collect();
        addresses.sort_unstable();
        addresses.dedup();
        addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ShardRouter {
        ShardRouter::new([
            ("idfa", "127.0.0.1:33013"),
            ("gaid", "127.0.0.1:33014"),
            ("adid", "127.0.0.1:33015"),
            ("dvid", "127.0.0.1:33015"),
        ])
    }

    #[test]
    fn test_known_device_types() {
        let router = router();
        assert_eq!(router.route("idfa").unwrap(), "127.0.0.1:33013");
        assert_eq!(router.route("gaid").unwrap(), "127.0.0.1:33014");
    }

    #[test]
    fn test_unknown_device_type() {
        let err = router().route("imei").unwrap_err();
        assert_eq!(err.device_type, "imei");
        assert_eq!(err.to_string(), "Unknown device type: imei");
    }

    #[test]
    fn test_routing_is_case_sensitive() {
        assert!(router().route("IDFA").is_err());
    }

    #[test]
    fn test_addresses_deduplicated() {
        assert_eq!(
            router().addresses(),
            vec!["127.0.0.1:33013", "127.0.0.1:33014", "127.0.0.1:33015"]
        );
    }

    #[test]
    fn test_device_type_names() {
        let names: Vec<_> = DeviceType::ALL.iter().map(DeviceType::to_string).collect();
        assert_eq!(names, ["idfa", "gaid", "adid", "dvid"]);
    }
}

//! Built-in encode/decode self-check (`--test`).

use prost::Message;
use tracing::info;

use crate::error::LoaderError;

use super::{decode, parse_line};

/// Sample lines round-tripped by [`self_check`].
pub const SAMPLE: &str = "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23\n\
                          gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424";

/// Parse, encode and decode every sample line, checking the payload survives intact.
///
/// Returns the number of lines checked.
pub fn self_check() -> Result<usize, LoaderError> {
    let mut checked = 0;
    for line in SAMPLE.lines() {
        let record = parse_line(line).map_err(|e| LoaderError::SelfCheck {
            message: format!("sample line rejected: {e}"),
        })?;

        let packed = record.encode();
        let unpacked = decode(&packed).map_err(|e| LoaderError::SelfCheck {
            message: e.to_string(),
        })?;

        if unpacked != record.to_user_apps() {
            return Err(LoaderError::SelfCheck {
                message: format!("decoded payload differs for {}", record.key()),
            });
        }
        if unpacked.encode_to_vec() != packed.as_ref() {
            return Err(LoaderError::SelfCheck {
                message: format!("re-encoded payload differs for {}", record.key()),
            });
        }

        info!("{} -> {} bytes ok", record.key(), packed.len());
        checked += 1;
    }
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_check_passes() {
        assert_eq!(self_check().unwrap(), 2);
    }
}

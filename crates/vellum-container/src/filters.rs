//! The built-in byte-filter service.

use vellum_object::{FilterService, Name};

/// Compression level handed to zstd for the built-in filter.
const ZSTD_LEVEL: i32 = 3;

/// Filter service understanding the engine's built-in `/ZstdDecode` filter.
///
/// Any other filter name is rejected; callers with exotic filter chains
/// supply their own [`FilterService`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardFilters;

impl FilterService for StandardFilters {
    fn decode(&self, filter: &Name, data: &[u8]) -> Result<Vec<u8>, String> {
        match filter.as_str() {
            "ZstdDecode" => zstd::decode_all(data).map_err(|e| e.to_string()),
            other => Err(format!("unknown filter /{other}")),
        }
    }

    fn encode(&self, filter: &Name, data: &[u8]) -> Result<Vec<u8>, String> {
        match filter.as_str() {
            "ZstdDecode" => zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| e.to_string()),
            other => Err(format!("unknown filter /{other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let f = StandardFilters;
        let name = Name::new("ZstdDecode");
        let body = b"a body that compresses a body that compresses".to_vec();
        let packed = f.encode(&name, &body).unwrap();
        assert_eq!(f.decode(&name, &packed).unwrap(), body);
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let f = StandardFilters;
        assert!(f.decode(&Name::new("Rot13"), b"x").is_err());
    }
}

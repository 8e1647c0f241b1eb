//! Wire encoding for every message that crosses the network or the store.

use serde::{de::DeserializeOwned, Serialize};

/// Errors from decoding wire bytes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Payload failed to decode.
    #[error("wire decode error: {0}")]
    Decode(String),
}

/// Encode a value to wire bytes.
pub fn to_wire<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("wire serialization should never fail")
}

/// Decode a value from wire bytes.
pub fn from_wire<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let value = (42u64, "hello".to_string(), vec![1u8, 2, 3]);
        let bytes = to_wire(&value);
        let decoded: (u64, String, Vec<u8>) = from_wire(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_garbage_rejected() {
        let result: Result<(u64, String), _> = from_wire(&[0xff; 3]);
        assert!(result.is_err());
    }
}

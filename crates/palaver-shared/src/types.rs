use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// Item identifier = 32-byte content hash of a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub [u8; 32]);

impl ItemId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        Ok(Self(decode_fixed(s)?))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// User identity = public key of the record signer (32 bytes).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserKey(pub [u8; 32]);

impl UserKey {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        Ok(Self(decode_fixed(s)?))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn decode_fixed(s: &str) -> Result<[u8; 32], IdError> {
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        return Err(IdError::Length {
            expected: 32,
            got: bytes.len(),
        });
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let id = ItemId([7u8; 32]);
        let parsed = ItemId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_short_form() {
        let key = UserKey([0xab; 32]);
        assert_eq!(key.short(), "abababab");
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(matches!(
            UserKey::from_hex("abcd"),
            Err(IdError::Length { got: 2, .. })
        ));
        assert!(ItemId::from_hex("not hex").is_err());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = ItemId([1u8; 32]);
        let b = ItemId([2u8; 32]);
        assert!(a < b);
    }
}

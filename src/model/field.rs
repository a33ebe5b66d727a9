//! Field element type used for every hash in the tree

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A 32-byte big-endian prime-field value
///
/// Values produced by the crate's hashers are always below 2^253, which keeps
/// them inside the BN254 scalar field used by the proving circuits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldElement([u8; 32]);

impl FieldElement {
    /// The zero element (also the hash of an absent child)
    pub const ZERO: FieldElement = FieldElement([0u8; 32]);

    /// The one element
    pub const ONE: FieldElement = {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        FieldElement(bytes)
    };

    /// Create a field element from raw big-endian bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        FieldElement(bytes)
    }

    /// Create a field element from a small integer
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        FieldElement(bytes)
    }

    /// Reduce an arbitrary 32-byte digest below 2^253
    pub fn reduce(mut bytes: [u8; 32]) -> Self {
        bytes[0] &= 0x1f;
        FieldElement(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to a `0x`-prefixed hex string
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from hex, with or without the `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() > 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(FieldElement(arr))
    }

    /// Get a short prefix for display
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Check if this is the zero element
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        FieldElement::from_u64(value)
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fe({})", self.short())
    }
}

impl Default for FieldElement {
    fn default() -> Self {
        FieldElement::ZERO
    }
}

impl AsRef<[u8]> for FieldElement {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Hex strings for JSON (circuit inputs, CLI output), raw bytes for bincode.
impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            struct HexVisitor;

            impl Visitor<'_> for HexVisitor {
                type Value = FieldElement;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("a hex-encoded field element")
                }

                fn visit_str<E: de::Error>(self, v: &str) -> Result<FieldElement, E> {
                    FieldElement::from_hex(v).map_err(E::custom)
                }
            }

            deserializer.deserialize_str(HexVisitor)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(FieldElement)
        }
    }
}

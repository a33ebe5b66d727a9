//! Key to descent-path mapping

use crate::model::RecordId;
use crate::{Error, Result};

/// Largest supported key length; keys are u64 and 0 is reserved
pub const MAX_KEY_LENGTH: u32 = 63;

/// Split a key into `key_length` path bits, least-significant bit first
///
/// Bit `i` selects the branch taken at depth `i` (set = right).
pub fn split_key(key: RecordId, key_length: u32) -> Result<Vec<bool>> {
    if key == 0 || key_length == 0 || key_length > MAX_KEY_LENGTH || key >> key_length != 0 {
        return Err(Error::InvalidKey { key, key_length });
    }
    Ok((0..key_length).map(|i| (key >> i) & 1 == 1).collect())
}

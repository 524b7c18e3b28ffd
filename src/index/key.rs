//! Index keys
//!
//! Every indexed value maps to one 64-bit key. Keys order the same way as
//! the values they encode within one value kind.

use std::fmt;

/// 64-bit key of one bitmap entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(u64);

impl IndexKey {
    /// Key from its raw 64-bit value
    pub const fn from_raw(raw: u64) -> Self {
        IndexKey(raw)
    }

    /// Create a key from a boolean (false < true)
    pub fn from_bool(v: bool) -> Self {
        IndexKey(v as u64)
    }

    /// Create a key from a signed integer, preserving order
    pub fn from_int(v: i64) -> Self {
        IndexKey((v as u64) ^ (1 << 63))
    }

    /// Create a key from a float, using the total-ordering bit pattern
    pub fn from_float(v: f64) -> Self {
        let bits = v.to_bits();
        let ordered = if (bits >> 63) == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        };
        IndexKey(ordered)
    }

    /// Two 32-bit halves, ordered by `high` first
    pub fn composite(high: u32, low: u32) -> Self {
        IndexKey(((high as u64) << 32) | low as u64)
    }

    /// Eight raw bytes, ordered lexicographically
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        IndexKey(u64::from_be_bytes(bytes))
    }

    /// Create a key from a JSON scalar. Strings, arrays and objects have no
    /// 64-bit key.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(IndexKey::from_bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(IndexKey::from_int(i)),
                None => n.as_f64().map(IndexKey::from_float),
            },
            _ => None,
        }
    }

    /// Raw 64-bit value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// High and low halves of a composite key
    pub fn halves(&self) -> (u32, u32) {
        ((self.0 >> 32) as u32, self.0 as u32)
    }
}

impl From<u64> for IndexKey {
    fn from(raw: u64) -> Self {
        IndexKey(raw)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

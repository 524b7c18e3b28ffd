//! Index snapshot file
//!
//! Carries the changed entries of every field since the previous snapshot.
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "BDXS" | version u16 | high_water u64 | field_count u32
//! per field:  name_len u16 | name | key_count u32
//! per key:    key u64 | kind u8 | payload_len u32 | payload
//! trailer:    crc32 of everything before it
//! ```
//!
//! `kind` 0 is a changed entry whose payload is an encoded `EntrySnapshot`;
//! kind 1 is a dropped key with an empty payload.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::bitmap::persist::{checksum, EntrySnapshot};

use super::errors::{IndexError, IndexResult};
use super::key::IndexKey;

const MAGIC: &[u8; 4] = b"BDXS";
const VERSION: u16 = 1;
const KIND_CHANGED: u8 = 0;
const KIND_DROPPED: u8 = 1;

/// One key's change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySnapshot {
    Changed { key: IndexKey, entry: EntrySnapshot },
    Dropped { key: IndexKey },
}

impl KeySnapshot {
    pub fn key(&self) -> IndexKey {
        match self {
            KeySnapshot::Changed { key, .. } | KeySnapshot::Dropped { key } => *key,
        }
    }
}

/// Changes of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSnapshot {
    pub field: String,
    pub keys: Vec<KeySnapshot>,
}

/// Changes of every field since the previous snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    pub high_water: u64,
    pub fields: Vec<FieldSnapshot>,
}

impl IndexSnapshot {
    /// Whether no key changed
    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(|f| f.keys.is_empty())
    }

    /// Number of changed or dropped keys across fields
    pub fn key_count(&self) -> usize {
        self.fields.iter().map(|f| f.keys.len()).sum()
    }

    pub fn encode(&self) -> IndexResult<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.high_water.to_le_bytes());
        out.extend_from_slice(&len_u32(self.fields.len())?.to_le_bytes());

        for field in &self.fields {
            let name = field.field.as_bytes();
            let name_len = u16::try_from(name.len())
                .map_err(|_| IndexError::InvalidSnapshot(format!("field name too long: {}", field.field)))?;
            out.extend_from_slice(&name_len.to_le_bytes());
            out.extend_from_slice(name);
            out.extend_from_slice(&len_u32(field.keys.len())?.to_le_bytes());

            for key in &field.keys {
                out.extend_from_slice(&key.key().as_u64().to_le_bytes());
                match key {
                    KeySnapshot::Changed { entry, .. } => {
                        let payload = entry.encode();
                        out.push(KIND_CHANGED);
                        out.extend_from_slice(&len_u32(payload.len())?.to_le_bytes());
                        out.extend_from_slice(&payload);
                    }
                    KeySnapshot::Dropped { .. } => {
                        out.push(KIND_DROPPED);
                        out.extend_from_slice(&0u32.to_le_bytes());
                    }
                }
            }
        }

        let crc = checksum(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> IndexResult<Self> {
        if bytes.len() < 4 {
            return Err(invalid("file shorter than its trailer"));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if checksum(body) != stored {
            return Err(invalid("crc32 mismatch"));
        }

        let mut reader = Reader { bytes: body, pos: 0 };
        if reader.take(4)? != MAGIC {
            return Err(invalid("bad magic"));
        }
        let version = reader.u16()?;
        if version != VERSION {
            return Err(invalid(&format!("unsupported version {}", version)));
        }
        let high_water = reader.u64()?;
        let field_count = reader.u32()?;

        let mut fields = Vec::new();
        for _ in 0..field_count {
            let name_len = reader.u16()? as usize;
            let field = String::from_utf8(reader.take(name_len)?.to_vec())
                .map_err(|_| invalid("field name is not utf-8"))?;
            let key_count = reader.u32()?;

            let mut keys = Vec::new();
            for _ in 0..key_count {
                let key = IndexKey::from_raw(reader.u64()?);
                let kind = reader.u8()?;
                let payload_len = reader.u32()? as usize;
                let payload = reader.take(payload_len)?;
                keys.push(match kind {
                    KIND_CHANGED => KeySnapshot::Changed {
                        key,
                        entry: EntrySnapshot::decode(payload)?,
                    },
                    KIND_DROPPED => KeySnapshot::Dropped { key },
                    other => return Err(invalid(&format!("unknown key kind {}", other))),
                });
            }
            fields.push(FieldSnapshot { field, keys });
        }

        if reader.pos != body.len() {
            return Err(invalid("trailing bytes"));
        }
        Ok(Self { high_water, fields })
    }

    /// Write to `path` through a temporary file and rename
    pub fn write_to(&self, path: &Path) -> IndexResult<()> {
        let bytes = self.encode()?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> IndexResult<Self> {
        let bytes = fs::read(path)?;
        Self::decode(&bytes)
    }
}

fn invalid(reason: &str) -> IndexError {
    IndexError::InvalidSnapshot(reason.to_string())
}

fn len_u32(len: usize) -> IndexResult<u32> {
    u32::try_from(len).map_err(|_| invalid("section too large"))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> IndexResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        let end = end.ok_or_else(|| invalid(&format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> IndexResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> IndexResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> IndexResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> IndexResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::TopLevel;
    use tempfile::TempDir;

    fn sample() -> IndexSnapshot {
        let mut top = TopLevel::new();
        top.set_bit(3);
        top.set_bit(5_000_000);
        IndexSnapshot {
            high_water: 5_000_001,
            fields: vec![
                FieldSnapshot {
                    field: "color".into(),
                    keys: vec![
                        KeySnapshot::Changed {
                            key: IndexKey::from_int(1),
                            entry: EntrySnapshot::capture_changed(&top),
                        },
                        KeySnapshot::Dropped { key: IndexKey::from_int(2) },
                    ],
                },
                FieldSnapshot { field: "size".into(), keys: Vec::new() },
            ],
        }
    }

    #[test]
    fn test_encode_decode() {
        let snapshot = sample();
        let bytes = snapshot.encode().unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(IndexSnapshot::decode(&bytes).unwrap(), snapshot);
        assert_eq!(snapshot.key_count(), 2);
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = sample().encode().unwrap();
        bytes[10] ^= 0x01;
        let err = IndexSnapshot::decode(&bytes).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("crc32"));
    }

    #[test]
    fn test_short_input() {
        assert!(IndexSnapshot::decode(&[1, 2]).is_err());
        assert!(IndexSnapshot::decode(&[]).is_err());
    }

    #[test]
    fn test_bad_magic_with_valid_crc() {
        let mut body = b"XXXX".to_vec();
        body.extend_from_slice(&VERSION.to_le_bytes());
        let crc = checksum(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        let err = IndexSnapshot::decode(&body).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bdxs");
        let snapshot = sample();
        snapshot.write_to(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(IndexSnapshot::read_from(&path).unwrap(), snapshot);
    }
}

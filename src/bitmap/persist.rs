//! Entry snapshots
//!
//! Only mid segments changed since the last snapshot are written. Each record
//! is laid out as:
//!
//! ```text
//! top_index: u32 LE
//! length:    u32 LE   (u32::MAX marks a dropped mid segment, no payload)
//! crc32:     u32 LE   (of the payload; 0 for tombstones)
//! payload:   MidLevel::to_bytes()
//! ```
//!
//! Records are applied in order, so a chain of incremental snapshots replays
//! onto an empty top level to reproduce the latest state.

use crc32fast::Hasher;

use super::errors::{BitmapError, BitmapResult};
use super::mid::MidLevel;
use super::top::TopLevel;

const RECORD_HEADER_LEN: usize = 12;
const TOMBSTONE: u32 = u32::MAX;

/// Computes the CRC32 checksum of a payload
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// One persisted mid segment change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentRecord {
    /// Full bytes of a changed mid segment
    Mid {
        /// Slot in the top level
        top_index: u32,
        /// `MidLevel::to_bytes()` output
        bytes: Vec<u8>,
    },
    /// The mid segment at this slot was dropped
    Dropped {
        /// Slot in the top level
        top_index: u32,
    },
}

impl SegmentRecord {
    /// Slot in the top level
    pub fn top_index(&self) -> u32 {
        match self {
            SegmentRecord::Mid { top_index, .. } | SegmentRecord::Dropped { top_index } => *top_index,
        }
    }
}

/// Changed mid segments of one entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySnapshot {
    records: Vec<SegmentRecord>,
}

impl EntrySnapshot {
    /// Capture the mid segments changed (or dropped) since the last snapshot
    pub fn capture_changed(top: &TopLevel) -> Self {
        let mut records: Vec<SegmentRecord> = top
            .dropped_mids()
            .map(|t| SegmentRecord::Dropped { top_index: t as u32 })
            .collect();
        records.extend(top.changed_mids().map(|(t, mid)| SegmentRecord::Mid {
            top_index: t as u32,
            bytes: mid.to_bytes(),
        }));
        records.sort_by_key(SegmentRecord::top_index);
        Self { records }
    }

    /// Capture every live mid segment
    pub fn capture_full(top: &TopLevel) -> Self {
        let records = top
            .mids()
            .map(|(t, mid)| SegmentRecord::Mid {
                top_index: t as u32,
                bytes: mid.to_bytes(),
            })
            .collect();
        Self { records }
    }

    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The captured records, ascending by top index
    pub fn records(&self) -> &[SegmentRecord] {
        &self.records
    }

    /// Byte length of `encode()`
    pub fn encoded_len(&self) -> usize {
        self.records
            .iter()
            .map(|r| match r {
                SegmentRecord::Mid { bytes, .. } => RECORD_HEADER_LEN + bytes.len(),
                SegmentRecord::Dropped { .. } => RECORD_HEADER_LEN,
            })
            .sum()
    }

    /// Serialize every record
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        for record in &self.records {
            match record {
                SegmentRecord::Mid { top_index, bytes } => {
                    out.extend_from_slice(&top_index.to_le_bytes());
                    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    out.extend_from_slice(&checksum(bytes).to_le_bytes());
                    out.extend_from_slice(bytes);
                }
                SegmentRecord::Dropped { top_index } => {
                    out.extend_from_slice(&top_index.to_le_bytes());
                    out.extend_from_slice(&TOMBSTONE.to_le_bytes());
                    out.extend_from_slice(&0u32.to_le_bytes());
                }
            }
        }
        out
    }

    /// Parse records and verify every payload checksum
    pub fn decode(bytes: &[u8]) -> BitmapResult<Self> {
        let mut records = Vec::new();
        let mut pos = 0usize;

        while pos < bytes.len() {
            if bytes.len() - pos < RECORD_HEADER_LEN {
                return Err(BitmapError::length_mismatch(pos, "truncated record header"));
            }
            let top_index = read_u32(bytes, pos);
            let length = read_u32(bytes, pos + 4);
            let expected = read_u32(bytes, pos + 8);
            pos += RECORD_HEADER_LEN;

            if length == TOMBSTONE {
                records.push(SegmentRecord::Dropped { top_index });
                continue;
            }

            let length = length as usize;
            if bytes.len() - pos < length {
                return Err(BitmapError::length_mismatch(
                    pos,
                    format!("record for mid {} claims {} bytes", top_index, length),
                ));
            }
            let payload = &bytes[pos..pos + length];
            let actual = checksum(payload);
            if actual != expected {
                return Err(BitmapError::length_mismatch(
                    pos,
                    format!(
                        "crc32 mismatch for mid {}: stored {:08x}, computed {:08x}",
                        top_index, expected, actual
                    ),
                ));
            }
            records.push(SegmentRecord::Mid {
                top_index,
                bytes: payload.to_vec(),
            });
            pos += length;
        }

        Ok(Self { records })
    }

    /// Replay the records onto a top level. Every payload is validated
    /// before anything is installed.
    pub fn apply(&self, top: &mut TopLevel) -> BitmapResult<()> {
        let mut restored = Vec::with_capacity(self.records.len());
        for record in &self.records {
            match record {
                SegmentRecord::Mid { top_index, bytes } => {
                    restored.push((*top_index as usize, Some(MidLevel::from_bytes(bytes)?)));
                }
                SegmentRecord::Dropped { top_index } => restored.push((*top_index as usize, None)),
            }
        }

        for (top_index, mid) in restored {
            match mid {
                Some(mid) => top.install_mid(top_index, mid),
                None => {
                    top.remove_mid(top_index);
                }
            }
        }
        top.mark_persisted();
        Ok(())
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[pos..pos + 4]);
    u32::from_le_bytes(buf)
}

//! Leaf segment codec
//!
//! Converts the 64 words of a leaf into a compact chunk stream and back.
//!
//! ```text
//! +-------------+----------------------------------------------+
//! | count (u8)  | chunk 0 | chunk 1 | ... | chunk count-1      |
//! +-------------+----------------------------------------------+
//! ```
//!
//! A count byte of `0x00` or `0xFF` is a one-byte dummy standing for an
//! all-zero or all-one leaf; no chunks follow. Otherwise the count is 1..=64.
//!
//! Chunk header ranges:
//!
//! | header          | chunk                                           |
//! |-----------------|-------------------------------------------------|
//! | `0x00..=0x0F`   | zero run, `h + 1` words                         |
//! | `0x10..=0x1F`   | ones run, `h - 0x0F` words                      |
//! | `0x20..=0x2F`   | raw run, `h - 0x1F` words, 8 LE bytes each      |
//! | `0x30/31/32`    | sized zero/ones/raw run, extension byte = words |
//! | `0x33`          | bit row: low `n` bits set, extension byte = `n` |
//! | `0x34`          | inverted bit row: high `64 - n` bits set        |
//! | `0x35..=0x44`   | 1-byte pattern                                  |
//! | `0x45..=0x7C`   | 2-byte pattern                                  |
//! | `0x7D..=0xEC`   | 3-byte pattern                                  |
//!
//! A pattern word equals an all-zero (or, with the flip bit, all-one)
//! baseline except in 1-3 bytes. `code - base = rank * 2 + flip` where `rank`
//! is the position of the byte mask among all masks of the same popcount in
//! ascending order. The replacement bytes follow in ascending position.

use super::errors::{BitmapError, BitmapResult};
use super::leaf::LeafWords;
use super::LEAF_WORDS;

/// Count byte of the all-zero dummy
pub const ALL_ZERO: u8 = 0x00;
/// Count byte of the all-ones dummy
pub const ALL_ONES: u8 = 0xFF;
/// Upper bound of a compressed leaf stream
pub const MAX_STREAM_LEN: usize = 1 + LEAF_WORDS * 9;

const ZERO_RUN: u8 = 0x00;
const ONES_RUN: u8 = 0x10;
const RAW_RUN: u8 = 0x20;
const FIXED_RUN_MAX: usize = 16;
const SIZED_ZERO_RUN: u8 = 0x30;
const SIZED_ONES_RUN: u8 = 0x31;
const SIZED_RAW_RUN: u8 = 0x32;
const BIT_ROW: u8 = 0x33;
const BIT_ROW_INVERTED: u8 = 0x34;
const PATTERN_BASE: [u8; 3] = [0x35, 0x45, 0x7D];
const PATTERN_END: u8 = 0xED;

const PATTERN_MASKS_1: [u8; 8] = pattern_masks::<8>(1);
const PATTERN_MASKS_2: [u8; 28] = pattern_masks::<28>(2);
const PATTERN_MASKS_3: [u8; 56] = pattern_masks::<56>(3);
const PATTERN_RANKS: [u8; 256] = pattern_ranks();

/// Byte masks with `popcount` bits set, ascending.
const fn pattern_masks<const N: usize>(popcount: u32) -> [u8; N] {
    let mut masks = [0u8; N];
    let mut next = 0;
    let mut mask = 0usize;
    while mask < 256 {
        if (mask as u8).count_ones() == popcount {
            masks[next] = mask as u8;
            next += 1;
        }
        mask += 1;
    }
    masks
}

/// Rank of every byte mask among the masks sharing its popcount.
const fn pattern_ranks() -> [u8; 256] {
    let mut ranks = [0u8; 256];
    let mut seen = [0u8; 9];
    let mut mask = 0usize;
    while mask < 256 {
        let popcount = (mask as u8).count_ones() as usize;
        ranks[mask] = seen[popcount];
        seen[popcount] += 1;
        mask += 1;
    }
    ranks
}

fn pattern_mask(width: usize, rank: usize) -> u8 {
    match width {
        1 => PATTERN_MASKS_1[rank],
        2 => PATTERN_MASKS_2[rank],
        _ => PATTERN_MASKS_3[rank],
    }
}

/// The two leaf contents that need no allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trivial {
    /// Every bit clear
    Zero,
    /// Every bit set
    Ones,
}

impl Trivial {
    /// The word every position of the leaf holds
    pub fn word(self) -> u64 {
        match self {
            Trivial::Zero => 0,
            Trivial::Ones => u64::MAX,
        }
    }

    /// The one-byte dummy stream
    pub fn dummy(self) -> u8 {
        match self {
            Trivial::Zero => ALL_ZERO,
            Trivial::Ones => ALL_ONES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Trivial(Trivial),
    BitRow { len: u8, inverted: bool },
    Pattern { width: usize, mask: u8, flip: bool },
    Raw,
}

fn low_mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

fn low_run(word: u64) -> Option<u8> {
    let bits = word.trailing_ones();
    if bits > 0 && bits < 64 && word == low_mask(bits) {
        Some(bits as u8)
    } else {
        None
    }
}

fn differing_bytes(word: u64, baseline: u64) -> u8 {
    let diff = word ^ baseline;
    let mut mask = 0u8;
    for pos in 0..8 {
        if (diff >> (pos * 8)) & 0xFF != 0 {
            mask |= 1 << pos;
        }
    }
    mask
}

fn byte_pattern(word: u64) -> Option<(usize, u8, bool)> {
    let zero_mask = differing_bytes(word, 0);
    let ones_mask = differing_bytes(word, u64::MAX);
    let (mask, flip) = if ones_mask.count_ones() < zero_mask.count_ones() {
        (ones_mask, true)
    } else {
        (zero_mask, false)
    };
    let width = mask.count_ones() as usize;
    if (1..=3).contains(&width) {
        Some((width, mask, flip))
    } else {
        None
    }
}

fn classify(word: u64) -> Encoding {
    if word == 0 {
        return Encoding::Trivial(Trivial::Zero);
    }
    if word == u64::MAX {
        return Encoding::Trivial(Trivial::Ones);
    }
    if let Some(len) = low_run(word) {
        return Encoding::BitRow { len, inverted: false };
    }
    if let Some(len) = low_run(!word) {
        return Encoding::BitRow { len, inverted: true };
    }
    match byte_pattern(word) {
        Some((width, mask, flip)) => Encoding::Pattern { width, mask, flip },
        None => Encoding::Raw,
    }
}

fn run_end(words: &LeafWords, start: usize, extends: impl Fn(u64) -> bool) -> usize {
    let mut end = start + 1;
    while end < LEAF_WORDS && extends(words[end]) {
        end += 1;
    }
    end
}

fn push_run_header(out: &mut Vec<u8>, fixed: u8, sized: u8, len: usize) {
    if len <= FIXED_RUN_MAX {
        out.push(fixed + (len - 1) as u8);
    } else {
        out.push(sized);
        out.push(len as u8);
    }
}

/// Compress the words of one leaf.
///
/// Output is a fresh buffer; the input is never aliased. A leaf that is a
/// single trivial run comes back as its one-byte dummy.
pub fn compress(words: &LeafWords) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.push(0);

    let mut chunks = 0u8;
    let mut i = 0;
    while i < LEAF_WORDS {
        let word = words[i];
        match classify(word) {
            Encoding::Trivial(kind) => {
                let end = run_end(words, i, |w| w == word);
                let (fixed, sized) = match kind {
                    Trivial::Zero => (ZERO_RUN, SIZED_ZERO_RUN),
                    Trivial::Ones => (ONES_RUN, SIZED_ONES_RUN),
                };
                push_run_header(&mut out, fixed, sized, end - i);
                i = end;
            }
            Encoding::BitRow { len, inverted } => {
                out.push(if inverted { BIT_ROW_INVERTED } else { BIT_ROW });
                out.push(len);
                i += 1;
            }
            Encoding::Pattern { width, mask, flip } => {
                out.push(PATTERN_BASE[width - 1] + PATTERN_RANKS[mask as usize] * 2 + flip as u8);
                for pos in 0..8 {
                    if mask & (1 << pos) != 0 {
                        out.push((word >> (pos * 8)) as u8);
                    }
                }
                i += 1;
            }
            Encoding::Raw => {
                let end = run_end(words, i, |w| classify(w) == Encoding::Raw);
                push_run_header(&mut out, RAW_RUN, SIZED_RAW_RUN, end - i);
                for w in &words[i..end] {
                    out.extend_from_slice(&w.to_le_bytes());
                }
                i = end;
            }
        }
        chunks += 1;
    }
    out[0] = chunks;

    if let Some(kind) = single_trivial_chunk(&out) {
        return vec![kind.dummy()];
    }
    out
}

/// A stream whose only chunk is a 64-word trivial run.
fn single_trivial_chunk(stream: &[u8]) -> Option<Trivial> {
    match stream {
        [1, SIZED_ZERO_RUN, 64] => Some(Trivial::Zero),
        [1, SIZED_ONES_RUN, 64] => Some(Trivial::Ones),
        _ => None,
    }
}

/// Whether an already-compressed stream describes a trivial leaf.
///
/// Recognizes both dummies and a lone trivial run, which streams written by
/// other encoders may still carry.
pub fn trivial_kind(stream: &[u8]) -> Option<Trivial> {
    match stream {
        [ALL_ZERO] => Some(Trivial::Zero),
        [ALL_ONES] => Some(Trivial::Ones),
        _ => single_trivial_chunk(stream),
    }
}

#[derive(Debug, Clone, Copy)]
enum Chunk<'a> {
    Fill { word: u64, len: usize },
    Raw(&'a [u8]),
    Single(u64),
}

impl Chunk<'_> {
    fn len(&self) -> usize {
        match self {
            Chunk::Fill { len, .. } => *len,
            Chunk::Raw(bytes) => bytes.len() / 8,
            Chunk::Single(_) => 1,
        }
    }

    fn word(&self, index: usize) -> u64 {
        match self {
            Chunk::Fill { word, .. } => *word,
            Chunk::Raw(bytes) => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[index * 8..index * 8 + 8]);
                u64::from_le_bytes(buf)
            }
            Chunk::Single(word) => *word,
        }
    }
}

struct ChunkReader<'a> {
    stream: &'a [u8],
    pos: usize,
    remaining: usize,
    dummy: Option<Trivial>,
    words_seen: usize,
}

impl<'a> ChunkReader<'a> {
    fn new(stream: &'a [u8]) -> BitmapResult<Self> {
        let count = *stream
            .first()
            .ok_or_else(|| BitmapError::length_mismatch(0, "empty stream"))?;
        let (dummy, remaining) = match count {
            ALL_ZERO => (Some(Trivial::Zero), 0),
            ALL_ONES => (Some(Trivial::Ones), 0),
            n if n as usize <= LEAF_WORDS => (None, n as usize),
            n => {
                return Err(BitmapError::length_mismatch(0, format!("chunk count {}", n)));
            }
        };
        Ok(Self {
            stream,
            pos: 1,
            remaining,
            dummy,
            words_seen: 0,
        })
    }

    fn byte(&mut self) -> BitmapResult<u8> {
        let byte = *self
            .stream
            .get(self.pos)
            .ok_or_else(|| BitmapError::length_mismatch(self.pos, "stream truncated"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn bytes(&mut self, len: usize) -> BitmapResult<&'a [u8]> {
        let end = self.pos + len;
        let bytes = self
            .stream
            .get(self.pos..end)
            .ok_or_else(|| BitmapError::length_mismatch(self.pos, "raw run truncated"))?;
        self.pos = end;
        Ok(bytes)
    }

    fn run_len(&mut self) -> BitmapResult<usize> {
        let at = self.pos;
        let len = self.byte()? as usize;
        if len == 0 || len > LEAF_WORDS {
            return Err(BitmapError::length_mismatch(at, format!("run of {} words", len)));
        }
        Ok(len)
    }

    fn pattern(&mut self, header: u8) -> BitmapResult<u64> {
        let (width, offset) = if header >= PATTERN_BASE[2] {
            (3, header - PATTERN_BASE[2])
        } else if header >= PATTERN_BASE[1] {
            (2, header - PATTERN_BASE[1])
        } else {
            (1, header - PATTERN_BASE[0])
        };
        let mask = pattern_mask(width, (offset / 2) as usize);
        let mut word = if offset & 1 == 1 { u64::MAX } else { 0 };
        for pos in 0..8 {
            if mask & (1 << pos) != 0 {
                let byte = self.byte()? as u64;
                word &= !(0xFFu64 << (pos * 8));
                word |= byte << (pos * 8);
            }
        }
        Ok(word)
    }

    fn next_chunk(&mut self) -> BitmapResult<Option<Chunk<'a>>> {
        if let Some(kind) = self.dummy.take() {
            self.words_seen = LEAF_WORDS;
            return Ok(Some(Chunk::Fill {
                word: kind.word(),
                len: LEAF_WORDS,
            }));
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let at = self.pos;
        let header = self.byte()?;
        let chunk = match header {
            h if h < ONES_RUN => Chunk::Fill {
                word: 0,
                len: (h - ZERO_RUN) as usize + 1,
            },
            h if h < RAW_RUN => Chunk::Fill {
                word: u64::MAX,
                len: (h - ONES_RUN) as usize + 1,
            },
            h if h < SIZED_ZERO_RUN => {
                let len = (h - RAW_RUN) as usize + 1;
                Chunk::Raw(self.bytes(len * 8)?)
            }
            SIZED_ZERO_RUN => Chunk::Fill {
                word: 0,
                len: self.run_len()?,
            },
            SIZED_ONES_RUN => Chunk::Fill {
                word: u64::MAX,
                len: self.run_len()?,
            },
            SIZED_RAW_RUN => {
                let len = self.run_len()?;
                Chunk::Raw(self.bytes(len * 8)?)
            }
            BIT_ROW | BIT_ROW_INVERTED => {
                let bits = self.byte()? as u32;
                if bits == 0 || bits >= 64 {
                    return Err(BitmapError::invalid_bit_population(at, bits));
                }
                let row = low_mask(bits);
                Chunk::Single(if header == BIT_ROW_INVERTED { !row } else { row })
            }
            h if h < PATTERN_END => Chunk::Single(self.pattern(h)?),
            h => return Err(BitmapError::invalid_chunk_type(at, h)),
        };

        self.words_seen += chunk.len();
        if self.words_seen > LEAF_WORDS {
            return Err(BitmapError::length_mismatch(at, "chunks cover more than 64 words"));
        }
        Ok(Some(chunk))
    }

    fn finish(&self) -> BitmapResult<usize> {
        if self.words_seen != LEAF_WORDS {
            return Err(BitmapError::length_mismatch(
                self.pos,
                format!("chunks cover {} of 64 words", self.words_seen),
            ));
        }
        Ok(self.pos)
    }
}

/// Decompress a stream into a fresh set of words.
pub fn decompress(stream: &[u8]) -> BitmapResult<LeafWords> {
    let mut words = [0u64; LEAF_WORDS];
    decompress_into(stream, &mut words)?;
    Ok(words)
}

/// Decompress a stream into `out`. The stream must be consumed exactly.
pub fn decompress_into(stream: &[u8], out: &mut LeafWords) -> BitmapResult<()> {
    let mut reader = ChunkReader::new(stream)?;
    let mut at = 0;
    while let Some(chunk) = reader.next_chunk()? {
        for k in 0..chunk.len() {
            out[at + k] = chunk.word(k);
        }
        at += chunk.len();
    }
    let consumed = reader.finish()?;
    if consumed != stream.len() {
        return Err(BitmapError::length_mismatch(consumed, "trailing bytes after last chunk"));
    }
    Ok(())
}

/// Length of the stream at the front of `bytes`, validating every chunk.
pub fn stream_len(bytes: &[u8]) -> BitmapResult<usize> {
    let mut reader = ChunkReader::new(bytes)?;
    while reader.next_chunk()?.is_some() {}
    reader.finish()
}

/// Validate a complete stream.
pub fn validate(stream: &[u8]) -> BitmapResult<()> {
    let len = stream_len(stream)?;
    if len != stream.len() {
        return Err(BitmapError::length_mismatch(len, "trailing bytes after last chunk"));
    }
    Ok(())
}

/// Decode a single word without expanding the leaf.
pub fn get_word(stream: &[u8], index: usize) -> BitmapResult<u64> {
    if index >= LEAF_WORDS {
        return Err(BitmapError::usage(format!("word index {} outside leaf", index)));
    }
    let mut reader = ChunkReader::new(stream)?;
    let mut start = 0;
    while let Some(chunk) = reader.next_chunk()? {
        if index < start + chunk.len() {
            return Ok(chunk.word(index - start));
        }
        start += chunk.len();
    }
    Err(BitmapError::length_mismatch(
        reader.pos,
        format!("stream ends before word {}", index),
    ))
}

/// Expand a stream that was validated when it was stored.
///
/// Panics on corruption: a stored stream failing here is a logic bug.
pub(crate) fn expand_stored(stream: &[u8], out: &mut LeafWords) {
    if let Err(err) = decompress_into(stream, out) {
        panic!("stored leaf stream is corrupt: {}", err);
    }
}

/// Random-access read of a stream that was validated when it was stored.
pub(crate) fn word_stored(stream: &[u8], index: usize) -> u64 {
    match get_word(stream, index) {
        Ok(word) => word,
        Err(err) => panic!("stored leaf stream is corrupt: {}", err),
    }
}

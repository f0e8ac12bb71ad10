//! The block compressor.
//!
//! Matches are found through a hash table that maps the next few input bytes
//! to the most recent position where they occurred. The table has a fixed
//! footprint and a single slot per bucket (newest entry wins), which keeps
//! lookups O(1) and the whole search allocation-free — the table is the only
//! working state and the caller may pool it across calls.

use std::cmp;
use std::convert::TryInto;
use std::io::{self, Write};
use std::mem;

use byteorder::{ByteOrder, NativeEndian, WriteBytesExt, LE};
use cfg_if::cfg_if;
use fehler::throws;
use thiserror::Error;

use crate::format::{
    BoundedWriter, LAST_LITERALS, LITERAL_SHIFT, MAX_OFFSET, MF_LIMIT, MINMATCH, NIBBLE_MAX,
};

type Error = io::Error;

/// log2 of the number of hash buckets.
///
/// Fewer buckets mean more collisions and thus missed matches; more buckets
/// cost memory and cache misses. 4096 u32 slots (or 8192 u16 slots) is the
/// classic sweet spot for block-sized inputs.
const HASHLOG: usize = 12;
const TABLE_SIZE: usize = 1 << HASHLOG;

/// Compression failure modes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressError {
    /// The destination buffer cannot hold the compressed stream even though
    /// compression would shrink the block. Retry with more capacity;
    /// [`compress_bound`](crate::format::compress_bound) always suffices.
    #[error("destination buffer too small for the compressed stream")]
    BufferTooSmall,

    /// Encoding this block would not make it smaller. Not a defect in the
    /// input and nothing to retry — the caller stores the block raw instead.
    #[error("block would not shrink; store it uncompressed")]
    NotCompressible,
}

/// The match-finder's scratch table.
///
/// Implementations differ only in how wide their position slots are and thus
/// how large a block they can address. The table carries no correctness
/// state across blocks: [`compress_with_table`] clears it on entry, so a
/// caller pooling one table per call site only saves the allocation, never
/// the reset. The `&mut` borrow enforces that a pooled table serves one
/// in-flight call at a time.
pub trait MatchTable: Default {
    /// Largest input length whose positions fit in this table's slots.
    fn max_input_len() -> usize;

    /// Record `pos` as the newest occurrence of the bytes at `input[pos..]`
    /// and return the previous occupant of the bucket — the match candidate.
    /// The candidate is only a hash hit; callers must verify actual bytes.
    fn insert(&mut self, input: &[u8], pos: usize) -> usize;

    /// Forget all recorded positions so the table can serve a new block.
    fn reset(&mut self);
}

/// Match table for blocks of up to 65535 bytes — every page size in
/// practice. Half the memory of [`WideTable`] and twice the buckets per
/// byte.
pub struct CompactTable {
    slots: [u16; TABLE_SIZE * 2],
}

impl Default for CompactTable {
    fn default() -> Self {
        CompactTable { slots: [0; TABLE_SIZE * 2] }
    }
}

impl MatchTable for CompactTable {
    fn max_input_len() -> usize {
        u16::max_value() as usize
    }

    fn insert(&mut self, input: &[u8], pos: usize) -> usize {
        let mut value = pos.try_into().expect("block exceeds CompactTable range");
        mem::swap(&mut self.slots[hash_compact(&input[pos..])], &mut value);
        value as usize
    }

    fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = 0;
        }
    }
}

/// Match table for blocks too large for [`CompactTable`].
pub struct WideTable {
    slots: [u32; TABLE_SIZE],
}

impl Default for WideTable {
    fn default() -> Self {
        WideTable { slots: [0; TABLE_SIZE] }
    }
}

impl MatchTable for WideTable {
    fn max_input_len() -> usize {
        u32::max_value() as usize
    }

    fn insert(&mut self, input: &[u8], pos: usize) -> usize {
        let mut value = pos.try_into().expect("block exceeds WideTable range");
        mem::swap(&mut self.slots[hash_wide(&input[pos..])], &mut value);
        value.try_into().expect("16-bit targets are not supported")
    }

    fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = 0;
        }
    }
}

cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        /// Hash five bytes with a single 64-bit multiply.
        ///
        /// Reads eight bytes when they exist; the zero fallback only happens
        /// near the end of the block, where the search has already stopped
        /// producing matches, so a degenerate bucket is harmless.
        fn hash_wide(window: &[u8]) -> usize {
            let v = window.get(..8).map(NativeEndian::read_u64).unwrap_or(0);

            #[cfg(target_endian = "little")]
            fn fold(v: u64) -> u64 { (v << 24).wrapping_mul(889523592379) }
            #[cfg(target_endian = "big")]
            fn fold(v: u64) -> u64 { (v >> 24).wrapping_mul(11400714785074694791) }

            (fold(v) >> (64 - HASHLOG)) as usize
        }
    } else {
        fn hash_wide(window: &[u8]) -> usize {
            // one more shift: half as many slots as the compact table
            hash_compact(window) >> 1
        }
    }
}

/// Knuth multiplicative hash over the four bytes at the window start.
fn hash_compact(window: &[u8]) -> usize {
    let v = NativeEndian::read_u32(window);
    // one bit less than HASHLOG would suggest: the compact table has twice
    // the slots
    (v.wrapping_mul(2654435761) >> (32 - HASHLOG - 1)) as usize
}

/// A verified back-reference, ready for encoding.
#[derive(Copy, Clone, Debug)]
struct Match {
    /// Backward distance from the match to its source, 1..=MAX_OFFSET.
    offset: u16,
    /// Match length beyond [`MINMATCH`]; the token stores it this way.
    extra: usize,
}

/// Length of the common prefix of `a` and `b`.
///
/// Compares a register at a time and locates the first differing byte via
/// the XOR's trailing (or, big-endian, leading) zeros.
fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    const REGSIZE: usize = mem::size_of::<usize>();
    fn read_reg(b: &[u8]) -> usize {
        let mut buf = [0u8; REGSIZE];
        buf.copy_from_slice(&b[..REGSIZE]);
        usize::from_le_bytes(buf)
    }
    #[cfg(target_endian = "little")]
    fn first_diff_bit(i: usize) -> u32 { i.trailing_zeros() }
    #[cfg(target_endian = "big")]
    fn first_diff_bit(i: usize) -> u32 { i.leading_zeros() }

    let mut len = 0;
    for (a, b) in a.chunks_exact(REGSIZE).zip(b.chunks_exact(REGSIZE)) {
        let xor = read_reg(a) ^ read_reg(b);
        if xor != 0 {
            return len + (first_diff_bit(xor) / 8) as usize;
        }
        len += REGSIZE;
    }

    // all full registers matched; up to REGSIZE-1 tail bytes remain
    len + a.iter().zip(b).skip(len).take_while(|&(a, b)| a == b).count()
}

const ACCELERATION: usize = 1;
/// For every 1 << SKIP_TRIGGER fruitless probes, the search step grows by
/// one byte, so runs of incompressible data are skimmed rather than scanned.
const SKIP_TRIGGER: usize = 6;

/// Write a length into a token nibble, capped at the escape value.
fn pack_nibble(token: &mut u8, shift: usize, value: usize) {
    *token |= (cmp::min(value, NIBBLE_MAX) as u8) << shift;
}

/// Extension bytes for a nibble that hit the escape value.
#[throws]
#[inline]
fn write_length_tail<W: Write>(writer: &mut W, mut value: usize) {
    if value < NIBBLE_MAX {
        return;
    }
    value -= NIBBLE_MAX;
    while value >= 0xFF {
        writer.write_u8(0xFF)?;
        value -= 0xFF;
    }
    writer.write_u8(value as u8)?;
}

/// One full token: literal run followed by a match.
#[throws]
#[inline(never)]
fn write_sequence<W: Write>(writer: &mut W, literal: &[u8], m: Match) {
    let mut token = 0;
    pack_nibble(&mut token, LITERAL_SHIFT, literal.len());
    pack_nibble(&mut token, 0, m.extra);

    writer.write_u8(token)?;
    write_length_tail(writer, literal.len())?;
    writer.write_all(literal)?;
    writer.write_u16::<LE>(m.offset)?;
    write_length_tail(writer, m.extra)?;
}

/// The stream-final token: literals only, no offset follows.
#[throws]
fn write_final_literals<W: Write>(writer: &mut W, literal: &[u8]) {
    let mut token = 0;
    pack_nibble(&mut token, LITERAL_SHIFT, literal.len());

    writer.write_u8(token)?;
    write_length_tail(writer, literal.len())?;
    writer.write_all(literal)?;
}

/// Encode `input` as a token stream into `writer`.
///
/// This is the raw engine: it knows nothing about capacity policy and fails
/// only if the writer does. Public callers wrap the writer to enforce the
/// destination budget.
#[throws]
pub(crate) fn compress_into<W: Write, T: MatchTable>(input: &[u8], table: &mut T, mut writer: W) {
    assert!(
        input.len() <= T::max_input_len(),
        "block exceeds what this match table can address"
    );
    table.reset();

    let mut cursor = 0;
    while cursor < input.len() {
        let literal_start = cursor;

        let mut probes = ACCELERATION << SKIP_TRIGGER;
        let mut step = 1;

        // scan forward until a verified match breaks the loop
        let found = loop {
            if cursor + MF_LIMIT > input.len() {
                // nothing this close to the end may start a match; flush the
                // rest of the block as the stream-final literal token
                write_final_literals(&mut writer, &input[literal_start..])?;
                return;
            }

            // a match may not extend into the block's trailing literals
            let scan = &input[cursor..input.len() - LAST_LITERALS];
            let candidate = table.insert(input, cursor);

            if cursor != 0 && cursor - candidate <= MAX_OFFSET {
                // the table only hashed these positions; compare actual bytes
                let matched = common_prefix_len(scan, &input[candidate..]);
                if matched >= MINMATCH {
                    let offset = (cursor - candidate) as u16;

                    // bytes just before the cursor may also equal the bytes
                    // just before the candidate: pulling them out of the
                    // pending literal run lengthens the match for free
                    let backtrack = input[..cursor]
                        .iter()
                        .rev()
                        .zip(input[..candidate].iter().rev())
                        .take(cursor - literal_start)
                        .take_while(|&(a, b)| a == b)
                        .count();

                    cursor += matched;
                    // seed the table near the match end so the next search
                    // can chain right off it
                    table.insert(input, cursor - 2);

                    break Match { offset, extra: matched - MINMATCH + backtrack };
                }
            }

            cursor += step;
            step = probes >> SKIP_TRIGGER;
            // the first probe after a flush doesn't grow the step, matching
            // the reference encoder's pacing
            if literal_start + 1 != cursor {
                probes += 1;
            }
        };

        // cursor now points past the match
        let literal_end = cursor - found.extra - MINMATCH;
        write_sequence(&mut writer, &input[literal_start..literal_end], found)?;
    }
}

/// Compress `input` into `output`, returning the number of bytes written.
///
/// The stream is only emitted when it is strictly smaller than the input;
/// a block that would not shrink yields [`CompressError::NotCompressible`]
/// and the caller stores it raw. An empty input compresses to an empty
/// stream (`Ok(0)`), which [`decompress`](crate::decompress::decompress)
/// accepts against an empty output buffer.
///
/// Allocates a match table on the stack; callers compressing many blocks
/// can pool one via [`compress_with_table`].
pub fn compress(input: &[u8], output: &mut [u8]) -> Result<usize, CompressError> {
    if input.len() <= CompactTable::max_input_len() {
        compress_with_table(input, output, &mut CompactTable::default())
    } else {
        compress_with_table(input, output, &mut WideTable::default())
    }
}

/// [`compress`] with a caller-pooled match table.
///
/// The table is cleared on entry, so its previous contents never influence
/// the output; pooling saves the allocation only.
pub fn compress_with_table<T: MatchTable>(
    input: &[u8],
    output: &mut [u8],
    table: &mut T,
) -> Result<usize, CompressError> {
    if input.is_empty() {
        return Ok(0);
    }

    // A stream as large as the input is worthless, so the writer's budget is
    // capped at input.len() - 1 even when the caller's buffer is larger.
    let budget = cmp::min(output.len(), input.len() - 1);
    let mut writer = BoundedWriter::new(&mut output[..budget]);
    match compress_into(input, table, &mut writer) {
        Ok(()) => Ok(writer.written()),
        // the engine itself is infallible; only the writer can fail, by
        // running out of budget
        Err(_) => {
            if input.len() - 1 <= output.len() {
                Err(CompressError::NotCompressible)
            } else {
                Err(CompressError::BufferTooSmall)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompress::decompress_to_vec;
    use crate::format::compress_bound;

    #[test]
    fn run_of_one_byte_encodes_as_literal_plus_overlap_match() {
        let input = [b'a'; 100];
        let mut output = vec![0u8; compress_bound(input.len())];
        let written = compress(&input, &mut output).unwrap();

        // one literal, a match of 94 back to it (90 beyond MINMATCH, so an
        // extension byte of 90 - 15), then the mandatory 5 trailing literals
        assert_eq!(
            &output[..written],
            &[0x1F, b'a', 0x01, 0x00, 75, 0x50, b'a', b'a', b'a', b'a', b'a']
        );

        let restored = decompress_to_vec(&output[..written], input.len()).unwrap();
        assert_eq!(restored, &input[..]);
    }

    #[test]
    fn repeats_farther_than_the_window_are_not_matched() {
        // pattern (all bytes < 0x80), then unique filler in which every
        // other byte has the high bit set, then the pattern again at a
        // distance just past MAX_OFFSET. No valid match exists anywhere, so
        // a correct encoder emits pure literals; a broken one would wrap the
        // offset and corrupt the round trip.
        let pattern = b"ABCDEFGHIJKLMNOP";
        let mut input = Vec::new();
        input.extend_from_slice(pattern);
        for n in 0u16..32768 {
            input.extend_from_slice(&(n | 0x8000).to_le_bytes());
        }
        input.extend_from_slice(pattern);
        assert!(input.len() - pattern.len() > MAX_OFFSET);

        let mut stream = Vec::new();
        compress_into(&input, &mut WideTable::default(), &mut stream).unwrap();
        assert!(stream.len() > input.len(), "no match should have been found");

        let restored = decompress_to_vec(&stream, input.len()).unwrap();
        assert_eq!(restored, input);
    }

    #[test]
    fn capacity_smaller_than_needed_is_buffer_too_small() {
        let input = [7u8; 1000]; // compresses to a handful of bytes
        let mut output = [0u8; 4];
        assert_eq!(
            compress(&input, &mut output),
            Err(CompressError::BufferTooSmall)
        );
    }

    #[test]
    fn single_byte_blocks_never_shrink() {
        let mut output = [0u8; 16];
        assert_eq!(
            compress(b"x", &mut output),
            Err(CompressError::NotCompressible)
        );
    }

    #[test]
    fn length_tail_escape_boundaries() {
        let mut buf = Vec::new();
        write_length_tail(&mut buf, 14).unwrap();
        assert!(buf.is_empty()); // fits in the nibble, no tail

        buf.clear();
        write_length_tail(&mut buf, 15).unwrap();
        assert_eq!(buf, [0]); // escape value needs a terminating zero

        buf.clear();
        write_length_tail(&mut buf, 15 + 255).unwrap();
        assert_eq!(buf, [0xFF, 0]);

        buf.clear();
        write_length_tail(&mut buf, 15 + 254).unwrap();
        assert_eq!(buf, [254]);
    }
}

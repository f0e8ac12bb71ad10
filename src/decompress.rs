//! The block decompressor.
//!
//! Runs on every page fault, on input that may come from corrupted storage,
//! so every read and write is bounds-checked and every malformed stream
//! fails with a typed error. The decoder never reads or writes outside the
//! two caller-provided buffers.

use byteorder::{ByteOrder, LE};
use thiserror::Error;

use crate::format::{LITERAL_SHIFT, MINMATCH, NIBBLE_MAX};

/// Decompression failure modes. All of them indicate a stream that this
/// crate's compressor (or any conforming one) would never produce; none are
/// recoverable by retrying.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressError {
    /// The input ended in the middle of a token (truncated header, missing
    /// offset, or fewer literal bytes than the token promised).
    #[error("compressed stream ended in the middle of a token")]
    UnexpectedEndOfInput,

    /// A token references bytes outside the valid bounds: an offset of zero
    /// or reaching before the start of the output, or a length that would
    /// write past the expected output size.
    #[error("token references bytes outside the produced output")]
    CorruptStream,

    /// The stream was well-formed but produced the wrong number of bytes.
    #[error("stream produced {produced} bytes but the caller expected {expected}")]
    OutputSizeMismatch { produced: usize, expected: usize },
}

/// Resolve a token nibble into a full length by consuming extension bytes.
fn read_length_tail(
    nibble: usize,
    input: &[u8],
    pos: &mut usize,
) -> Result<usize, DecompressError> {
    let mut value = nibble;
    if nibble == NIBBLE_MAX {
        loop {
            let byte = *input
                .get(*pos)
                .ok_or(DecompressError::UnexpectedEndOfInput)?;
            *pos += 1;
            value += byte as usize;
            if byte != 0xFF {
                break;
            }
        }
    }
    Ok(value)
}

/// Expand a match of `len` bytes ending the output at `out`, copying from
/// `offset` bytes back.
///
/// When `offset < len` the source and destination ranges overlap and the
/// match replays its own output — that is how runs are encoded — so every
/// path here must behave exactly like a forward byte-by-byte copy.
/// Bounds were checked by the caller: `1 <= offset <= out` and
/// `out + len <= output.len()`.
fn copy_match(output: &mut [u8], out: usize, offset: usize, len: usize) {
    let src = out - offset;
    match offset {
        // a self-overlapping distance-1 match is just a byte run
        1 => {
            let byte = output[out - 1];
            for slot in output[out..out + len].iter_mut() {
                *slot = byte;
            }
        }

        // no overlap: one plain memmove
        o if len <= o => output.copy_within(src..src + len, out),

        // short overlapping period that divides 16: replicate the pattern
        // into a scratch register and blast it out in 16-byte chunks
        2 | 4 | 8 => {
            let mut pattern = [0u8; 16];
            for chunk in pattern.chunks_mut(offset) {
                chunk.copy_from_slice(&output[src..src + offset]);
            }
            for chunk in output[out..out + len].chunks_mut(16) {
                let n = chunk.len();
                chunk.copy_from_slice(&pattern[..n]);
            }
        }

        // general overlap: the forward byte copy everything else must equal
        _ => {
            for i in 0..len {
                output[out + i] = output[src + i];
            }
        }
    }
}

/// Decompress `input` into `output`, filling it exactly.
///
/// `output.len()` is the expected decompressed size, which the storage
/// layer carries out-of-band; the stream itself has no length field. Any
/// mismatch, truncation, or out-of-bounds reference fails with the matching
/// [`DecompressError`] and `output` contents are unspecified.
pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<(), DecompressError> {
    let mut pos = 0; // input cursor
    let mut out = 0; // output cursor

    while pos < input.len() {
        let token = input[pos];
        pos += 1;

        // literal run
        let literal_len = read_length_tail((token >> LITERAL_SHIFT) as usize, input, &mut pos)?;
        if literal_len > input.len() - pos {
            return Err(DecompressError::UnexpectedEndOfInput);
        }
        if literal_len > output.len() - out {
            return Err(DecompressError::CorruptStream);
        }
        output[out..out + literal_len].copy_from_slice(&input[pos..pos + literal_len]);
        pos += literal_len;
        out += literal_len;

        // the final token of a stream carries literals only
        if pos == input.len() {
            break;
        }

        // match
        if input.len() - pos < 2 {
            return Err(DecompressError::UnexpectedEndOfInput);
        }
        let offset = LE::read_u16(&input[pos..pos + 2]) as usize;
        pos += 2;
        let match_len =
            MINMATCH + read_length_tail((token & NIBBLE_MAX as u8) as usize, input, &mut pos)?;

        // a match may only replay bytes this stream has already produced
        if offset == 0 || offset > out {
            return Err(DecompressError::CorruptStream);
        }
        if match_len > output.len() - out {
            return Err(DecompressError::CorruptStream);
        }
        copy_match(output, out, offset, match_len);
        out += match_len;
    }

    if out != output.len() {
        return Err(DecompressError::OutputSizeMismatch {
            produced: out,
            expected: output.len(),
        });
    }
    Ok(())
}

/// [`decompress`] into a freshly allocated buffer of `expected_len` bytes.
pub fn decompress_to_vec(input: &[u8], expected_len: usize) -> Result<Vec<u8>, DecompressError> {
    let mut output = vec![0u8; expected_len];
    decompress(input, &mut output)?;
    Ok(output)
}

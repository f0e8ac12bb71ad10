//! The LZ4P wire format.
//!
//! A compressed block is a sequence of tokens with no header or trailer; the
//! decompressed size travels out-of-band (the storage layer records it per
//! page). Each token is:
//!
//! * one token byte — high nibble: literal-run length, low nibble: match
//!   length minus [`MINMATCH`],
//! * if a nibble is 15, extension bytes follow: every `0xFF` adds 255 and
//!   continues, the first other byte adds its value and stops,
//! * the literal bytes themselves,
//! * a 2-byte little-endian match offset (1..=65535), counted backwards
//!   from the current output position — omitted only for the final token of
//!   a stream, which carries literals alone.
//!
//! This is the well-known LZ4 block token layout, so any conforming LZ4
//! block decoder can read our streams and vice versa.

use std::io::{self, ErrorKind, Write};

/// Matches shorter than this are never encoded; the match-length nibble
/// stores `length - MINMATCH`.
pub const MINMATCH: usize = 4;

/// Largest backward distance the wire format can express (the 64 KiB
/// window). Bounds the *encoder's* match search; the decoder's only hard
/// rule is that an offset may not reach before the start of the output.
pub const MAX_OFFSET: usize = 0xFFFF;

/// A nibble of 15 in the token byte escapes into extension bytes.
pub(crate) const NIBBLE_MAX: usize = 0xF;
/// The literal-run length lives in the high nibble of the token byte.
pub(crate) const LITERAL_SHIFT: usize = 4;

/// Positions closer than this to the end of the block never start a match.
pub(crate) const MF_LIMIT: usize = 13;
/// The last bytes of every block are always encoded as literals.
pub(crate) const LAST_LITERALS: usize = 5;

/// Worst-case compressed size for `input_len` bytes of input.
///
/// A destination buffer of this capacity never yields
/// [`BufferTooSmall`](crate::CompressError::BufferTooSmall) (though it may
/// still yield [`NotCompressible`](crate::CompressError::NotCompressible),
/// which is about the *input* size, not the capacity).
pub fn compress_bound(input_len: usize) -> usize {
    input_len + input_len / 255 + 16
}

/// Writer over a fixed destination slice that refuses partial writes.
///
/// The encoder emits whole fields (token byte, length run, literal slice,
/// offset); a partially written field is useless to any decoder, so when a
/// field doesn't fit we fail the write outright and leave the cursor where
/// it was. Running out of space surfaces as `ErrorKind::WriteZero`, which
/// the compressor maps to its typed outcome.
pub(crate) struct BoundedWriter<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl<'a> BoundedWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        BoundedWriter { buf, written: 0 }
    }

    /// Number of bytes emitted so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl Write for BoundedWriter<'_> {
    #[inline]
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() - self.written < data.len() {
            return Err(ErrorKind::WriteZero.into());
        }
        self.buf[self.written..self.written + data.len()].copy_from_slice(data);
        self.written += data.len();
        Ok(data.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_writer_is_all_or_nothing() {
        let mut buf = [0u8; 4];
        let mut w = BoundedWriter::new(&mut buf);
        w.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(w.written(), 3);
        // two more bytes don't fit; nothing may be written
        w.write_all(&[4, 5]).unwrap_err();
        assert_eq!(w.written(), 3);
        w.write_all(&[4]).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn bound_covers_pure_literal_streams() {
        for len in &[0usize, 1, 14, 15, 16, 269, 270, 4096, 65535] {
            // worst case is one literal-only token: 1 token byte plus one
            // extension byte per 255 bytes of length
            let overhead = 1 + if *len >= 15 { (len - 15) / 255 + 1 } else { 0 };
            assert!(compress_bound(*len) >= len + overhead);
        }
    }
}

#![forbid(unsafe_code)]

//! An LZ4-style block codec for compressed-RAM swap backends.
//!
//! Compresses one block (typically a memory page) at a time, fast enough to
//! sit on the synchronous reclaim path, and decompresses it back on every
//! page fault. There is no framing, no checksums and no cross-block state:
//! each call is a pure function of its input plus caller-owned buffers, so
//! independent blocks can be processed concurrently. The wire format is
//! described in [`format`].
//!
//! Compression that wouldn't shrink a block — random or already-compressed
//! data — is reported as [`CompressError::NotCompressible`] rather than
//! emitting a stream larger than its input; the storage layer then keeps
//! the block raw. The decompressed size is not part of the stream either:
//! the caller remembers it and passes a destination of exactly that length.
//!
//! ```
//! use lz4p::{compress, compress_bound, decompress, CompressError};
//!
//! let page = [0x42u8; 4096];
//! let mut dst = vec![0u8; compress_bound(page.len())];
//! match compress(&page, &mut dst) {
//!     Ok(n) => {
//!         let mut restored = [0u8; 4096];
//!         decompress(&dst[..n], &mut restored).unwrap();
//!         assert_eq!(restored[..], page[..]);
//!     }
//!     Err(CompressError::NotCompressible) => { /* store the page raw */ }
//!     Err(other) => panic!("{}", other),
//! }
//! ```

pub mod compress;
pub mod decompress;
pub mod format;

pub use compress::{
    compress, compress_with_table, CompactTable, CompressError, MatchTable, WideTable,
};
pub use decompress::{decompress, decompress_to_vec, DecompressError};
pub use format::{compress_bound, MAX_OFFSET, MINMATCH};

#[cfg(test)]
mod tests {
    use crate::{compress, compress_bound, decompress, decompress_to_vec, CompressError};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Compress and decompress, accepting the not-compressible outcome —
    /// for short or high-entropy blocks it is the correct answer.
    fn roundtrip(data: &[u8]) {
        let mut buf = vec![0u8; compress_bound(data.len())];
        match compress(data, &mut buf) {
            Ok(written) => {
                assert!(
                    data.is_empty() || written < data.len(),
                    "an emitted stream must beat storing the block raw"
                );
                let restored = decompress_to_vec(&buf[..written], data.len()).unwrap();
                assert_eq!(restored, data);
            }
            Err(CompressError::NotCompressible) => {}
            Err(other) => panic!("unexpected failure: {}", other),
        }
    }

    fn roundtrip_str(s: &str) {
        roundtrip(s.as_bytes());
    }

    #[test]
    fn prose() {
        roundtrip_str("the quick brown fox jumps over the lazy dog");
        roundtrip_str("a page is a page is a page is a page is a page");
        roundtrip_str("free memory is wasted memory, reclaimed memory is neither");
        roundtrip_str("it was the best of buffers, it was the worst of buffers");
    }

    #[test]
    fn short_blocks() {
        roundtrip_str("swap");
        roundtrip_str("abc");
        roundtrip_str("x-29");
        roundtrip_str("x");
        roundtrip_str(".");
        roundtrip_str("");
    }

    #[test]
    fn nulls() {
        roundtrip(&[0u8; 13]);
        roundtrip(&[0u8; 64]);
    }

    #[test]
    fn text_actually_shrinks() {
        let s = "The Read trait allows for reading bytes from a source. \
                 Implementors of the Read trait are called 'readers'. \
                 Readers are defined by one required method, read().";
        let mut buf = vec![0u8; compress_bound(s.len())];
        let written = compress(s.as_bytes(), &mut buf).unwrap();
        assert!(written < s.len());
        assert_eq!(decompress_to_vec(&buf[..written], s.len()).unwrap(), s.as_bytes());
    }

    #[test]
    fn empty_block() {
        let mut buf = [0u8; 16];
        assert_eq!(compress(&[], &mut buf), Ok(0));
        decompress(&[], &mut []).unwrap();
    }

    #[test]
    fn zeroed_page() {
        let page = vec![0u8; 4096];
        let mut buf = vec![0u8; compress_bound(page.len())];
        let written = compress(&page, &mut buf).unwrap();
        assert!(written < 64, "an all-zero page must compress to almost nothing");
        assert_eq!(decompress_to_vec(&buf[..written], page.len()).unwrap(), page);
    }

    #[test]
    fn random_page_is_not_compressible() {
        let mut page = vec![0u8; 4096];
        StdRng::seed_from_u64(0x1209).fill(&mut page[..]);
        let mut buf = vec![0u8; 4096];
        assert_eq!(
            compress(&page, &mut buf),
            Err(CompressError::NotCompressible)
        );
    }

    #[test]
    fn large_block_takes_the_wide_table() {
        // over 64 KiB, so the u32-slot table is selected; the generator has
        // period 256 and compresses well
        let mut data = Vec::with_capacity(1 << 20);
        for n in 0..(1 << 20) {
            data.push((n as u8).wrapping_mul(0xA).wrapping_add(33) ^ 0xA2);
        }
        let mut buf = vec![0u8; compress_bound(data.len())];
        let written = compress(&data, &mut buf).unwrap();
        assert!(written < data.len() / 10);
        assert_eq!(decompress_to_vec(&buf[..written], data.len()).unwrap(), data);
    }

    #[test]
    fn pooled_table_serves_consecutive_blocks() {
        use crate::CompactTable;

        let mut table = CompactTable::default();
        let first = b"one fish two fish red fish blue fish one fish two fish";
        let second = vec![0x5Au8; 500];

        for block in &[&first[..], &second[..]] {
            let mut buf = vec![0u8; compress_bound(block.len())];
            let written =
                crate::compress_with_table(block, &mut buf, &mut table).unwrap();
            assert_eq!(
                decompress_to_vec(&buf[..written], block.len()).unwrap(),
                *block
            );
        }
    }
}

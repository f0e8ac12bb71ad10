#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4p::{compress, compress_bound, decompress, CompressError};

fuzz_target!(|data: &[u8]| {
    let mut buf = vec![0u8; compress_bound(data.len())];
    match compress(data, &mut buf) {
        Ok(written) => {
            let mut restored = vec![0u8; data.len()];
            decompress(&buf[..written], &mut restored)
                .expect("compressor produced an undecodable stream");
            assert!(restored == data);
        }
        Err(CompressError::NotCompressible) => {}
        Err(other) => panic!("{}", other),
    }
});

#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // decode attacker-controlled bytes against a few plausible page sizes;
    // errors are expected and ignored, crashes are findings
    for &len in &[0usize, 1, 512, 4096] {
        let mut out = vec![0u8; len];
        let _ = lz4p::decompress(data, &mut out);
    }
});

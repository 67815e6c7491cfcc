use bcstore::{compress_ctx, decompress_ctx, Cparams};

/// A 64 KiB buffer with no exploitable structure should fall back to a
/// memcpy-backed chunk rather than expanding past the header overhead.
fn pseudo_random(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x2545F4914F6CDD1D;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state & 0xFF) as u8
        })
        .collect()
}

#[test]
fn incompressible_block_falls_back_to_memcpy() {
    let src = pseudo_random(64 * 1024);
    let cparams = Cparams {
        typesize: 1,
        clevel: 5,
        ..Cparams::default()
    };
    let chunk = compress_ctx(&cparams, &src).unwrap();
    assert!(chunk.len() <= src.len() + 32);

    let mut dest = vec![0u8; src.len()];
    let n = decompress_ctx(&Default::default(), &chunk, &mut dest, None).unwrap();
    assert_eq!(n, src.len());
    assert_eq!(dest, src);
}

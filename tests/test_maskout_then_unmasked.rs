use bcstore::{compress_ctx, decompress_ctx, BlockMask, Cparams, Dparams};

#[test]
fn maskout_leaves_masked_blocks_untouched_then_full_roundtrip() {
    let n = 1024 * 1024 / 8; // 1 MiB of int64
    let mut src = Vec::with_capacity(n * 8);
    for i in 0..n as i64 {
        src.extend_from_slice(&i.to_le_bytes());
    }

    let cparams = Cparams {
        typesize: 8,
        blocksize: 32 * 1024,
        filters: vec![],
        ..Cparams::default()
    };
    let chunk = compress_ctx(&cparams, &src).unwrap();
    let nblocks = (src.len() + cparams.blocksize - 1) / cparams.blocksize;

    let sentinel = 0xABu8;
    let mut dest = vec![sentinel; src.len()];
    let mut mask = BlockMask((0..nblocks).map(|i| i % 2 == 0).collect());
    decompress_ctx(&Dparams::default(), &chunk, &mut dest, Some(&mut mask)).unwrap();

    for (i, block) in dest.chunks(cparams.blocksize).enumerate() {
        if i % 2 == 0 {
            assert!(block.iter().all(|&b| b == sentinel), "block {i} should be untouched");
        } else {
            let expected = &src[i * cparams.blocksize..i * cparams.blocksize + block.len()];
            assert_eq!(block, expected, "block {i} should be decoded");
        }
    }

    // Mask is cleared after one call; the next decode on the same chunk is a
    // plain full roundtrip.
    let mut full = vec![sentinel; src.len()];
    decompress_ctx(&Dparams::default(), &chunk, &mut full, None).unwrap();
    assert_eq!(full, src);
}

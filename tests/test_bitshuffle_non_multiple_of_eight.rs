use bcstore::{compress_ctx, decompress_ctx, Codec, Cparams, Dparams, Filter};

#[test]
fn bitshuffle_handles_a_non_multiple_of_eight_buffer() {
    let len = 641_092usize;
    let mut src = vec![0u8; len];
    for (i, b) in src.iter_mut().enumerate() {
        *b = ((i / 4) % 17) as u8;
    }

    let cparams = Cparams {
        typesize: 4,
        clevel: 9,
        codec: Codec::Lz4,
        filters: vec![Filter::Bitshuffle],
        ..Cparams::default()
    };
    let chunk = compress_ctx(&cparams, &src).unwrap();

    let mut dest = vec![0u8; len];
    let n = decompress_ctx(&Dparams::default(), &chunk, &mut dest, None).unwrap();
    assert_eq!(n, len);
    assert_eq!(dest, src);
}

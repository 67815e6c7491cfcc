use bcstore::{compress_ctx, decompress_ctx, getitem_ctx, Cparams, Dparams, Filter};

#[test]
fn byte_shuffle_preserves_an_arange() {
    let n = 200_000i32;
    let mut src = Vec::with_capacity(n as usize * 4);
    for i in 0..n {
        src.extend_from_slice(&i.to_le_bytes());
    }

    let cparams = Cparams {
        typesize: 4,
        clevel: 9,
        filters: vec![Filter::Shuffle],
        ..Cparams::default()
    };
    let chunk = compress_ctx(&cparams, &src).unwrap();
    assert!(chunk.len() < 100 * 1024);

    let mut dest = vec![0u8; src.len()];
    decompress_ctx(&Dparams::default(), &chunk, &mut dest, None).unwrap();
    assert_eq!(dest, src);

    let mut item_dest = vec![0u8; 5 * 4];
    getitem_ctx(&Dparams::default(), &chunk, 1000, 5, &mut item_dest).unwrap();
    let got: Vec<i32> = item_dest
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(got, vec![1000, 1001, 1002, 1003, 1004]);
}

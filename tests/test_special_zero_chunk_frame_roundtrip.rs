use bcstore::{Cparams, Dparams, Schunk, SpecialKind};

#[test]
fn special_zero_chunk_survives_frame_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zeros.b2frame");

    let cparams = Cparams {
        typesize: 8,
        filters: vec![],
        ..Cparams::default()
    };
    let mut schunk = Schunk::new(cparams, Dparams::default());
    let added = schunk
        .fill_special(625_000, SpecialKind::Zero, 125_000)
        .unwrap();
    assert_eq!(added, 5);

    bcstore::frame::to_file(&schunk, &path).unwrap();
    let file_len = std::fs::metadata(&path).unwrap().len();
    assert!(file_len <= 1024);

    let reopened = bcstore::frame::open(&path).unwrap();
    let mut dest = vec![0xffu8; 1_000_000];
    reopened.decompress_chunk(3, &mut dest).unwrap();
    assert!(dest.iter().all(|&b| b == 0));
}

use bcstore::{Cparams, Dparams, Schunk};

fn build() -> Schunk {
    let cparams = Cparams {
        typesize: 4,
        clevel: 9,
        filters: vec![],
        ..Cparams::default()
    };
    let mut schunk = Schunk::new(cparams, Dparams::default());
    let chunk_a: Vec<u8> = [0.1f32, 0.2f32].iter().flat_map(|v| v.to_le_bytes()).collect();
    let chunk_b: Vec<u8> = [0.3f32, 0.4f32].iter().flat_map(|v| v.to_le_bytes()).collect();
    schunk.append_buffer(&chunk_a).unwrap();
    schunk.append_buffer(&chunk_b).unwrap();
    schunk
}

#[test]
fn mmap_and_stdio_frames_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let stdio_path = dir.path().join("stdio.b2frame");
    let mmap_path = dir.path().join("mmap.b2frame");

    let schunk = build();
    bcstore::frame::to_file(&schunk, &stdio_path).unwrap();
    bcstore::frame::to_file_mmap(&schunk, &mmap_path).unwrap();

    let a = std::fs::read(&stdio_path).unwrap();
    let b = std::fs::read(&mmap_path).unwrap();
    assert_eq!(a, b);

    let reopened = bcstore::frame::open(&mmap_path).unwrap();
    let mut dest = vec![0u8; 8];
    reopened.decompress_chunk(1, &mut dest).unwrap();
    let v0 = f32::from_le_bytes(dest[0..4].try_into().unwrap());
    let v1 = f32::from_le_bytes(dest[4..8].try_into().unwrap());
    assert!((v0 - 0.3).abs() < 1e-6);
    assert!((v1 - 0.4).abs() < 1e-6);
}

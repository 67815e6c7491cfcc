//! Sparse (directory) frame serialization: the same logical
//! content as a contiguous frame, but one file per chunk plus a small index
//! file, so individual chunks can be added/removed without rewriting a
//! shared byte range.
//!
//! Chunk files are named by a stable id assigned once at first commit, not
//! by logical position; inserting or deleting a chunk elsewhere in the
//! sequence never renames an existing chunk's file. The index file (same
//! header+trailer shape as a contiguous frame, with the chunk body section
//! empty) records the id for each logical position.

use crate::chunk;
use crate::codecs::Codec;
use crate::context::Cparams;
use crate::error::{BcError, BcResult};
use crate::filters::Filter;
use crate::io::{IoBackend, StdioBackend};
use crate::meta::{MetalayerTable, VlMetaTable};
use crate::schunk::{ChunkEntry, ContiguousHandle, Schunk};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const INDEX_FILE: &str = "index.b2frame";

fn chunk_file_name(id: u64) -> String {
    format!("chunk-{id:016x}.bin")
}

/// Per-super-chunk sparse-frame state: the backing directory and the next
/// id to hand out for a newly committed chunk.
pub struct SparseHandle {
    dir: PathBuf,
    next_id: u64,
}

impl SparseHandle {
    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn chunk_path(&self, id: u64) -> PathBuf {
        self.dir.join(chunk_file_name(id))
    }

    pub(crate) fn remove_chunk_file(&mut self, id: u64) -> BcResult<()> {
        let path = self.chunk_path(id);
        std::fs::remove_file(&path).map_err(|source| BcError::FileRemove {
            path: path.display().to_string(),
            source,
        })
    }

    /// Writes any not-yet-committed chunks to their own files (assigning
    /// each a fresh id) and rewrites the index file in full; existing chunk
    /// files are never touched.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn commit(
        &mut self,
        chunks: &[ChunkEntry],
        physical_ids: &mut [Option<u64>],
        typesize: usize,
        codec: Codec,
        chunksize: i64,
        nbytes: i64,
        cbytes: i64,
        metalayers: &MetalayerTable,
        vlmeta: &VlMetaTable,
    ) -> BcResult<()> {
        for (entry, slot) in chunks.iter().zip(physical_ids.iter_mut()) {
            if slot.is_none() {
                let id = self.next_id;
                self.next_id += 1;
                let bytes = crate::frame::chunk_bytes_of(entry)?;
                let path = self.chunk_path(id);
                let mut backend = StdioBackend::open_create(&path)?;
                backend.write(0, &bytes)?;
                backend.flush()?;
                *slot = Some(id);
            }
        }

        let ids: Vec<u64> = physical_ids
            .iter()
            .map(|o| o.expect("every chunk committed above"))
            .collect();

        let mut trailer = Vec::new();
        trailer.extend_from_slice(&crate::frame::encode_metalayers(metalayers));
        trailer.extend_from_slice(&crate::frame::encode_vlmeta(vlmeta));
        trailer.extend_from_slice(&crate::frame::encode_offsets(&ids));

        let header = crate::frame::write_header(&crate::frame::FrameHeader {
            typesize,
            codec,
            chunksize,
            nbytes,
            cbytes,
            nchunks: chunks.len() as u32,
            trailer_offset: crate::frame::HEADER_LEN as u64,
            io_backend_id: crate::constants::io_id::STDIO,
        });

        let mut index = StdioBackend::open_create(self.index_path())?;
        index.write(0, &header)?;
        index.write(crate::frame::HEADER_LEN as u64, &trailer)?;
        index.flush()
    }
}

fn base_cparams(h: &crate::frame::FrameHeader) -> Cparams {
    Cparams {
        typesize: h.typesize,
        codec: h.codec,
        filters: vec![Filter::Shuffle],
        ..Cparams::default()
    }
}

/// Creates a new, empty sparse frame rooted at directory `dir` (created if
/// missing) and returns a super-chunk backed by it.
pub fn create(dir: impl AsRef<Path>, cparams: Cparams, dparams: crate::context::Dparams) -> BcResult<Schunk> {
    let dir = dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&dir).map_err(|source| BcError::FileOpen {
        path: dir.display().to_string(),
        source,
    })?;
    let mut handle = SparseHandle { dir, next_id: 0 };
    handle.commit(
        &[],
        &mut [],
        cparams.typesize,
        cparams.codec,
        -1,
        0,
        0,
        &MetalayerTable::default(),
        &VlMetaTable::default(),
    )?;
    let mut schunk = Schunk::new(cparams, dparams);
    schunk.attach_sparse(handle);
    Ok(schunk)
}

/// Reopens an existing sparse frame directory.
pub fn open(dir: impl AsRef<Path>) -> BcResult<Schunk> {
    let dir = dir.as_ref().to_path_buf();
    let index_path = dir.join(INDEX_FILE);
    let mut index = StdioBackend::open_existing(&index_path)?;
    let file_len = index.size()?;
    let header_bytes = index.read_owned(0, crate::frame::HEADER_LEN)?;
    let header = crate::frame::parse_frame_header(&header_bytes)?;
    let trailer_len = (file_len - header.trailer_offset) as usize;
    let trailer_bytes = index.read_owned(header.trailer_offset, trailer_len)?;

    let mut pos = 0usize;
    let metalayers = crate::frame::decode_metalayers(&trailer_bytes, &mut pos)?;
    let vlmeta = crate::frame::decode_vlmeta(&trailer_bytes, &mut pos)?;
    let ids = crate::frame::decode_offsets(&trailer_bytes, &mut pos)?;
    if ids.len() != header.nchunks as usize {
        return Err(BcError::InvalidHeader(
            "sparse index length does not match nchunks".into(),
        ));
    }

    let mut chunks = Vec::with_capacity(ids.len());
    let mut max_id = 0u64;
    for &id in &ids {
        max_id = max_id.max(id);
        let chunk_path = dir.join(chunk_file_name(id));
        let backend: Box<dyn IoBackend> = Box::new(StdioBackend::open_existing(&chunk_path)?);
        let handle: ContiguousHandle = Arc::new(Mutex::new(backend));
        let file_len = handle.lock().expect("lock poisoned").size()?;
        let lazy = crate::frame::build_lazy_chunk(&handle, 0, file_len)?;
        chunks.push(ChunkEntry::Lazy(lazy));
    }

    let mut schunk = Schunk::from_parts(
        base_cparams(&header),
        crate::context::Dparams::default(),
        chunks,
        header.chunksize,
        header.nbytes,
        header.cbytes,
        metalayers,
        vlmeta,
        None,
    );
    schunk.attach_sparse(SparseHandle {
        dir,
        next_id: if ids.is_empty() { 0 } else { max_id + 1 },
    });
    // `from_parts` only knows how to seed `physical_offsets` for a
    // contiguous backing; reattach the sparse ids by committing with
    // nothing dirty, which requires the ids to already be in place.
    schunk.set_physical_ids(ids);
    Ok(schunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Dparams;

    fn cparams() -> Cparams {
        Cparams {
            typesize: 8,
            filters: vec![],
            nthreads: 1,
            ..Cparams::default()
        }
    }

    #[test]
    fn sparse_roundtrip_through_directory() {
        let dir = tempfile::tempdir().unwrap();
        let frame_dir = dir.path().join("frame_dir");
        let mut schunk = create(&frame_dir, cparams(), Dparams::default()).unwrap();
        for c in 0..3i64 {
            let mut buf = Vec::with_capacity(80);
            for i in 0..10i64 {
                buf.extend_from_slice(&(c * 10 + i).to_le_bytes());
            }
            schunk.append_buffer(&buf).unwrap();
        }
        drop(schunk);

        let reopened = open(&frame_dir).unwrap();
        assert_eq!(reopened.nchunks(), 3);
        let mut dest = vec![0u8; 80];
        reopened.decompress_chunk(1, &mut dest).unwrap();
        let v0 = i64::from_le_bytes(dest[0..8].try_into().unwrap());
        assert_eq!(v0, 10);
    }

    #[test]
    fn delete_removes_chunk_file() {
        let dir = tempfile::tempdir().unwrap();
        let frame_dir = dir.path().join("frame_dir2");
        let mut schunk = create(&frame_dir, cparams(), Dparams::default()).unwrap();
        schunk.append_buffer(&[1u8; 80]).unwrap();
        schunk.append_buffer(&[2u8; 80]).unwrap();
        let chunk_files_before = std::fs::read_dir(&frame_dir).unwrap().count();
        schunk.delete_chunk(0).unwrap();
        let chunk_files_after = std::fs::read_dir(&frame_dir).unwrap().count();
        assert_eq!(chunk_files_after, chunk_files_before - 1);
        assert_eq!(schunk.nchunks(), 1);
    }
}

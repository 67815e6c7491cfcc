//! Super-chunk (schunk) layer: an ordered, editable
//! sequence of chunks sharing compression parameters, with append/insert/
//! update/delete, metadata, and a random-access byte-slice engine spanning
//! chunk boundaries.

use crate::chunk::{self, ChunkHeader, SpecialKind};
use crate::context::{BlockMask, Cparams, Dparams};
use crate::env;
use crate::error::{BcError, BcResult};
use crate::io::IoBackend;
use crate::meta::{MetalayerTable, VlMetaTable};
use crate::sframe::SparseHandle;
use std::sync::{Arc, Mutex};

/// A frame backend shared by every [`LazyChunk`] and by the schunk's own
/// commit path; `Mutex`-guarded because `IoBackend::read_owned`/`write` take
/// `&mut self` but several lazy chunks hold the same handle.
pub type ContiguousHandle = Arc<Mutex<Box<dyn IoBackend>>>;

/// A chunk's storage: fully owned compressed bytes, or a lazy reference
/// into a frame backend that defers payload reads until the decoder asks
/// for specific blocks.
/// `Arc<[u8]>` rather than `Vec<u8>` so [`Schunk::get_chunk`] can hand back
/// a zero-copy [`ChunkView::Borrowed`] without re-cloning on every call.
#[derive(Clone)]
pub enum ChunkEntry {
    Owned(Arc<[u8]>),
    Lazy(LazyChunk),
}

/// A chunk carrying only its header and offset table, backed by a frame
/// handle and a base offset; satisfies the same decoding interface as a
/// materialized chunk once [`LazyChunk::materialize`] pulls in the blocks
/// actually requested.
#[derive(Clone)]
pub struct LazyChunk {
    pub header_and_offsets: Vec<u8>,
    pub source: ContiguousHandle,
    pub base_offset: u64,
    pub cbytes: usize,
}

impl LazyChunk {
    pub fn header(&self) -> BcResult<ChunkHeader> {
        chunk::parse_header(&self.header_and_offsets)
    }

    /// Reads this chunk's full compressed byte range from the backend in one
    /// call. Used by `decompress_chunk`, which touches every block anyway.
    pub fn materialize(&self) -> BcResult<Vec<u8>> {
        let mut lock = self.source.lock().expect("frame backend lock poisoned");
        lock.read_owned(self.base_offset, self.cbytes)
    }

    /// Reads only the byte ranges covering `blocks`, leaving the rest of the
    /// returned buffer zeroed (never touched by the decoder since it only
    /// indexes `[offsets[i], offsets[i+1])` for `i` in `blocks`). This is
    /// the genuinely lazy path used by `getitem`.
    pub fn materialize_blocks(
        &self,
        header: &ChunkHeader,
        offsets: &[usize],
        blocks: std::ops::RangeInclusive<usize>,
    ) -> BcResult<Vec<u8>> {
        let mut buf = vec![0u8; header.cbytes];
        buf[..self.header_and_offsets.len()].copy_from_slice(&self.header_and_offsets);
        let nblocks = offsets.len();
        let mut lock = self.source.lock().expect("frame backend lock poisoned");
        for i in blocks {
            let start = offsets[i];
            let end = if i + 1 < nblocks {
                offsets[i + 1]
            } else {
                header.cbytes
            };
            let bytes = lock.read_owned(self.base_offset + start as u64, end - start)?;
            buf[start..end].copy_from_slice(&bytes);
        }
        Ok(buf)
    }
}

/// Redesign of the C API's pointer-returning `get_chunk`: a
/// sum type instead of an out-param signalling whether the caller must
/// free the buffer.
pub enum ChunkView<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl<'a> std::ops::Deref for ChunkView<'a> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            ChunkView::Borrowed(b) => b,
            ChunkView::Owned(v) => v,
        }
    }
}

/// How a super-chunk's chunks are persisted, if at all.
enum Backing {
    /// Chunks owned directly by the super-chunk; no backing frame.
    None,
    /// Contiguous frame: `tail_offset` is where the next
    /// committed chunk's bytes will be written (initially the header
    /// length for a brand-new frame, or the prior trailer offset for one
    /// just opened).
    Contiguous {
        handle: ContiguousHandle,
        tail_offset: u64,
    },
    /// Sparse (directory) frame.
    Sparse(SparseHandle),
}

/// An ordered, editable sequence of chunks sharing compression parameters.
pub struct Schunk {
    pub cparams: Cparams,
    pub dparams: Dparams,
    chunks: Vec<ChunkEntry>,
    /// Parallel to `chunks`; `None` means "not yet written to the backing
    /// frame" (only meaningful when `backing` is not `Backing::None`).
    physical_offsets: Vec<Option<u64>>,
    chunksize: i64,
    nbytes: i64,
    cbytes: i64,
    pub metalayers: MetalayerTable,
    pub vlmeta: VlMetaTable,
    backing: Backing,
}

impl Schunk {
    pub fn new(cparams: Cparams, dparams: Dparams) -> Self {
        Schunk {
            cparams,
            dparams,
            chunks: Vec::new(),
            physical_offsets: Vec::new(),
            chunksize: -1,
            nbytes: 0,
            cbytes: 0,
            metalayers: MetalayerTable::default(),
            vlmeta: VlMetaTable::default(),
            backing: Backing::None,
        }
    }

    pub(crate) fn from_parts(
        cparams: Cparams,
        dparams: Dparams,
        chunks: Vec<ChunkEntry>,
        chunksize: i64,
        nbytes: i64,
        cbytes: i64,
        metalayers: MetalayerTable,
        vlmeta: VlMetaTable,
        backing_contiguous: Option<(ContiguousHandle, u64)>,
    ) -> Self {
        let physical_offsets = chunks
            .iter()
            .map(|c| match c {
                ChunkEntry::Lazy(l) => Some(l.base_offset),
                ChunkEntry::Owned(_) => None,
            })
            .collect();
        let backing = match backing_contiguous {
            Some((handle, tail_offset)) => Backing::Contiguous { handle, tail_offset },
            None => Backing::None,
        };
        Schunk {
            cparams,
            dparams,
            chunks,
            physical_offsets,
            chunksize,
            nbytes,
            cbytes,
            metalayers,
            vlmeta,
            backing,
        }
    }

    pub(crate) fn attach_sparse(&mut self, handle: SparseHandle) {
        self.backing = Backing::Sparse(handle);
    }

    /// Seeds `physical_offsets` with the chunk-file ids recorded in a
    /// just-opened sparse index, so the next `commit` treats every existing
    /// chunk as already persisted.
    pub(crate) fn set_physical_ids(&mut self, ids: Vec<u64>) {
        self.physical_offsets = ids.into_iter().map(Some).collect();
    }

    pub fn nchunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn nbytes(&self) -> i64 {
        self.nbytes
    }

    pub fn cbytes(&self) -> i64 {
        self.cbytes
    }

    pub fn chunksize(&self) -> i64 {
        self.chunksize
    }

    /// Whether the last chunk is shorter than `chunksize`:
    /// while true, further `append_buffer` calls are rejected.
    pub fn has_trailing_chunk(&self) -> bool {
        if self.chunks.is_empty() || self.chunksize < 0 {
            return false;
        }
        match self.nth_header(self.chunks.len() - 1) {
            Ok(h) => (h.nbytes as i64) < self.chunksize,
            Err(_) => false,
        }
    }

    fn effective_cparams(&self) -> BcResult<Cparams> {
        env::effective_cparams(&self.cparams)
    }

    fn effective_dparams(&self) -> BcResult<Dparams> {
        env::effective_dparams(&self.dparams)
    }

    fn bytes_of(&self, nchunk: usize) -> BcResult<Vec<u8>> {
        match self.chunks.get(nchunk) {
            Some(ChunkEntry::Owned(b)) => Ok(b.to_vec()),
            Some(ChunkEntry::Lazy(l)) => l.materialize(),
            None => Err(BcError::NotFound(format!("chunk {nchunk}"))),
        }
    }

    fn nth_header(&self, nchunk: usize) -> BcResult<ChunkHeader> {
        match self.chunks.get(nchunk) {
            Some(ChunkEntry::Owned(b)) => chunk::parse_header(b),
            Some(ChunkEntry::Lazy(l)) => l.header(),
            None => Err(BcError::NotFound(format!("chunk {nchunk}"))),
        }
    }

    // ---- append / insert / update / delete ----

    /// `append_buffer`: compresses `src` and appends it as a
    /// new chunk. `src.len()` must equal `chunksize` except for a single
    /// trailing (shorter) chunk, after which further appends are rejected
    /// until the trailing chunk is removed.
    pub fn append_buffer(&mut self, src: &[u8]) -> BcResult<usize> {
        self.append_buffer_inner(src).map_err(|e| {
            crate::error::trace_error("Schunk::append_buffer", &e);
            e
        })
    }

    fn append_buffer_inner(&mut self, src: &[u8]) -> BcResult<usize> {
        if self.has_trailing_chunk() {
            return Err(BcError::ChunkAppend(
                "cannot append after a trailing (short) chunk".into(),
            ));
        }
        if self.chunksize >= 0 && (src.len() as i64) > self.chunksize {
            return Err(BcError::ChunkAppend(format!(
                "buffer is {} bytes, chunksize is {}",
                src.len(),
                self.chunksize
            )));
        }
        let cparams = self.effective_cparams()?;
        let chunk_bytes = chunk::compress_ctx(&cparams, src)?;
        if self.chunksize < 0 {
            self.chunksize = src.len() as i64;
        }
        self.push_owned(chunk_bytes, src.len() as i64)?;
        self.commit()?;
        Ok(self.chunks.len())
    }

    fn push_owned(&mut self, chunk_bytes: Vec<u8>, nbytes: i64) -> BcResult<()> {
        let cbytes = chunk_bytes.len() as i64;
        self.chunks.push(ChunkEntry::Owned(Arc::from(chunk_bytes)));
        self.physical_offsets.push(None);
        self.nbytes += nbytes;
        self.cbytes += cbytes;
        Ok(())
    }

    /// `append_chunk`: appends a pre-compressed chunk,
    /// validating its typesize/chunksize against this schunk's. `copy`
    /// mirrors the C API's ownership knob: when true the bytes are cloned
    /// before being stored so the caller's buffer stays independently
    /// usable; Rust's ownership already moves `chunk_bytes` into this call
    /// either way, so the distinction is about aliasing, not lifetime.
    pub fn append_chunk(&mut self, chunk_bytes: Vec<u8>, copy: bool) -> BcResult<usize> {
        self.validate_foreign_chunk(&chunk_bytes)?;
        let header = chunk::parse_header(&chunk_bytes)?;
        if self.has_trailing_chunk() {
            return Err(BcError::ChunkAppend(
                "cannot append after a trailing (short) chunk".into(),
            ));
        }
        let bytes = if copy { chunk_bytes.clone() } else { chunk_bytes };
        if self.chunksize < 0 {
            self.chunksize = header.nbytes as i64;
        }
        self.push_owned(bytes, header.nbytes as i64)?;
        self.commit()?;
        Ok(self.chunks.len())
    }

    fn validate_foreign_chunk(&self, chunk_bytes: &[u8]) -> BcResult<()> {
        let header = chunk::parse_header(chunk_bytes)?;
        if header.typesize != self.cparams.typesize {
            return Err(BcError::ChunkAppend(format!(
                "chunk typesize {} does not match schunk typesize {}",
                header.typesize, self.cparams.typesize
            )));
        }
        if self.chunksize >= 0 && (header.nbytes as i64) > self.chunksize {
            return Err(BcError::ChunkAppend(format!(
                "chunk is {} bytes uncompressed, chunksize is {}",
                header.nbytes, self.chunksize
            )));
        }
        Ok(())
    }

    /// `insert_chunk`: shifts chunks at and after `pos`
    /// right by one.
    pub fn insert_chunk(&mut self, pos: usize, chunk_bytes: Vec<u8>, copy: bool) -> BcResult<()> {
        self.insert_chunk_inner(pos, chunk_bytes, copy).map_err(|e| {
            crate::error::trace_error("Schunk::insert_chunk", &e);
            e
        })
    }

    fn insert_chunk_inner(&mut self, pos: usize, chunk_bytes: Vec<u8>, copy: bool) -> BcResult<()> {
        if pos > self.chunks.len() {
            return Err(BcError::ChunkInsert(format!(
                "position {pos} exceeds nchunks {}",
                self.chunks.len()
            )));
        }
        self.validate_foreign_chunk(&chunk_bytes)?;
        let header = chunk::parse_header(&chunk_bytes)?;
        let bytes = if copy { chunk_bytes.clone() } else { chunk_bytes };
        if self.chunksize < 0 {
            self.chunksize = header.nbytes as i64;
        }
        self.chunks
            .insert(pos, ChunkEntry::Owned(Arc::from(bytes)));
        self.physical_offsets.insert(pos, None);
        self.nbytes += header.nbytes as i64;
        self.cbytes += header.cbytes as i64;
        self.commit()
    }

    /// `update_chunk`: replaces the chunk at `pos`. On a
    /// frame-backed schunk the new bytes land at the end of the frame on
    /// the next commit, leaving the old payload as an unreferenced hole
    /// (the format tolerates this).
    pub fn update_chunk(&mut self, pos: usize, chunk_bytes: Vec<u8>, copy: bool) -> BcResult<()> {
        self.update_chunk_inner(pos, chunk_bytes, copy).map_err(|e| {
            crate::error::trace_error("Schunk::update_chunk", &e);
            e
        })
    }

    fn update_chunk_inner(&mut self, pos: usize, chunk_bytes: Vec<u8>, copy: bool) -> BcResult<()> {
        let old_header = self.nth_header(pos)?;
        self.validate_foreign_chunk(&chunk_bytes)?;
        let header = chunk::parse_header(&chunk_bytes)?;
        let bytes = if copy { chunk_bytes.clone() } else { chunk_bytes };
        self.chunks[pos] = ChunkEntry::Owned(Arc::from(bytes));
        self.physical_offsets[pos] = None;
        self.nbytes += header.nbytes as i64 - old_header.nbytes as i64;
        self.cbytes += header.cbytes as i64 - old_header.cbytes as i64;
        self.commit()
    }

    /// `delete_chunk`: removes the chunk at `pos`; for sparse
    /// frames, its backing file is removed too.
    pub fn delete_chunk(&mut self, pos: usize) -> BcResult<()> {
        self.delete_chunk_inner(pos).map_err(|e| {
            crate::error::trace_error("Schunk::delete_chunk", &e);
            e
        })
    }

    fn delete_chunk_inner(&mut self, pos: usize) -> BcResult<()> {
        if pos >= self.chunks.len() {
            return Err(BcError::NotFound(format!("chunk {pos}")));
        }
        let header = self.nth_header(pos)?;
        self.nbytes -= header.nbytes as i64;
        self.cbytes -= header.cbytes as i64;
        if let Backing::Sparse(handle) = &mut self.backing {
            if let Some(id) = self.physical_offsets[pos] {
                handle.remove_chunk_file(id)?;
            }
        }
        self.chunks.remove(pos);
        self.physical_offsets.remove(pos);
        self.commit()
    }

    // ---- decompression / getitem ----

    pub fn decompress_chunk(&self, nchunk: usize, dest: &mut [u8]) -> BcResult<usize> {
        let dparams = self.effective_dparams()?;
        let bytes = self.bytes_of(nchunk)?;
        chunk::decompress_ctx(&dparams, &bytes, dest, None)
    }

    pub fn decompress_chunk_masked(
        &self,
        nchunk: usize,
        dest: &mut [u8],
        mask: &mut BlockMask,
    ) -> BcResult<usize> {
        let dparams = self.effective_dparams()?;
        let bytes = self.bytes_of(nchunk)?;
        chunk::decompress_ctx(&dparams, &bytes, dest, Some(mask))
    }

    pub fn get_chunk(&self, nchunk: usize) -> BcResult<ChunkView<'_>> {
        match self.chunks.get(nchunk) {
            Some(ChunkEntry::Owned(b)) => Ok(ChunkView::Borrowed(b)),
            Some(ChunkEntry::Lazy(l)) => Ok(ChunkView::Owned(l.materialize()?)),
            None => Err(BcError::NotFound(format!("chunk {nchunk}"))),
        }
    }

    /// `get_lazychunk`: only meaningful for frame-backed
    /// schunks, since an in-memory chunk has nothing further to defer.
    pub fn get_lazychunk(&self, nchunk: usize) -> BcResult<LazyChunk> {
        match self.chunks.get(nchunk) {
            Some(ChunkEntry::Lazy(l)) => Ok(l.clone()),
            Some(ChunkEntry::Owned(_)) => Err(BcError::FrameType),
            None => Err(BcError::NotFound(format!("chunk {nchunk}"))),
        }
    }

    /// `getitem_ctx` routed through a lazy chunk when available, so only
    /// the blocks intersecting `[start_item, start_item+nitems)` are read
    /// from the backend.
    pub fn getitem(
        &self,
        nchunk: usize,
        start_item: usize,
        nitems: usize,
        dest: &mut [u8],
    ) -> BcResult<usize> {
        let dparams = self.effective_dparams()?;
        match self.chunks.get(nchunk) {
            Some(ChunkEntry::Owned(b)) => {
                chunk::getitem_ctx(&dparams, b, start_item, nitems, dest)
            }
            Some(ChunkEntry::Lazy(l)) => {
                let header = l.header()?;
                let typesize = header.typesize;
                let start_byte = start_item * typesize;
                let nbytes = nitems * typesize;
                if start_byte + nbytes > header.nbytes {
                    return Err(BcError::InvalidParam(
                        "getitem range exceeds chunk size".into(),
                    ));
                }
                if header.special.is_some() || header.is_memcpy() {
                    let full = l.materialize()?;
                    return chunk::getitem_ctx(&dparams, &full, start_item, nitems, dest);
                }
                let nblocks = header.nblocks();
                let offsets = chunk::read_offsets(&l.header_and_offsets, &header, nblocks)?;
                let blocksize = header.blocksize;
                let first_block = start_byte / blocksize;
                let last_block = (start_byte + nbytes - 1) / blocksize;
                let partial = l.materialize_blocks(&header, &offsets, first_block..=last_block)?;
                chunk::getitem_ctx(&dparams, &partial, start_item, nitems, dest)
            }
            None => Err(BcError::NotFound(format!("chunk {nchunk}"))),
        }
    }

    /// `fill_special`: bulk-appends whole chunks made
    /// entirely of one special kind, in O(1) per chunk. Returns the number
    /// of chunks added, including a shorter trailing chunk if `nitems`
    /// isn't a multiple of `chunksize`.
    pub fn fill_special(
        &mut self,
        nitems: i64,
        kind: SpecialKind,
        chunksize: i64,
    ) -> BcResult<usize> {
        if nitems <= 0 || chunksize <= 0 {
            return Err(BcError::InvalidParam(
                "fill_special requires positive nitems and chunksize".into(),
            ));
        }
        if self.has_trailing_chunk() {
            return Err(BcError::ChunkAppend(
                "cannot append after a trailing (short) chunk".into(),
            ));
        }
        let typesize = self.cparams.typesize as i64;
        let chunk_bytes_size = chunksize * typesize;
        if self.chunksize < 0 {
            self.chunksize = chunk_bytes_size;
        } else if self.chunksize != chunk_bytes_size {
            return Err(BcError::InvalidParam(
                "fill_special chunksize does not match schunk chunksize".into(),
            ));
        }
        let total_bytes = nitems * typesize;
        let mut remaining = total_bytes;
        let mut added = 0usize;
        while remaining > 0 {
            let this_nbytes = remaining.min(chunk_bytes_size) as usize;
            let chunk_bytes = match kind {
                SpecialKind::Zero => chunk::chunk_zeros(&self.cparams, this_nbytes),
                SpecialKind::Nan => chunk::chunk_nans(&self.cparams, this_nbytes)?,
                SpecialKind::Uninit => chunk::chunk_uninit(&self.cparams, this_nbytes),
                SpecialKind::Value => {
                    return Err(BcError::InvalidParam(
                        "fill_special with Value requires chunk_repeatval directly".into(),
                    ))
                }
            };
            self.push_owned(chunk_bytes, this_nbytes as i64)?;
            added += 1;
            remaining -= this_nbytes as i64;
        }
        self.commit()?;
        Ok(added)
    }

    // ---- metalayers ----

    pub fn meta_add(&mut self, name: &str, content: &[u8]) -> BcResult<()> {
        self.metalayers.add(name, content)?;
        self.commit()
    }

    pub fn meta_get(&self, name: &str) -> Option<&[u8]> {
        self.metalayers.get(name)
    }

    pub fn meta_update(&mut self, name: &str, content: &[u8]) -> BcResult<()> {
        self.metalayers.update(name, content)?;
        self.commit()
    }

    pub fn meta_exists(&self, name: &str) -> bool {
        self.metalayers.exists(name)
    }

    pub fn vlmeta_add(&mut self, name: &str, content: &[u8]) -> BcResult<()> {
        self.vlmeta.add(name, content)?;
        self.commit()
    }

    pub fn vlmeta_get(&self, name: &str) -> BcResult<Vec<u8>> {
        self.vlmeta.get(name)
    }

    pub fn vlmeta_update(&mut self, name: &str, content: &[u8]) -> BcResult<()> {
        self.vlmeta.update(name, content)?;
        self.commit()
    }

    pub fn vlmeta_delete(&mut self, name: &str) -> BcResult<()> {
        self.vlmeta.delete(name)?;
        self.commit()
    }

    pub fn vlmeta_get_names(&self) -> Vec<&str> {
        self.vlmeta.names()
    }

    pub fn vlmeta_exists(&self, name: &str) -> bool {
        self.vlmeta.exists(name)
    }

    // ---- slice engine ----

    fn chunk_len(&self, nchunk: usize) -> BcResult<usize> {
        Ok(self.nth_header(nchunk)?.nbytes)
    }

    /// `get_slice_nchunks`: the chunk indices intersecting
    /// `[start, stop)` without materializing anything.
    pub fn get_slice_nchunks(&self, start: i64, stop: i64) -> BcResult<Vec<usize>> {
        if self.chunksize <= 0 || start < 0 || stop < start {
            return Err(BcError::InvalidParam("invalid slice range".into()));
        }
        let first = (start / self.chunksize) as usize;
        let last = (((stop - 1).max(0)) / self.chunksize) as usize;
        Ok((first..=last.min(self.chunks.len().saturating_sub(1))).collect())
    }

    /// `get_slice_buffer`: reads logical bytes `[start, stop)`
    /// across chunk boundaries, decoding edge chunks and copying interior
    /// chunks whole.
    pub fn get_slice_buffer(&self, start: i64, stop: i64, dst: &mut [u8]) -> BcResult<()> {
        if stop < start || start < 0 {
            return Err(BcError::InvalidParam("invalid slice range".into()));
        }
        let total = (stop - start) as usize;
        if dst.len() < total {
            return Err(BcError::WriteBufferTooSmall);
        }
        if total == 0 {
            return Ok(());
        }
        let chunksize = self.chunksize.max(1);
        let mut pos = start;
        let mut dst_off = 0usize;
        while pos < stop {
            let nchunk = (pos / chunksize) as usize;
            let chunk_start = nchunk as i64 * chunksize;
            let this_len = self.chunk_len(nchunk)? as i64;
            let chunk_end = chunk_start + this_len;
            let seg_start = pos.max(chunk_start);
            let seg_stop = stop.min(chunk_end);
            let seg_len = (seg_stop - seg_start) as usize;
            if seg_start == chunk_start && seg_len == this_len as usize {
                self.decompress_chunk(nchunk, &mut dst[dst_off..dst_off + seg_len])?;
            } else {
                let mut scratch = vec![0u8; this_len as usize];
                self.decompress_chunk(nchunk, &mut scratch)?;
                let local_start = (seg_start - chunk_start) as usize;
                dst[dst_off..dst_off + seg_len]
                    .copy_from_slice(&scratch[local_start..local_start + seg_len]);
            }
            dst_off += seg_len;
            pos = seg_stop;
        }
        Ok(())
    }

    /// `set_slice_buffer`: writes logical bytes `[start,
    /// stop)`. A chunk that is wholly and block-aligned covered is
    /// recompressed directly from `src`; otherwise it is decompressed,
    /// patched, and recompressed via `update_chunk`.
    pub fn set_slice_buffer(&mut self, start: i64, stop: i64, src: &[u8]) -> BcResult<()> {
        if stop < start || start < 0 {
            return Err(BcError::InvalidParam("invalid slice range".into()));
        }
        let total = (stop - start) as usize;
        if src.len() < total {
            return Err(BcError::ReadBufferTooSmall);
        }
        if total == 0 {
            return Ok(());
        }
        let chunksize = self.chunksize.max(1);
        let mut pos = start;
        let mut src_off = 0usize;
        while pos < stop {
            let nchunk = (pos / chunksize) as usize;
            let chunk_start = nchunk as i64 * chunksize;
            let this_len = self.chunk_len(nchunk)? as i64;
            let chunk_end = chunk_start + this_len;
            let seg_start = pos.max(chunk_start);
            let seg_stop = stop.min(chunk_end);
            let seg_len = (seg_stop - seg_start) as usize;

            let new_chunk = if seg_start == chunk_start && seg_len == this_len as usize {
                let cparams = self.effective_cparams()?;
                chunk::compress_ctx(&cparams, &src[src_off..src_off + seg_len])?
            } else {
                let mut scratch = vec![0u8; this_len as usize];
                self.decompress_chunk(nchunk, &mut scratch)?;
                let local_start = (seg_start - chunk_start) as usize;
                scratch[local_start..local_start + seg_len]
                    .copy_from_slice(&src[src_off..src_off + seg_len]);
                let cparams = self.effective_cparams()?;
                chunk::compress_ctx(&cparams, &scratch)?
            };
            self.update_chunk(nchunk, new_chunk, false)?;

            src_off += seg_len;
            pos = seg_stop;
        }
        Ok(())
    }

    // ---- frame commit ----

    /// Persists any chunks not yet written to the backing frame and
    /// rewrites the trailer + header. A no-op for purely in-memory
    /// super-chunks. Mutating frame operations must not overlap with
    /// decompress calls on the same schunk; callers order
    /// that externally.
    pub(crate) fn commit(&mut self) -> BcResult<()> {
        self.commit_inner().map_err(|e| {
            crate::error::trace_error("Schunk::commit", &e);
            e
        })
    }

    fn commit_inner(&mut self) -> BcResult<()> {
        match &mut self.backing {
            Backing::None => Ok(()),
            Backing::Contiguous { handle, tail_offset } => {
                crate::frame::commit_contiguous(
                    &*handle,
                    tail_offset,
                    &self.chunks,
                    &mut self.physical_offsets,
                    self.cparams.typesize,
                    self.cparams.codec,
                    self.chunksize,
                    self.nbytes,
                    self.cbytes,
                    &self.metalayers,
                    &self.vlmeta,
                )
            }
            Backing::Sparse(sparse) => sparse.commit(
                &self.chunks,
                &mut self.physical_offsets,
                self.cparams.typesize,
                self.cparams.codec,
                self.chunksize,
                self.nbytes,
                self.cbytes,
                &self.metalayers,
                &self.vlmeta,
            ),
        }
    }

    pub(crate) fn chunks(&self) -> &[ChunkEntry] {
        &self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Filter;

    fn cparams() -> Cparams {
        Cparams {
            typesize: 8,
            filters: vec![],
            nthreads: 1,
            ..Cparams::default()
        }
    }

    #[test]
    fn append_and_decompress_roundtrip() {
        let mut schunk = Schunk::new(cparams(), Dparams::default());
        let chunk_elems = 1000usize;
        let chunksize_bytes = chunk_elems * 8;
        for c in 0..3i64 {
            let mut buf = Vec::with_capacity(chunksize_bytes);
            for i in 0..chunk_elems as i64 {
                buf.extend_from_slice(&(c * 1000 + i).to_le_bytes());
            }
            schunk.append_buffer(&buf).unwrap();
        }
        assert_eq!(schunk.nchunks(), 3);
        assert_eq!(schunk.nbytes(), 3 * chunksize_bytes as i64);

        let mut dest = vec![0u8; chunksize_bytes];
        schunk.decompress_chunk(1, &mut dest).unwrap();
        let v0 = i64::from_le_bytes(dest[0..8].try_into().unwrap());
        assert_eq!(v0, 1000);
    }

    #[test]
    fn trailing_chunk_blocks_further_appends() {
        let mut schunk = Schunk::new(cparams(), Dparams::default());
        schunk.append_buffer(&[0u8; 800]).unwrap();
        schunk.append_buffer(&[0u8; 400]).unwrap(); // shorter: trailing
        assert!(schunk.has_trailing_chunk());
        assert!(schunk.append_buffer(&[0u8; 800]).is_err());
    }

    #[test]
    fn delete_then_append_reaches_equivalent_state() {
        let mut schunk = Schunk::new(cparams(), Dparams::default());
        let mut bufs = Vec::new();
        for c in 0..4i64 {
            let mut buf = Vec::with_capacity(80);
            for i in 0..10i64 {
                buf.extend_from_slice(&(c * 10 + i).to_le_bytes());
            }
            bufs.push(buf.clone());
            schunk.append_buffer(&buf).unwrap();
        }
        schunk.delete_chunk(2).unwrap();
        schunk.insert_chunk(2, chunk::compress_ctx(&cparams(), &bufs[2]).unwrap(), false).unwrap();
        assert_eq!(schunk.nchunks(), 4);
        for (i, expected) in bufs.iter().enumerate() {
            let mut dest = vec![0u8; expected.len()];
            schunk.decompress_chunk(i, &mut dest).unwrap();
            assert_eq!(&dest, expected);
        }
    }

    #[test]
    fn slice_self_consistency() {
        let mut schunk = Schunk::new(cparams(), Dparams::default());
        for c in 0..3i64 {
            let mut buf = Vec::with_capacity(80);
            for i in 0..10i64 {
                buf.extend_from_slice(&(c * 10 + i).to_le_bytes());
            }
            schunk.append_buffer(&buf).unwrap();
        }
        let total = schunk.nbytes();
        let src: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        schunk.set_slice_buffer(20, 140, &src[20..140]).unwrap();
        let mut out = vec![0u8; 120];
        schunk.get_slice_buffer(20, 140, &mut out).unwrap();
        assert_eq!(out, src[20..140]);
    }

    #[test]
    fn fill_special_chunk_count() {
        let mut schunk = Schunk::new(cparams(), Dparams::default());
        let added = schunk.fill_special(2500, SpecialKind::Zero, 1000).unwrap();
        assert_eq!(added, 3); // ceil(2500/1000)
        assert_eq!(schunk.nchunks(), 3);
        let mut dest = vec![0xffu8; 8000];
        schunk.decompress_chunk(0, &mut dest).unwrap();
        assert!(dest.iter().all(|&b| b == 0));
    }

    #[test]
    fn metalayers_and_vlmeta_roundtrip() {
        let mut schunk = Schunk::new(cparams(), Dparams::default());
        schunk.meta_add("info", b"abcd").unwrap();
        assert_eq!(schunk.meta_get("info"), Some(&b"abcd"[..]));
        schunk.vlmeta_add("author", b"someone").unwrap();
        assert_eq!(schunk.vlmeta_get("author").unwrap(), b"someone");
    }

    #[test]
    fn shuffle_filters_still_used() {
        let _ = Filter::Shuffle;
    }
}

//! Contiguous frame serialization: `[header][chunks
//! concatenated][trailer]`, as a single byte range held in memory or backed
//! by a file through an [`IoBackend`].
//!
//! Each chunk's physical offset is independent of its logical position, so
//! `update_chunk` can append a replacement at the frame tail and just
//! rewrite the trailer's offset index; the old bytes become an unreferenced
//! hole, which the format tolerates.

use crate::chunk::{self, ChunkHeader};
use crate::codecs::Codec;
use crate::context::Cparams;
use crate::error::{BcError, BcResult};
use crate::filters::Filter;
use crate::io::{IoBackend, MmapBackend, StdioBackend};
use crate::meta::{Metalayer, MetalayerTable, VlMetaTable};
use crate::schunk::{ChunkEntry, ContiguousHandle, LazyChunk, Schunk};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAGIC: &[u8; 8] = b"BC2FRAME";
/// Fixed frame header length (magic, version, typesize, default codec,
/// chunksize, nbytes, cbytes, nchunks, trailer offset).
pub(crate) const HEADER_LEN: usize = 48;

mod layout {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 8;
    pub const TYPESIZE: usize = 9;
    pub const CODEC: usize = 10;
    /// Which registered I/O backend produced this frame (0 = stdio, 1 =
    /// mmap, 32..255 a registered [`crate::registry::IoBackendFactory`]).
    /// Stdio and mmap always record the same id for the same logical
    /// frame, since the wire bytes never depend on which of those two
    /// wrote them — only a genuinely distinct registered backend changes
    /// this field.
    pub const IO_BACKEND_ID: usize = 11;
    pub const CHUNKSIZE: usize = 12;
    pub const NBYTES: usize = 20;
    pub const CBYTES: usize = 28;
    pub const NCHUNKS: usize = 36;
    pub const TRAILER_OFFSET: usize = 40;
}

pub(crate) struct FrameHeader {
    pub(crate) typesize: usize,
    pub(crate) codec: Codec,
    pub(crate) chunksize: i64,
    pub(crate) nbytes: i64,
    pub(crate) cbytes: i64,
    pub(crate) nchunks: u32,
    pub(crate) trailer_offset: u64,
    pub(crate) io_backend_id: u8,
}

pub(crate) fn write_header(h: &FrameHeader) -> Vec<u8> {
    let mut out = vec![0u8; HEADER_LEN];
    out[layout::MAGIC..layout::MAGIC + 8].copy_from_slice(MAGIC);
    out[layout::VERSION] = crate::constants::FRAME_FORMAT_VERSION;
    out[layout::TYPESIZE] = h.typesize as u8;
    out[layout::CODEC] = h.codec.id();
    out[layout::IO_BACKEND_ID] = h.io_backend_id;
    out[layout::CHUNKSIZE..layout::CHUNKSIZE + 8].copy_from_slice(&h.chunksize.to_le_bytes());
    out[layout::NBYTES..layout::NBYTES + 8].copy_from_slice(&h.nbytes.to_le_bytes());
    out[layout::CBYTES..layout::CBYTES + 8].copy_from_slice(&h.cbytes.to_le_bytes());
    out[layout::NCHUNKS..layout::NCHUNKS + 4].copy_from_slice(&h.nchunks.to_le_bytes());
    out[layout::TRAILER_OFFSET..layout::TRAILER_OFFSET + 8]
        .copy_from_slice(&h.trailer_offset.to_le_bytes());
    out
}

pub(crate) fn parse_frame_header(buf: &[u8]) -> BcResult<FrameHeader> {
    if buf.len() < HEADER_LEN {
        return Err(BcError::InvalidHeader("frame header truncated".into()));
    }
    if &buf[layout::MAGIC..layout::MAGIC + 8] != MAGIC {
        return Err(BcError::InvalidHeader("bad frame magic".into()));
    }
    let version = buf[layout::VERSION];
    if version == 0 || version > crate::constants::FRAME_FORMAT_VERSION {
        return Err(BcError::InvalidHeader(format!(
            "unsupported frame format version {version}"
        )));
    }
    let typesize = buf[layout::TYPESIZE] as usize;
    let codec = Codec::from_id(buf[layout::CODEC])?;
    let io_backend_id = buf[layout::IO_BACKEND_ID];
    let chunksize = i64::from_le_bytes(buf[layout::CHUNKSIZE..layout::CHUNKSIZE + 8].try_into().unwrap());
    let nbytes = i64::from_le_bytes(buf[layout::NBYTES..layout::NBYTES + 8].try_into().unwrap());
    let cbytes = i64::from_le_bytes(buf[layout::CBYTES..layout::CBYTES + 8].try_into().unwrap());
    let nchunks = u32::from_le_bytes(buf[layout::NCHUNKS..layout::NCHUNKS + 4].try_into().unwrap());
    let trailer_offset = u64::from_le_bytes(
        buf[layout::TRAILER_OFFSET..layout::TRAILER_OFFSET + 8]
            .try_into()
            .unwrap(),
    );
    Ok(FrameHeader {
        typesize,
        codec,
        chunksize,
        nbytes,
        cbytes,
        nchunks,
        trailer_offset,
        io_backend_id,
    })
}

pub(crate) fn encode_metalayers(table: &MetalayerTable) -> Vec<u8> {
    let mut out = Vec::new();
    let entries: Vec<&Metalayer> = table.iter().collect();
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for m in entries {
        out.push(m.name.len() as u8);
        out.extend_from_slice(m.name.as_bytes());
        out.extend_from_slice(&(m.content.len() as u32).to_le_bytes());
        out.extend_from_slice(&m.content);
    }
    out
}

pub(crate) fn decode_metalayers(buf: &[u8], pos: &mut usize) -> BcResult<MetalayerTable> {
    let count = read_u16(buf, pos)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = read_u8(buf, pos)? as usize;
        let name = read_bytes(buf, pos, name_len)?;
        let name = String::from_utf8(name)
            .map_err(|_| BcError::InvalidHeader("metalayer name is not utf8".into()))?;
        let content_len = read_u32(buf, pos)? as usize;
        let content = read_bytes(buf, pos, content_len)?;
        entries.push((name, content));
    }
    Ok(MetalayerTable::from_raw(entries))
}

pub(crate) fn encode_vlmeta(table: &VlMetaTable) -> Vec<u8> {
    let mut out = Vec::new();
    let entries: Vec<(&str, &[u8])> = table.raw_entries().collect();
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (name, compressed) in entries {
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out.extend_from_slice(compressed);
    }
    out
}

/// `VlMetaTable` stores each entry's decompressed length internally but
/// doesn't expose it via `raw_entries`; the trailer instead derives it by
/// decompressing once at load, which costs little since vlmeta entries are
/// small and few.
pub(crate) fn decode_vlmeta(buf: &[u8], pos: &mut usize) -> BcResult<VlMetaTable> {
    let count = read_u16(buf, pos)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = read_u8(buf, pos)? as usize;
        let name = read_bytes(buf, pos, name_len)?;
        let name = String::from_utf8(name)
            .map_err(|_| BcError::InvalidHeader("vlmeta name is not utf8".into()))?;
        let compressed_len = read_u32(buf, pos)? as usize;
        let compressed = read_bytes(buf, pos, compressed_len)?;
        let header = chunk::parse_header(&compressed)?;
        entries.push((name, compressed, header.nbytes));
    }
    Ok(VlMetaTable::from_raw(entries))
}

pub(crate) fn encode_offsets(offsets: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + offsets.len() * 8);
    out.extend_from_slice(&(offsets.len() as u32).to_le_bytes());
    for o in offsets {
        out.extend_from_slice(&o.to_le_bytes());
    }
    out
}

pub(crate) fn decode_offsets(buf: &[u8], pos: &mut usize) -> BcResult<Vec<u64>> {
    let count = read_u32(buf, pos)? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read_u64(buf, pos)?);
    }
    Ok(out)
}

fn read_u8(buf: &[u8], pos: &mut usize) -> BcResult<u8> {
    let b = *buf
        .get(*pos)
        .ok_or_else(|| BcError::InvalidHeader("trailer truncated".into()))?;
    *pos += 1;
    Ok(b)
}

fn read_u16(buf: &[u8], pos: &mut usize) -> BcResult<u16> {
    let bytes = read_bytes(buf, pos, 2)?;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u32(buf: &[u8], pos: &mut usize) -> BcResult<u32> {
    let bytes = read_bytes(buf, pos, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u64(buf: &[u8], pos: &mut usize) -> BcResult<u64> {
    let bytes = read_bytes(buf, pos, 8)?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_bytes(buf: &[u8], pos: &mut usize, len: usize) -> BcResult<Vec<u8>> {
    let end = *pos + len;
    let slice = buf
        .get(*pos..end)
        .ok_or_else(|| BcError::InvalidHeader("trailer truncated".into()))?;
    *pos = end;
    Ok(slice.to_vec())
}

pub(crate) fn chunk_bytes_of(entry: &ChunkEntry) -> BcResult<Vec<u8>> {
    match entry {
        ChunkEntry::Owned(b) => Ok(b.to_vec()),
        ChunkEntry::Lazy(l) => l.materialize(),
    }
}

/// Serializes `schunk` to an in-memory buffer. The recorded
/// `io_backend_id` is the stdio one: stdio and mmap both write plain
/// filesystem bytes, so [`to_file`] and [`to_file_mmap`] stay byte-identical
/// for the same `schunk` (see the backend-independence property in
/// spec.md §8). Only [`to_file_with_backend`], targeting a genuinely
/// distinct registered backend, records a different id.
pub fn to_buffer(schunk: &Schunk) -> BcResult<Vec<u8>> {
    to_buffer_with_backend_id(schunk, crate::constants::io_id::STDIO)
}

fn to_buffer_with_backend_id(schunk: &Schunk, io_backend_id: u8) -> BcResult<Vec<u8>> {
    let chunks = schunk.chunks();
    let mut body = Vec::new();
    let mut offsets = Vec::with_capacity(chunks.len());
    for entry in chunks {
        offsets.push(HEADER_LEN as u64 + body.len() as u64);
        body.extend_from_slice(&chunk_bytes_of(entry)?);
    }
    let trailer_offset = HEADER_LEN as u64 + body.len() as u64;

    let mut trailer = Vec::new();
    trailer.extend_from_slice(&encode_metalayers(&schunk.metalayers));
    trailer.extend_from_slice(&encode_vlmeta(&schunk.vlmeta));
    trailer.extend_from_slice(&encode_offsets(&offsets));

    let header = write_header(&FrameHeader {
        typesize: schunk.cparams.typesize,
        codec: schunk.cparams.codec,
        chunksize: schunk.chunksize(),
        nbytes: schunk.nbytes(),
        cbytes: schunk.cbytes(),
        nchunks: chunks.len() as u32,
        trailer_offset,
        io_backend_id,
    });

    let mut out = Vec::with_capacity(header.len() + body.len() + trailer.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&body);
    out.extend_from_slice(&trailer);
    Ok(out)
}

pub fn to_file(schunk: &Schunk, path: impl AsRef<Path>) -> BcResult<()> {
    (|| {
        let buf = to_buffer(schunk)?;
        let mut backend = StdioBackend::open_create(path)?;
        backend.write(0, &buf)?;
        backend.flush()
    })()
    .map_err(|e| {
        crate::error::trace_error("frame::to_file", &e);
        e
    })
}

/// Same serialized bytes as [`to_file`], written through the memory-mapped
/// backend instead of stdio. The wire format never records which backend
/// wrote it, so the two are byte-identical for the same `schunk`.
pub fn to_file_mmap(schunk: &Schunk, path: impl AsRef<Path>) -> BcResult<()> {
    let buf = to_buffer(schunk)?;
    let mut backend = MmapBackend::open_create(path)?;
    backend.write(0, &buf)?;
    backend.flush()
}

/// Writes `schunk` through a backend registered via
/// [`crate::registry::register_io_backend`], recording `backend_id` in the
/// frame header so [`open_with_registry`] can dispatch back to the same
/// implementation on read.
pub fn to_file_with_backend(schunk: &Schunk, path: impl AsRef<Path>, backend_id: u8) -> BcResult<()> {
    let buf = to_buffer_with_backend_id(schunk, backend_id)?;
    let path = path.as_ref().to_string_lossy().into_owned();
    let mut backend = crate::registry::get_io_backend(backend_id)?.open_create(&path)?;
    backend.write(0, &buf)?;
    backend.flush()
}

pub(crate) fn base_cparams(h: &FrameHeader) -> Cparams {
    Cparams {
        typesize: h.typesize,
        codec: h.codec,
        filters: vec![Filter::Shuffle],
        ..Cparams::default()
    }
}

/// Reconstructs a super-chunk from an in-memory frame buffer. The reconstructed schunk is purely in-memory afterward
/// (no file is attached); `copy` only affects whether slices are cloned one
/// at a time from `bytes` or from an internal copy of the whole buffer. See
/// DESIGN.md for why a fully zero-copy shared-subslice scheme was not used.
pub fn from_buffer(bytes: Vec<u8>, _copy: bool) -> BcResult<Schunk> {
    from_buffer_inner(bytes).map_err(|e| {
        crate::error::trace_error("frame::from_buffer", &e);
        e
    })
}

fn from_buffer_inner(bytes: Vec<u8>) -> BcResult<Schunk> {
    let source: &[u8] = &bytes;
    let header = parse_frame_header(source)?;
    let trailer = &source[header.trailer_offset as usize..];
    let mut pos = 0usize;
    let metalayers = decode_metalayers(trailer, &mut pos)?;
    let vlmeta = decode_vlmeta(trailer, &mut pos)?;
    let offsets = decode_offsets(trailer, &mut pos)?;
    if offsets.len() != header.nchunks as usize {
        return Err(BcError::InvalidHeader(
            "offset index length does not match nchunks".into(),
        ));
    }

    let mut chunks = Vec::with_capacity(offsets.len());
    for &off in &offsets {
        let start = off as usize;
        let ch = chunk::parse_header(&source[start..])?;
        let chunk_bytes = source[start..start + ch.cbytes].to_vec();
        chunks.push(ChunkEntry::Owned(Arc::from(chunk_bytes)));
    }

    Ok(Schunk::from_parts(
        base_cparams(&header),
        crate::context::Dparams::default(),
        chunks,
        header.chunksize,
        header.nbytes,
        header.cbytes,
        metalayers,
        vlmeta,
        None,
    ))
}

fn open_backend(path: impl AsRef<Path>, use_mmap: bool) -> BcResult<Box<dyn IoBackend>> {
    if use_mmap {
        Ok(Box::new(MmapBackend::open_existing(path)?))
    } else {
        Ok(Box::new(StdioBackend::open_existing(path)?))
    }
}

/// Reads the fixed prefix of a chunk (header + offset table) sufficient to
/// build a [`LazyChunk`], without reading its block payloads.
pub(crate) fn build_lazy_chunk(
    handle: &ContiguousHandle,
    base_offset: u64,
    file_len: u64,
) -> BcResult<LazyChunk> {
    let probe_len = (file_len.saturating_sub(base_offset)).min(32) as usize;
    if probe_len < crate::constants::MIN_HEADER_LENGTH {
        return Err(BcError::InvalidHeader("chunk header truncated".into()));
    }
    let probe = {
        let mut lock = handle.lock().expect("frame backend lock poisoned");
        lock.read_owned(base_offset, probe_len)?
    };
    let header = chunk::parse_header(&probe)?;
    let needed = header.header_len() + header.nblocks_offsets_len();
    let header_and_offsets = if needed <= probe.len() {
        probe[..needed].to_vec()
    } else {
        let mut lock = handle.lock().expect("frame backend lock poisoned");
        lock.read_owned(base_offset, needed)?
    };
    Ok(LazyChunk {
        header_and_offsets,
        source: handle.clone(),
        base_offset,
        cbytes: header.cbytes,
    })
}

fn open_at(
    handle: ContiguousHandle,
    offset: u64,
) -> BcResult<Schunk> {
    let file_len = { handle.lock().expect("frame backend lock poisoned").size()? };
    let header_bytes = {
        let mut lock = handle.lock().expect("frame backend lock poisoned");
        lock.read_owned(offset, HEADER_LEN)?
    };
    let header = parse_frame_header(&header_bytes)?;
    let trailer_abs = offset + header.trailer_offset;
    let trailer_len = (file_len - trailer_abs) as usize;
    let trailer_bytes = {
        let mut lock = handle.lock().expect("frame backend lock poisoned");
        lock.read_owned(trailer_abs, trailer_len)?
    };
    let mut pos = 0usize;
    let metalayers = decode_metalayers(&trailer_bytes, &mut pos)?;
    let vlmeta = decode_vlmeta(&trailer_bytes, &mut pos)?;
    let offsets = decode_offsets(&trailer_bytes, &mut pos)?;
    if offsets.len() != header.nchunks as usize {
        return Err(BcError::InvalidHeader(
            "offset index length does not match nchunks".into(),
        ));
    }

    let mut chunks = Vec::with_capacity(offsets.len());
    for &rel_off in &offsets {
        let lazy = build_lazy_chunk(&handle, offset + rel_off, file_len)?;
        chunks.push(ChunkEntry::Lazy(lazy));
    }

    let tail_offset = offset + header.trailer_offset;
    Ok(Schunk::from_parts(
        base_cparams(&header),
        crate::context::Dparams::default(),
        chunks,
        header.chunksize,
        header.nbytes,
        header.cbytes,
        metalayers,
        vlmeta,
        Some((handle, tail_offset)),
    ))
}

/// `open(path)`: backs a super-chunk by an existing frame
/// file at offset 0.
pub fn open(path: impl AsRef<Path>) -> BcResult<Schunk> {
    open_offset(path, 0)
}

/// `open_offset(path, offset)`: supports multiple
/// concatenated frames in one file.
pub fn open_offset(path: impl AsRef<Path>, offset: u64) -> BcResult<Schunk> {
    (|| {
        let backend: Box<dyn IoBackend> = open_backend(path, false)?;
        let handle: ContiguousHandle = Arc::new(Mutex::new(backend));
        open_at(handle, offset)
    })()
    .map_err(|e| {
        crate::error::trace_error("frame::open_offset", &e);
        e
    })
}

/// Opens a frame that may have been written by a registered I/O backend
/// (via [`to_file_with_backend`]) rather than stdio or mmap. Peeks the
/// header's `io_backend_id` through stdio first, then re-opens through
/// the matching [`crate::registry::IoBackendFactory`] if it isn't one of
/// the two built-ins.
pub fn open_with_registry(path: impl AsRef<Path>) -> BcResult<Schunk> {
    let path = path.as_ref();
    let backend_id = {
        let mut probe = StdioBackend::open_existing(path)?;
        let header_bytes = probe.read_owned(0, HEADER_LEN)?;
        parse_frame_header(&header_bytes)?.io_backend_id
    };
    let backend: Box<dyn IoBackend> = match backend_id {
        crate::constants::io_id::STDIO => Box::new(StdioBackend::open_existing(path)?),
        crate::constants::io_id::MMAP => Box::new(MmapBackend::open_existing(path)?),
        other => {
            let path_str = path.to_string_lossy().into_owned();
            crate::registry::get_io_backend(other)?.open_existing(&path_str)?
        }
    };
    let handle: ContiguousHandle = Arc::new(Mutex::new(backend));
    open_at(handle, 0)
}

/// Creates a new, empty frame-backed super-chunk at `path`, writing an
/// initial empty-trailer header immediately so the file is valid even
/// before the first chunk is appended.
pub fn create(path: impl AsRef<Path>, cparams: Cparams, dparams: crate::context::Dparams) -> BcResult<Schunk> {
    let backend: Box<dyn IoBackend> = Box::new(StdioBackend::open_create(path)?);
    let handle: ContiguousHandle = Arc::new(Mutex::new(backend));
    let mut schunk = Schunk::from_parts(
        cparams,
        dparams,
        Vec::new(),
        -1,
        0,
        0,
        MetalayerTable::default(),
        VlMetaTable::default(),
        Some((handle, HEADER_LEN as u64)),
    );
    schunk.commit()?;
    Ok(schunk)
}

/// Writes any chunks not yet reflected in `physical_offsets` to the tail of
/// the backing frame, then rewrites the header and trailer.
#[allow(clippy::too_many_arguments)]
pub(crate) fn commit_contiguous(
    handle: &ContiguousHandle,
    tail_offset: &mut u64,
    chunks: &[ChunkEntry],
    physical_offsets: &mut [Option<u64>],
    typesize: usize,
    codec: Codec,
    chunksize: i64,
    nbytes: i64,
    cbytes: i64,
    metalayers: &MetalayerTable,
    vlmeta: &VlMetaTable,
) -> BcResult<()> {
    for (entry, slot) in chunks.iter().zip(physical_offsets.iter_mut()) {
        if slot.is_none() {
            let bytes = chunk_bytes_of(entry)?;
            let at = *tail_offset;
            {
                let mut lock = handle.lock().expect("frame backend lock poisoned");
                lock.write(at, &bytes)?;
            }
            *slot = Some(at);
            *tail_offset += bytes.len() as u64;
        }
    }

    let offsets: Vec<u64> = physical_offsets
        .iter()
        .map(|o| o.expect("every chunk committed above"))
        .collect();

    let mut trailer = Vec::new();
    trailer.extend_from_slice(&encode_metalayers(metalayers));
    trailer.extend_from_slice(&encode_vlmeta(vlmeta));
    trailer.extend_from_slice(&encode_offsets(&offsets));

    let header = write_header(&FrameHeader {
        typesize,
        codec,
        chunksize,
        nbytes,
        cbytes,
        nchunks: chunks.len() as u32,
        trailer_offset: *tail_offset,
        io_backend_id: crate::constants::io_id::STDIO,
    });

    let mut lock = handle.lock().expect("frame backend lock poisoned");
    lock.write(0, &header)?;
    lock.write(*tail_offset, &trailer)?;
    lock.truncate(*tail_offset + trailer.len() as u64)?;
    lock.flush()
}

impl ChunkHeader {
    /// Byte length of this chunk's offset table (0 for special/memcpy
    /// chunks, which carry no per-block offsets).
    pub(crate) fn nblocks_offsets_len(&self) -> usize {
        if self.special.is_some() || self.is_memcpy() {
            0
        } else {
            self.nblocks() * 4
        }
    }
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

    fn build_schunk() -> Schunk {
        let mut schunk = Schunk::new(cparams(), Dparams::default());
        for c in 0..3i64 {
            let mut buf = Vec::with_capacity(800);
            for i in 0..100i64 {
                buf.extend_from_slice(&(c * 100 + i).to_le_bytes());
            }
            schunk.append_buffer(&buf).unwrap();
        }
        schunk
    }

    #[test]
    fn buffer_roundtrip_preserves_chunks() {
        let schunk = build_schunk();
        let buf = to_buffer(&schunk).unwrap();
        let reopened = from_buffer(buf, true).unwrap();
        assert_eq!(reopened.nchunks(), 3);
        assert_eq!(reopened.nbytes(), schunk.nbytes());
        for i in 0..3 {
            let mut a = vec![0u8; 800];
            let mut b = vec![0u8; 800];
            schunk.decompress_chunk(i, &mut a).unwrap();
            reopened.decompress_chunk(i, &mut b).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn file_roundtrip_via_stdio() {
        let schunk = build_schunk();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.b2frame");
        to_file(&schunk, &path).unwrap();
        let reopened = open(&path).unwrap();
        assert_eq!(reopened.nchunks(), 3);
        let mut dest = vec![0u8; 800];
        reopened.decompress_chunk(2, &mut dest).unwrap();
        let v0 = i64::from_le_bytes(dest[0..8].try_into().unwrap());
        assert_eq!(v0, 200);
    }

    #[test]
    fn stdio_and_mmap_frames_are_byte_identical() {
        let schunk = build_schunk();
        let dir = tempfile::tempdir().unwrap();
        let stdio_path = dir.path().join("stdio.b2frame");
        let mmap_path = dir.path().join("mmap.b2frame");
        to_file(&schunk, &stdio_path).unwrap();
        to_file_mmap(&schunk, &mmap_path).unwrap();

        let a = std::fs::read(&stdio_path).unwrap();
        let b = std::fs::read(&mmap_path).unwrap();
        assert_eq!(a, b);

        let reopened = open(&mmap_path).unwrap();
        let mut dest = vec![0u8; 800];
        reopened.decompress_chunk(2, &mut dest).unwrap();
        let v0 = i64::from_le_bytes(dest[0..8].try_into().unwrap());
        assert_eq!(v0, 200);
    }

    struct RelabeledStdio;

    impl crate::registry::IoBackendFactory for RelabeledStdio {
        fn name(&self) -> &str {
            "relabeled-stdio-test-backend"
        }
        fn open_create(&self, path: &str) -> BcResult<Box<dyn IoBackend>> {
            Ok(Box::new(StdioBackend::open_create(path)?))
        }
        fn open_existing(&self, path: &str) -> BcResult<Box<dyn IoBackend>> {
            Ok(Box::new(StdioBackend::open_existing(path)?))
        }
    }

    #[test]
    fn registered_backend_roundtrips_and_records_its_id() {
        crate::registry::register_io_backend(210, std::sync::Arc::new(RelabeledStdio)).unwrap();
        let schunk = build_schunk();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registered.b2frame");
        to_file_with_backend(&schunk, &path, 210).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[layout::IO_BACKEND_ID], 210);

        let reopened = open_with_registry(&path).unwrap();
        assert_eq!(reopened.nchunks(), 3);
        let mut dest = vec![0u8; 800];
        reopened.decompress_chunk(2, &mut dest).unwrap();
        let v0 = i64::from_le_bytes(dest[0..8].try_into().unwrap());
        assert_eq!(v0, 200);
    }

    #[test]
    fn special_zero_chunks_keep_frame_small() {
        let mut schunk = Schunk::new(cparams(), Dparams::default());
        schunk
            .fill_special(5_000_000, crate::chunk::SpecialKind::Zero, 1_000_000)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zeros.b2frame");
        to_file(&schunk, &path).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.len() <= 1024, "frame file was {} bytes", meta.len());

        let reopened = open(&path).unwrap();
        let mut dest = vec![0xffu8; 1_000_000];
        reopened.decompress_chunk(3, &mut dest).unwrap();
        assert!(dest.iter().all(|&b| b == 0));
    }

    #[test]
    fn create_then_append_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incremental.b2frame");
        let mut schunk = create(&path, cparams(), Dparams::default()).unwrap();
        schunk.append_buffer(&[1u8; 800]).unwrap();
        schunk.append_buffer(&[2u8; 800]).unwrap();
        drop(schunk);

        let reopened = open(&path).unwrap();
        assert_eq!(reopened.nchunks(), 2);
        let mut dest = vec![0u8; 800];
        reopened.decompress_chunk(1, &mut dest).unwrap();
        assert_eq!(dest, vec![2u8; 800]);
    }
}

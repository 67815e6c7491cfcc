//! Chunk compression pipeline: a self-describing
//! compressed byte sequence with a fixed 32-byte header, a per-block offset
//! table, and per-block payloads, plus the constant-size special-chunk
//! encodings that bypass the filter/codec pipeline entirely.

use crate::codecs::Codec;
use crate::constants::*;
use crate::context::{BlockMask, Cparams, Dparams, SplitMode};
use crate::error::{BcError, BcResult};
use crate::filters::{self, Filter};
use rayon::prelude::*;

/// Byte offset of each 32-byte header field.
mod layout {
    pub const FORMAT_VERSION: usize = 0;
    pub const CODEC_VERSION: usize = 1;
    pub const FLAGS: usize = 2;
    pub const TYPESIZE: usize = 3;
    pub const NBYTES: usize = 4;
    pub const BLOCKSIZE: usize = 8;
    pub const CBYTES: usize = 12;
    pub const FILTER_CODES: usize = 16;
    pub const FILTER_METAS: usize = 22;
    pub const BLOSC2_FLAGS: usize = 28;
    pub const SPECIAL_KIND: usize = 29;
    // byte 30..32 reserved
}

mod flag_bits {
    pub const SHUFFLE: u8 = 0x01;
    pub const MEMCPY: u8 = 0x02;
    pub const BITSHUFFLE: u8 = 0x04;
    pub const DELTA: u8 = 0x08;
    pub const SPECIAL: u8 = 0x10;
}

const CODEC_VERSION: u8 = 1;

/// The four constant-size special-chunk kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    Zero,
    Nan,
    Uninit,
    Value,
}

impl SpecialKind {
    fn id(self) -> u8 {
        match self {
            SpecialKind::Zero => 1,
            SpecialKind::Nan => 2,
            SpecialKind::Uninit => 3,
            SpecialKind::Value => 4,
        }
    }

    fn from_id(id: u8) -> BcResult<SpecialKind> {
        Ok(match id {
            1 => SpecialKind::Zero,
            2 => SpecialKind::Nan,
            3 => SpecialKind::Uninit,
            4 => SpecialKind::Value,
            other => {
                return Err(BcError::RunLength(format!(
                    "unknown special-chunk kind id {other}"
                )))
            }
        })
    }
}

/// A parsed chunk header, common to every chunk whether special, memcpy, or
/// fully filtered+coded.
#[derive(Debug, Clone)]
pub struct ChunkHeader {
    pub typesize: usize,
    pub nbytes: usize,
    pub blocksize: usize,
    pub cbytes: usize,
    pub flags: u8,
    pub filters: Vec<Filter>,
    pub codec: Codec,
    pub special: Option<SpecialKind>,
    header_len: usize,
    split: bool,
}

impl ChunkHeader {
    pub fn is_memcpy(&self) -> bool {
        self.flags & flag_bits::MEMCPY != 0
    }

    /// Length of this chunk's fixed header (16 or 32 bytes):
    /// the offset table, when present, starts immediately after it.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn nblocks(&self) -> usize {
        if self.blocksize == 0 {
            0
        } else {
            (self.nbytes + self.blocksize - 1) / self.blocksize
        }
    }

    pub(crate) fn block_len(&self, block_index: usize) -> usize {
        let nblocks = self.nblocks();
        if block_index + 1 == nblocks {
            self.nbytes - block_index * self.blocksize
        } else {
            self.blocksize
        }
    }
}

/// Parses the fixed header at the start of `chunk`. Accepts both the
/// current 32-byte extended header and the earlier 16-byte header, the latter carrying no filter pipeline or split-mode information.
pub fn parse_header(chunk: &[u8]) -> BcResult<ChunkHeader> {
    if chunk.len() < MIN_HEADER_LENGTH {
        return Err(BcError::InvalidHeader(
            "buffer shorter than the minimum chunk header".into(),
        ));
    }
    let version = chunk[layout::FORMAT_VERSION];
    let extended = chunk.len() >= EXTENDED_HEADER_LENGTH && version >= CHUNK_FORMAT_VERSION;
    let header_len = if extended {
        EXTENDED_HEADER_LENGTH
    } else {
        MIN_HEADER_LENGTH
    };
    if chunk.len() < header_len {
        return Err(BcError::InvalidHeader(
            "buffer shorter than its declared header".into(),
        ));
    }
    let flags = chunk[layout::FLAGS];
    let typesize = chunk[layout::TYPESIZE] as usize;
    let nbytes = read_i32(chunk, layout::NBYTES)? as usize;
    let blocksize = read_i32(chunk, layout::BLOCKSIZE)? as usize;
    let cbytes = read_i32(chunk, layout::CBYTES)? as usize;

    let (filters, codec, special, split) = if extended {
        let mut filters = Vec::new();
        for i in 0..MAX_FILTERS {
            let id = chunk[layout::FILTER_CODES + i];
            let meta = chunk[layout::FILTER_METAS + i];
            if let Some(f) = Filter::from_id_meta(id, meta)? {
                filters.push(f);
            }
        }
        let b2_flags = chunk[layout::BLOSC2_FLAGS];
        let codec = Codec::from_id(b2_flags & blosc2_flags::CODEC_MASK)?;
        let special = if flags & flag_bits::SPECIAL != 0 {
            Some(SpecialKind::from_id(chunk[layout::SPECIAL_KIND])?)
        } else {
            None
        };
        let split = b2_flags & blosc2_flags::SPLIT_MASK != 0;
        (filters, codec, special, split)
    } else {
        let mut filters = Vec::new();
        if flags & flag_bits::SHUFFLE != 0 {
            filters.push(Filter::Shuffle);
        }
        (filters, Codec::BloscLZ, None, false)
    };

    Ok(ChunkHeader {
        typesize,
        nbytes,
        blocksize,
        cbytes,
        flags,
        filters,
        codec,
        special,
        header_len,
        split,
    })
}

fn read_i32(buf: &[u8], at: usize) -> BcResult<i32> {
    buf.get(at..at + 4)
        .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| BcError::InvalidHeader("truncated header field".into()))
}

#[allow(clippy::too_many_arguments)]
fn write_header(
    out: &mut Vec<u8>,
    typesize: usize,
    nbytes: usize,
    blocksize: usize,
    cbytes: usize,
    flags: u8,
    codec: Codec,
    filters: &[Filter],
    split: bool,
    special: Option<SpecialKind>,
) {
    let mut header = [0u8; EXTENDED_HEADER_LENGTH];
    header[layout::FORMAT_VERSION] = CHUNK_FORMAT_VERSION;
    header[layout::CODEC_VERSION] = CODEC_VERSION;
    header[layout::FLAGS] = flags;
    header[layout::TYPESIZE] = typesize as u8;
    header[layout::NBYTES..layout::NBYTES + 4].copy_from_slice(&(nbytes as i32).to_le_bytes());
    header[layout::BLOCKSIZE..layout::BLOCKSIZE + 4]
        .copy_from_slice(&(blocksize as i32).to_le_bytes());
    header[layout::CBYTES..layout::CBYTES + 4].copy_from_slice(&(cbytes as i32).to_le_bytes());
    for (i, f) in filters.iter().enumerate().take(MAX_FILTERS) {
        header[layout::FILTER_CODES + i] = f.id();
        header[layout::FILTER_METAS + i] = f.meta();
    }
    let mut b2_flags = codec.id() & blosc2_flags::CODEC_MASK;
    if split {
        b2_flags |= 0x01 << blosc2_flags::SPLIT_SHIFT;
    }
    header[layout::BLOSC2_FLAGS] = b2_flags;
    if let Some(kind) = special {
        header[layout::SPECIAL_KIND] = kind.id();
    }
    out.extend_from_slice(&header);
}

/// Picks a blocksize honoring the constraints (`typesize <=
/// blocksize <= MAX_BLOCKSIZE`, multiple of `8*typesize` for bit-level
/// filters) when the caller leaves `cparams.blocksize == 0`. The sizing
/// curve is codec-dependent and not load-bearing for correctness; this one
/// scales with `clevel` and caps at a few hundred KiB so that block-level
/// parallelism stays meaningful on typical chunk sizes.
fn auto_blocksize(cparams: &Cparams, nbytes: usize) -> usize {
    if cparams.blocksize != 0 {
        return cparams.blocksize.min(MAX_BLOCKSIZE).min(nbytes.max(1));
    }
    let typesize = cparams.typesize.max(1);
    let base = match cparams.clevel {
        0..=1 => 32 * 1024,
        2..=3 => 64 * 1024,
        4..=6 => 128 * 1024,
        _ => 256 * 1024,
    };
    let needs_bit_multiple = cparams
        .filters
        .iter()
        .any(|f| matches!(f, Filter::Bitshuffle));
    let mut blocksize = base.max(typesize);
    if needs_bit_multiple {
        let unit = 8 * typesize;
        blocksize = ((blocksize + unit - 1) / unit) * unit;
    }
    blocksize.min(MAX_BLOCKSIZE).min(nbytes.max(1))
}

/// Decides split mode once per chunk, independent of
/// any individual block's length, so every block in the chunk agrees on
/// `nstreams` and the decoder (which only sees the chunk-wide header flag)
/// can reproduce the same per-block exception from `block_len` alone.
fn should_split(cparams: &Cparams) -> bool {
    let splittable_typesize = matches!(cparams.typesize, 2 | 4 | 8 | 16);
    if !splittable_typesize {
        return false;
    }
    match cparams.split_mode {
        SplitMode::Always => true,
        SplitMode::Never | SplitMode::ForwardCompat => false,
        SplitMode::Auto => {
            cparams.clevel > 0
                && cparams
                    .filters
                    .iter()
                    .any(|f| matches!(f, Filter::Shuffle | Filter::Bitshuffle))
        }
    }
}

/// One compressed block: either `Coded` sub-streams or `Raw` passthrough
/// when every codec sub-stream declined to shrink the data.
enum BlockPayload {
    Coded(Vec<u8>),
    Raw(Vec<u8>),
}

fn encode_block(cparams: &Cparams, block: &[u8], global_split: bool) -> BcResult<(BlockPayload, bool)> {
    let filtered = filters::apply_forward(&cparams.filters, cparams.typesize, block)?;
    // A block whose length isn't a whole multiple of typesize (only possible
    // for a chunk's final, shorter block) can't be divided into `typesize`
    // equal sub-streams; [`decode_block`] derives the same exception from
    // `block_len` so the two stay in lockstep without a per-block flag.
    let split = global_split && block.len() % cparams.typesize == 0;
    let nstreams = if split { cparams.typesize } else { 1 };
    let stream_len = filtered.len() / nstreams.max(1);

    let mut out = Vec::with_capacity(filtered.len() + 4 * nstreams);
    let mut any_compressed = false;
    for s in 0..nstreams.max(1) {
        let stream = if nstreams <= 1 {
            &filtered[..]
        } else {
            &filtered[s * stream_len..(s + 1) * stream_len]
        };
        let mut scratch = vec![0u8; stream.len() + stream.len() / 2 + 64];
        let encoded_len = cparams
            .codec
            .encode(cparams.clevel, stream, &mut scratch)
            .unwrap_or(0);
        if encoded_len > 0 && encoded_len < stream.len() {
            any_compressed = true;
            out.extend_from_slice(&(encoded_len as i32).to_le_bytes());
            out.extend_from_slice(&scratch[..encoded_len]);
        } else {
            out.extend_from_slice(&(stream.len() as i32).to_le_bytes());
            out.extend_from_slice(stream);
        }
    }
    if !any_compressed {
        return Ok((BlockPayload::Raw(filtered), split));
    }
    Ok((BlockPayload::Coded(out), split))
}

/// `compress_ctx`: compresses `src` into a fully serialized
/// chunk. Blocks are encoded independently (by rayon, bounded by
/// `cparams.nthreads` when > 1) and assembled in block-index order so the
/// result is byte-identical regardless of scheduling.
pub fn compress_ctx(cparams: &Cparams, src: &[u8]) -> BcResult<Vec<u8>> {
    compress_ctx_inner(cparams, src).map_err(|e| {
        crate::error::trace_error("compress_ctx", &e);
        e
    })
}

fn compress_ctx_inner(cparams: &Cparams, src: &[u8]) -> BcResult<Vec<u8>> {
    let nbytes = src.len();
    if nbytes as i64 > MAX_BUFFERSIZE {
        return Err(BcError::TwoGbLimit);
    }
    if cparams.typesize == 0 || cparams.typesize > MAX_TYPESIZE {
        return Err(BcError::InvalidParam(format!(
            "typesize {} out of range 1..=255",
            cparams.typesize
        )));
    }
    filters::validate_pipeline(&cparams.filters, cparams.typesize)?;
    if cparams.blosc1_compat {
        let only_shuffle = cparams
            .filters
            .iter()
            .all(|f| matches!(f, Filter::Shuffle));
        if !only_shuffle || cparams.codec != Codec::BloscLZ {
            return Err(BcError::InvalidParam(
                "BLOSC_BLOSC1_COMPAT only allows the shuffle filter and the blosclz codec"
                    .into(),
            ));
        }
    }

    if let Some(chunk) = try_collapse_special(cparams, src) {
        return Ok(chunk);
    }

    if nbytes < MIN_BUFFERSIZE {
        return Ok(memcpy_chunk(cparams, src));
    }

    let blocksize = auto_blocksize(cparams, nbytes);
    let nblocks = (nbytes + blocksize - 1) / blocksize;

    // A prefilter rewrites the source block-by-block before the filter
    // pipeline runs; its output replaces `src` for this chunk only, so we
    // materialize an owned, possibly-rewritten copy up front rather than
    // slicing `src` directly.
    let prefiltered: Option<Vec<u8>> = cparams.prefilter.as_ref().map(|pf| {
        let mut buf = src.to_vec();
        for i in 0..nblocks {
            let start = i * blocksize;
            let end = (start + blocksize).min(nbytes);
            pf(&mut buf[start..end]);
        }
        buf
    });
    let effective_src: &[u8] = prefiltered.as_deref().unwrap_or(src);

    let blocks: Vec<&[u8]> = (0..nblocks)
        .map(|i| {
            let start = i * blocksize;
            let end = (start + blocksize).min(nbytes);
            &effective_src[start..end]
        })
        .collect();

    let global_split = should_split(cparams);
    let encode_one = |block: &&[u8]| encode_block(cparams, *block, global_split);
    let encoded: Vec<BcResult<(BlockPayload, bool)>> = if cparams.nthreads > 1 {
        blocks.par_iter().map(encode_one).collect()
    } else {
        blocks.iter().map(encode_one).collect()
    };
    let mut payloads = Vec::with_capacity(nblocks);
    for r in encoded {
        let (payload, _split) = r?;
        payloads.push(payload);
    }

    let header_len = EXTENDED_HEADER_LENGTH;
    let offsets_len = nblocks * 4;
    let mut total_payload_len = 0usize;
    for p in &payloads {
        total_payload_len += match p {
            BlockPayload::Coded(b) => b.len(),
            BlockPayload::Raw(b) => b.len(),
        };
    }

    if header_len + offsets_len + total_payload_len >= header_len + nbytes {
        return Ok(memcpy_chunk(cparams, src));
    }

    let mut filter_flags = 0u8;
    for f in &cparams.filters {
        match f {
            Filter::Shuffle => filter_flags |= flag_bits::SHUFFLE,
            Filter::Bitshuffle => filter_flags |= flag_bits::BITSHUFFLE,
            Filter::Delta => filter_flags |= flag_bits::DELTA,
            Filter::TruncatePrecision(_) => {}
        }
    }

    let mut out = Vec::with_capacity(header_len + offsets_len + total_payload_len);
    write_header(
        &mut out,
        cparams.typesize,
        nbytes,
        blocksize,
        0,
        filter_flags,
        cparams.codec,
        &cparams.filters,
        global_split,
        None,
    );
    out.resize(header_len + offsets_len, 0);

    for (i, payload) in payloads.iter().enumerate() {
        let offset = out.len();
        out[header_len + i * 4..header_len + i * 4 + 4]
            .copy_from_slice(&(offset as i32).to_le_bytes());
        match payload {
            BlockPayload::Coded(b) => out.extend_from_slice(b),
            BlockPayload::Raw(b) => out.extend_from_slice(b),
        }
    }

    let cbytes = out.len();
    out[layout::CBYTES..layout::CBYTES + 4].copy_from_slice(&(cbytes as i32).to_le_bytes());
    Ok(out)
}

fn memcpy_chunk(cparams: &Cparams, src: &[u8]) -> Vec<u8> {
    let header_len = EXTENDED_HEADER_LENGTH;
    let mut out = Vec::with_capacity(header_len + src.len());
    write_header(
        &mut out,
        cparams.typesize,
        src.len(),
        src.len().max(1),
        0,
        flag_bits::MEMCPY,
        cparams.codec,
        &[],
        false,
        None,
    );
    out.extend_from_slice(src);
    let cbytes = out.len();
    out[layout::CBYTES..layout::CBYTES + 4].copy_from_slice(&(cbytes as i32).to_le_bytes());
    out
}

/// `decompress_ctx`: parses `chunk`'s header, handles special
/// and memcpy chunks directly, and otherwise dispatches one inverse-pipeline
/// task per block (skipping any set in `mask`). Returns the number of bytes
/// written.
pub fn decompress_ctx(
    dparams: &Dparams,
    chunk: &[u8],
    dest: &mut [u8],
    mask: Option<&mut BlockMask>,
) -> BcResult<usize> {
    decompress_ctx_inner(dparams, chunk, dest, mask).map_err(|e| {
        crate::error::trace_error("decompress_ctx", &e);
        e
    })
}

fn decompress_ctx_inner(
    _dparams: &Dparams,
    chunk: &[u8],
    dest: &mut [u8],
    mask: Option<&mut BlockMask>,
) -> BcResult<usize> {
    let header = parse_header(chunk)?;
    if dest.len() < header.nbytes {
        return Err(BcError::WriteBufferTooSmall);
    }

    if let Some(kind) = header.special {
        synthesize_special(kind, &header, chunk, dest)?;
        if let Some(m) = mask {
            m.clear();
        }
        return Ok(header.nbytes);
    }

    if header.is_memcpy() {
        let start = header.header_len;
        dest[..header.nbytes].copy_from_slice(&chunk[start..start + header.nbytes]);
        if let Some(m) = mask {
            m.clear();
        }
        return Ok(header.nbytes);
    }

    let nblocks = header.nblocks();
    let offsets = read_offsets(chunk, &header, nblocks)?;
    // Copy the skip bits out before dispatching so the closures below borrow
    // only an owned `Vec<bool>`, leaving `mask` free to be consumed (cleared)
    // once decoding finishes.
    let skips: Vec<bool> = (0..nblocks)
        .map(|i| mask.as_ref().map(|m| m.skips(i)).unwrap_or(false))
        .collect();

    let decode_one = |i: usize| -> BcResult<(usize, Vec<u8>)> {
        if skips[i] {
            return Ok((i, Vec::new()));
        }
        let block_len = header.block_len(i);
        let start = offsets[i];
        let end = if i + 1 < nblocks {
            offsets[i + 1]
        } else {
            header.cbytes
        };
        decode_block(&header, &chunk[start..end], block_len).map(|b| (i, b))
    };

    let results: Vec<BcResult<(usize, Vec<u8>)>> = if _dparams.nthreads > 1 {
        (0..nblocks).into_par_iter().map(decode_one).collect()
    } else {
        (0..nblocks).map(decode_one).collect()
    };

    for r in results {
        let (i, mut block) = r?;
        if skips[i] {
            continue;
        }
        if let Some(pf) = &_dparams.postfilter {
            pf(&mut block);
        }
        let start = i * header.blocksize;
        dest[start..start + block.len()].copy_from_slice(&block);
    }

    if let Some(m) = mask {
        m.clear();
    }
    Ok(header.nbytes)
}

pub(crate) fn read_offsets(chunk: &[u8], header: &ChunkHeader, nblocks: usize) -> BcResult<Vec<usize>> {
    let mut offsets = Vec::with_capacity(nblocks);
    for i in 0..nblocks {
        let at = header.header_len + i * 4;
        let off = read_i32(chunk, at)?;
        if off < 0 {
            return Err(BcError::RunLength(
                "per-block special offsets are not produced by this encoder".into(),
            ));
        }
        offsets.push(off as usize);
    }
    for w in offsets.windows(2) {
        if w[0] >= w[1] {
            return Err(BcError::InvalidHeader(
                "offset table is not strictly increasing".into(),
            ));
        }
    }
    Ok(offsets)
}

pub(crate) fn decode_block(header: &ChunkHeader, payload: &[u8], block_len: usize) -> BcResult<Vec<u8>> {
    let nstreams = if header.split
        && matches!(header.typesize, 2 | 4 | 8 | 16)
        && block_len % header.typesize == 0
    {
        header.typesize
    } else {
        1
    };
    let stream_len = block_len / nstreams.max(1);
    let mut filtered = vec![0u8; block_len];
    let mut cursor = 0usize;
    for s in 0..nstreams.max(1) {
        let len = read_i32(payload, cursor)? as usize;
        cursor += 4;
        let stream_payload = payload
            .get(cursor..cursor + len)
            .ok_or_else(|| BcError::InvalidHeader("block payload truncated".into()))?;
        cursor += len;
        let dest = &mut filtered[s * stream_len..(s + 1) * stream_len];
        if len == stream_len {
            dest.copy_from_slice(stream_payload);
        } else {
            header.codec.decode(stream_payload, dest)?;
        }
    }
    filters::apply_inverse(&header.filters, header.typesize, &filtered)
}

/// `getitem_ctx`: decodes only the blocks overlapping
/// `[start_item, start_item+nitems)` and copies the requested item range
/// into `dest`.
pub fn getitem_ctx(
    dparams: &Dparams,
    chunk: &[u8],
    start_item: usize,
    nitems: usize,
    dest: &mut [u8],
) -> BcResult<usize> {
    getitem_ctx_inner(dparams, chunk, start_item, nitems, dest).map_err(|e| {
        crate::error::trace_error("getitem_ctx", &e);
        e
    })
}

fn getitem_ctx_inner(
    dparams: &Dparams,
    chunk: &[u8],
    start_item: usize,
    nitems: usize,
    dest: &mut [u8],
) -> BcResult<usize> {
    let header = parse_header(chunk)?;
    let typesize = header.typesize;
    let start_byte = start_item * typesize;
    let nbytes = nitems * typesize;
    if start_byte + nbytes > header.nbytes {
        return Err(BcError::InvalidParam(
            "getitem range exceeds chunk size".into(),
        ));
    }

    if header.special.is_some() || header.is_memcpy() {
        let mut scratch = vec![0u8; header.nbytes];
        decompress_ctx(dparams, chunk, &mut scratch, None)?;
        dest[..nbytes].copy_from_slice(&scratch[start_byte..start_byte + nbytes]);
        return Ok(nbytes);
    }

    let blocksize = header.blocksize;
    let first_block = start_byte / blocksize;
    let last_block = (start_byte + nbytes - 1) / blocksize;
    let nblocks = header.nblocks();
    let offsets = read_offsets(chunk, &header, nblocks)?;

    let mut scratch = vec![0u8; header.nbytes];
    for i in first_block..=last_block {
        let block_len = header.block_len(i);
        let start = offsets[i];
        let end = if i + 1 < nblocks {
            offsets[i + 1]
        } else {
            header.cbytes
        };
        let block = decode_block(&header, &chunk[start..end], block_len)?;
        let dest_start = i * blocksize;
        scratch[dest_start..dest_start + block.len()].copy_from_slice(&block);
    }
    dest[..nbytes].copy_from_slice(&scratch[start_byte..start_byte + nbytes]);
    Ok(nbytes)
}

// ---- Special-chunk encoder ----

fn special_chunk(cparams: &Cparams, nbytes: usize, kind: SpecialKind, value: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(EXTENDED_HEADER_LENGTH + cparams.typesize);
    write_header(
        &mut out,
        cparams.typesize,
        nbytes,
        nbytes.max(1),
        0,
        flag_bits::SPECIAL,
        cparams.codec,
        &[],
        false,
        Some(kind),
    );
    if let Some(v) = value {
        out.extend_from_slice(v);
    }
    let cbytes = out.len();
    out[layout::CBYTES..layout::CBYTES + 4].copy_from_slice(&(cbytes as i32).to_le_bytes());
    out
}

/// `chunk_zeros(nbytes)`: a 32-byte chunk whose decompression is `nbytes`
/// zero bytes.
pub fn chunk_zeros(cparams: &Cparams, nbytes: usize) -> Vec<u8> {
    special_chunk(cparams, nbytes, SpecialKind::Zero, None)
}

/// `chunk_nans(nbytes)`: requires `typesize` of 4 or 8.
pub fn chunk_nans(cparams: &Cparams, nbytes: usize) -> BcResult<Vec<u8>> {
    if cparams.typesize != 4 && cparams.typesize != 8 {
        return Err(BcError::InvalidParam(
            "chunk_nans requires typesize 4 or 8".into(),
        ));
    }
    Ok(special_chunk(cparams, nbytes, SpecialKind::Nan, None))
}

/// `chunk_uninit(nbytes)`: the decoder leaves the destination buffer
/// unmodified.
pub fn chunk_uninit(cparams: &Cparams, nbytes: usize) -> Vec<u8> {
    special_chunk(cparams, nbytes, SpecialKind::Uninit, None)
}

/// `chunk_repeatval(nbytes, value)`: `value` must be exactly `typesize`
/// bytes; the chunk is `32 + typesize` bytes.
pub fn chunk_repeatval(cparams: &Cparams, nbytes: usize, value: &[u8]) -> BcResult<Vec<u8>> {
    if value.len() != cparams.typesize {
        return Err(BcError::InvalidParam(format!(
            "repeat value is {} bytes, typesize is {}",
            value.len(),
            cparams.typesize
        )));
    }
    Ok(special_chunk(cparams, nbytes, SpecialKind::Value, Some(value)))
}

fn synthesize_special(
    kind: SpecialKind,
    header: &ChunkHeader,
    chunk: &[u8],
    dest: &mut [u8],
) -> BcResult<()> {
    match kind {
        SpecialKind::Zero => dest[..header.nbytes].fill(0),
        SpecialKind::Nan => {
            if header.typesize == 4 {
                for w in dest[..header.nbytes].chunks_exact_mut(4) {
                    w.copy_from_slice(&f32::NAN.to_le_bytes());
                }
            } else {
                for w in dest[..header.nbytes].chunks_exact_mut(8) {
                    w.copy_from_slice(&f64::NAN.to_le_bytes());
                }
            }
        }
        SpecialKind::Uninit => {}
        SpecialKind::Value => {
            let value = &chunk[header.header_len..header.header_len + header.typesize];
            for w in dest[..header.nbytes].chunks_exact_mut(header.typesize) {
                w.copy_from_slice(value);
            }
        }
    }
    Ok(())
}

/// Detects that the whole input would collapse to one of the four special
/// kinds and, if so, returns the constant-size chunk directly instead of running the full block pipeline.
fn try_collapse_special(cparams: &Cparams, src: &[u8]) -> Option<Vec<u8>> {
    if src.is_empty() {
        return None;
    }
    if src.iter().all(|&b| b == 0) {
        return Some(chunk_zeros(cparams, src.len()));
    }
    let typesize = cparams.typesize;
    if typesize > 0 && src.len() % typesize == 0 {
        let first = &src[..typesize];
        if src.chunks_exact(typesize).all(|c| c == first) {
            return chunk_repeatval(cparams, src.len(), first).ok();
        }
    }
    None
}

/// Size, in bytes, that `chunk_zeros`/`chunk_nans`/`chunk_uninit` occupy.
pub const SPECIAL_CHUNK_SIZE: usize = EXTENDED_HEADER_LENGTH;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Filter;

    fn cparams(typesize: usize, filters: Vec<Filter>) -> Cparams {
        Cparams {
            typesize,
            filters,
            nthreads: 1,
            ..Cparams::default()
        }
    }

    #[test]
    fn roundtrip_random_like_buffer() {
        let cp = cparams(1, vec![]);
        let src: Vec<u8> = (0..70_000u32).map(|i| ((i * 2654435761) % 256) as u8).collect();
        let chunk = compress_ctx(&cp, &src).unwrap();
        let mut dest = vec![0u8; src.len()];
        let n = decompress_ctx(&Dparams::default(), &chunk, &mut dest, None).unwrap();
        assert_eq!(n, src.len());
        assert_eq!(dest, src);
    }

    #[test]
    fn shuffle_preserves_arange() {
        let cp = cparams(4, vec![Filter::Shuffle]);
        let mut src = Vec::with_capacity(200_000 * 4);
        for i in 0..200_000i32 {
            src.extend_from_slice(&i.to_le_bytes());
        }
        let chunk = compress_ctx(&cp, &src).unwrap();
        let mut dest = vec![0u8; src.len()];
        decompress_ctx(&Dparams::default(), &chunk, &mut dest, None).unwrap();
        assert_eq!(dest, src);

        let mut item_dest = vec![0u8; 5 * 4];
        getitem_ctx(&Dparams::default(), &chunk, 1000, 5, &mut item_dest).unwrap();
        let items: Vec<i32> = item_dest
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(items, vec![1000, 1001, 1002, 1003, 1004]);
    }

    #[test]
    fn special_chunks_are_32_bytes() {
        let cp = cparams(8, vec![]);
        assert_eq!(chunk_zeros(&cp, 1_000_000).len(), SPECIAL_CHUNK_SIZE);
        assert_eq!(chunk_nans(&cp, 1_000_000).unwrap().len(), SPECIAL_CHUNK_SIZE);
        assert_eq!(chunk_uninit(&cp, 1_000_000).len(), SPECIAL_CHUNK_SIZE);
        let value = [1u8; 8];
        assert_eq!(
            chunk_repeatval(&cp, 1_000_000, &value).unwrap().len(),
            SPECIAL_CHUNK_SIZE + 8
        );
    }

    #[test]
    fn special_chunk_decodes_to_zeros() {
        let cp = cparams(8, vec![]);
        let chunk = chunk_zeros(&cp, 1_000_000);
        let mut dest = vec![0xffu8; 1_000_000];
        decompress_ctx(&Dparams::default(), &chunk, &mut dest, None).unwrap();
        assert!(dest.iter().all(|&b| b == 0));
    }

    #[test]
    fn bitshuffle_nonmultiple_of_eight_typesize() {
        let cp = cparams(
            4,
            vec![Filter::Bitshuffle],
        );
        let mut cp = cp;
        cp.codec = Codec::Lz4;
        let nbytes = 641_092usize;
        let mut src = Vec::with_capacity(nbytes);
        let mut x: u32 = 12345;
        while src.len() + 4 <= nbytes {
            x = x.wrapping_mul(1103515245).wrapping_add(12345) % 97;
            src.extend_from_slice(&x.to_le_bytes());
        }
        while src.len() < nbytes {
            src.push(0);
        }
        let chunk = compress_ctx(&cp, &src).unwrap();
        let mut dest = vec![0u8; nbytes];
        decompress_ctx(&Dparams::default(), &chunk, &mut dest, None).unwrap();
        assert_eq!(dest, src);
    }

    #[test]
    fn maskout_leaves_masked_blocks_untouched() {
        let cp = Cparams {
            typesize: 8,
            blocksize: 32 * 1024,
            filters: vec![],
            nthreads: 1,
            ..Cparams::default()
        };
        let n = 1024 * 1024;
        let mut src = Vec::with_capacity(n);
        let mut v: i64 = 0;
        while src.len() < n {
            src.extend_from_slice(&v.to_le_bytes());
            v += 1;
        }
        let chunk = compress_ctx(&cp, &src).unwrap();
        let header = parse_header(&chunk).unwrap();
        let nblocks = header.nblocks();

        let sentinel = 0xABu8;
        let mut dest = vec![sentinel; n];
        let mut mask = BlockMask(vec![false; nblocks]);
        for i in (0..nblocks).step_by(2) {
            mask.0[i] = true;
        }
        decompress_ctx(&Dparams::default(), &chunk, &mut dest, Some(&mut mask)).unwrap();
        for i in (0..nblocks).step_by(2) {
            let start = i * header.blocksize;
            let end = (start + header.blocksize).min(n);
            assert!(dest[start..end].iter().all(|&b| b == sentinel));
        }
        assert!(mask.0.is_empty());

        let mut dest2 = vec![sentinel; n];
        decompress_ctx(&Dparams::default(), &chunk, &mut dest2, None).unwrap();
        assert_eq!(dest2, src);
    }
}

//! Compression/decompression parameter blocks: plain owned Rust values
//! (no raw pointers, function-pointer vtables, or `#[repr(C)]`) built once
//! per call and handed to the block/chunk pipeline by value or `&`.

use crate::codecs::Codec;
use crate::filters::Filter;

/// Whether a filtered block is split into `typesize` codec sub-streams
/// before encoding. `Auto` applies a
/// per-block heuristic in [`crate::chunk`]; `ForwardCompat` pins the
/// conservative (non-split) choice so the resulting chunk is readable by
/// the widest range of decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    Always,
    Never,
    Auto,
    ForwardCompat,
}

/// Compression-side parameters. Cloned and overridden per call by
/// [`crate::env::effective_cparams`]; never mutated in place by a running
/// compression so that concurrent calls using the same base `Cparams` never
/// observe each other's env overrides.
#[derive(Clone)]
pub struct Cparams {
    pub clevel: u8,
    pub typesize: usize,
    pub codec: Codec,
    pub filters: Vec<Filter>,
    pub blocksize: usize,
    pub nthreads: u16,
    pub use_dict: bool,
    pub split_mode: SplitMode,
    /// `BLOSC_NOLOCK`: accepted for env-var compatibility. The
    /// library never locks across API calls regardless (callers serialize
    /// mutating super-chunk operations themselves), so this is read and
    /// validated but does not change behavior.
    pub nolock: bool,
    /// `BLOSC_BLOSC1_COMPAT`: pins the chunk writer to the
    /// earlier 16-byte header with no filter pipeline or split-mode fields,
    /// for decoders that predate the extended header.
    pub blosc1_compat: bool,
    /// Runs on the uncompressed input, block by block, before the filter
    /// pipeline; its output replaces the source for this chunk only.
    pub prefilter: Option<PrefilterFn>,
}

impl std::fmt::Debug for Cparams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cparams")
            .field("clevel", &self.clevel)
            .field("typesize", &self.typesize)
            .field("codec", &self.codec)
            .field("filters", &self.filters)
            .field("blocksize", &self.blocksize)
            .field("nthreads", &self.nthreads)
            .field("use_dict", &self.use_dict)
            .field("split_mode", &self.split_mode)
            .field("nolock", &self.nolock)
            .field("blosc1_compat", &self.blosc1_compat)
            .field("prefilter", &self.prefilter.is_some())
            .finish()
    }
}

impl Default for Cparams {
    fn default() -> Self {
        Cparams {
            clevel: 5,
            typesize: 1,
            codec: Codec::BloscLZ,
            filters: vec![Filter::Shuffle],
            blocksize: 0,
            nthreads: 1,
            use_dict: false,
            split_mode: SplitMode::Auto,
            nolock: false,
            blosc1_compat: false,
            prefilter: None,
        }
    }
}

/// Decompression-side parameters.
#[derive(Clone)]
pub struct Dparams {
    pub nthreads: u16,
    /// Runs per block after the inverse filter pipeline; its output replaces
    /// the default filter output for this decompress call.
    pub postfilter: Option<PostfilterFn>,
}

impl Default for Dparams {
    fn default() -> Self {
        Dparams {
            nthreads: 1,
            postfilter: None,
        }
    }
}

impl std::fmt::Debug for Dparams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dparams")
            .field("nthreads", &self.nthreads)
            .field("postfilter", &self.postfilter.is_some())
            .finish()
    }
}

/// A per-block skip mask for maskout decompression: block `i`
/// is skipped (left as zeroed/untouched output) when `mask[i]` is `true`.
/// Consumed and cleared after one `decompress_ctx` call so the same
/// context can be reused without residual state.
#[derive(Debug, Clone, Default)]
pub struct BlockMask(pub Vec<bool>);

impl BlockMask {
    pub fn skips(&self, block_index: usize) -> bool {
        self.0.get(block_index).copied().unwrap_or(false)
    }

    /// Consumes the mask after one `decompress_ctx` call: once
    /// cleared, every block is unmasked again for the next call on this
    /// context.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// A prefilter runs on the uncompressed input before the filter pipeline;
/// a postfilter runs on decompressed output before it's handed back to the
/// caller. Both are plain closures rather than C function pointers plus a
/// `void*` user-data slot.
pub type PrefilterFn = std::sync::Arc<dyn Fn(&mut [u8]) + Send + Sync>;
pub type PostfilterFn = std::sync::Arc<dyn Fn(&mut [u8]) + Send + Sync>;

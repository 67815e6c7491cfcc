//! A blocked, typed-data compression library: a two-level
//! container (chunk and super-chunk) with a pluggable filter+codec
//! pipeline, streaming on-disk and in-memory frame formats, constant-time
//! special-chunk encodings, and a random-access slicing API over
//! multi-gigabyte logical byte streams.

pub mod chunk;
pub mod codecs;
pub mod constants;
pub mod context;
pub mod env;
pub mod error;
pub mod filters;
pub mod frame;
pub mod io;
pub mod meta;
pub mod registry;
pub mod schunk;
pub mod sframe;

pub use chunk::{
    chunk_nans, chunk_repeatval, chunk_uninit, chunk_zeros, compress_ctx, decompress_ctx,
    getitem_ctx, SpecialKind,
};
pub use codecs::Codec;
pub use context::{BlockMask, Cparams, Dparams, PostfilterFn, PrefilterFn, SplitMode};
pub use error::{BcError, BcResult};
pub use filters::Filter;
pub use registry::{
    register_codec, register_filter, register_io_backend, CustomCodec, CustomFilter,
    IoBackendFactory,
};
pub use schunk::{ChunkEntry, ChunkView, LazyChunk, Schunk};

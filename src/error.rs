//! Error taxonomy. The error *kind*, not the message, is the
//! stable contract: callers match on variants, not on `Display` text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BcError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid or corrupt chunk/frame header: {0}")]
    InvalidHeader(String),

    #[error("memory allocation failed: {0}")]
    MemoryAlloc(String),

    #[error("destination buffer too small to read into")]
    ReadBufferTooSmall,

    #[error("destination buffer too small to write into")]
    WriteBufferTooSmall,

    #[error("codec not supported: {0}")]
    CodecUnsupported(String),

    #[error("filter pipeline error: {0}")]
    FilterPipeline(String),

    #[error("failed to open {path}: {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to truncate {path}: {source}")]
    FileTruncate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    FileRemove {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("chunk append rejected: {0}")]
    ChunkAppend(String),

    #[error("chunk insert rejected: {0}")]
    ChunkInsert(String),

    #[error("chunk update rejected: {0}")]
    ChunkUpdate(String),

    #[error("buffer exceeds the 2GiB chunk limit")]
    TwoGbLimit,

    #[error("super-chunk copy failed: {0}")]
    SchunkCopy(String),

    #[error("wrong frame type for this operation")]
    FrameType,

    #[error("thread pool creation failed: {0}")]
    ThreadCreate(String),

    #[error("postfilter callback failed: {0}")]
    Postfilter(String),

    #[error("I/O backend plugin error: {0}")]
    PluginIo(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("special-chunk (run-length) header is corrupt: {0}")]
    RunLength(String),
}

pub type BcResult<T> = Result<T, BcError>;

/// Emits a `BLOSC_TRACE`-equivalent diagnostic line for `err` at its origin,
/// gated by the `BLOSC_TRACE` environment variable.
///
/// Call this where an error is first produced, not at every propagation
/// point, so the trace reflects the failing operation rather than every
/// frame of `?` it passes through.
pub fn trace_error(context: &str, err: &BcError) {
    if std::env::var_os("BLOSC_TRACE").is_some() {
        log::error!("[{context}] {err}");
    } else {
        log::debug!("[{context}] {err}");
    }
}

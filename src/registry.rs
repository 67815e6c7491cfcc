//! Process-global registries for user-supplied codecs, filters, and I/O
//! backends, keyed by the 8-bit ids spec.md §6 carves out for them (32..159
//! globally registered, 128/160..255 user-registered depending on kind).
//! Registration is one-shot and global: there is no per-call alternative,
//! matching the "global mutable state" design note in spec.md §9.

use crate::codecs::Codec;
use crate::constants::{codec_id, io_id};
use crate::error::{BcError, BcResult};
use crate::io::IoBackend;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Implements a codec behind a registered id, parallel to the built-in
/// [`Codec`] variants' `encode`/`decode`.
pub trait CustomCodec: Send + Sync {
    fn name(&self) -> &str;
    fn encode(&self, clevel: u8, src: &[u8], dest: &mut [u8]) -> BcResult<usize>;
    fn decode(&self, src: &[u8], dest: &mut [u8]) -> BcResult<usize>;
}

/// Implements a filter behind a registered id, parallel to the built-in
/// [`crate::filters::Filter`] variants' forward/inverse transforms.
pub trait CustomFilter: Send + Sync {
    fn name(&self) -> &str;
    fn forward(&self, typesize: usize, meta: u8, src: &[u8], dest: &mut [u8]) -> BcResult<()>;
    fn inverse(&self, typesize: usize, meta: u8, src: &[u8], dest: &mut [u8]) -> BcResult<()>;
}

/// Constructs backend handles for a registered I/O backend id, so a frame
/// opener that reads an unfamiliar `io_backend_id` out of the header can
/// dispatch to the right implementation instead of assuming stdio/mmap.
pub trait IoBackendFactory: Send + Sync {
    fn name(&self) -> &str;
    fn open_create(&self, path: &str) -> BcResult<Box<dyn IoBackend>>;
    fn open_existing(&self, path: &str) -> BcResult<Box<dyn IoBackend>>;
}

fn codec_registry() -> &'static RwLock<HashMap<u8, Arc<dyn CustomCodec>>> {
    static REG: OnceLock<RwLock<HashMap<u8, Arc<dyn CustomCodec>>>> = OnceLock::new();
    REG.get_or_init(|| RwLock::new(HashMap::new()))
}

fn filter_registry() -> &'static RwLock<HashMap<u8, Arc<dyn CustomFilter>>> {
    static REG: OnceLock<RwLock<HashMap<u8, Arc<dyn CustomFilter>>>> = OnceLock::new();
    REG.get_or_init(|| RwLock::new(HashMap::new()))
}

fn io_registry() -> &'static RwLock<HashMap<u8, Arc<dyn IoBackendFactory>>> {
    static REG: OnceLock<RwLock<HashMap<u8, Arc<dyn IoBackendFactory>>>> = OnceLock::new();
    REG.get_or_init(|| RwLock::new(HashMap::new()))
}

fn check_id_free(id: u8, builtin_max: u8, taken: bool) -> BcResult<()> {
    if id <= builtin_max {
        return Err(BcError::InvalidParam(format!(
            "id {id} is reserved for built-in variants (0..={builtin_max})"
        )));
    }
    if taken {
        return Err(BcError::InvalidParam(format!(
            "id {id} is already registered"
        )));
    }
    Ok(())
}

/// Registers a codec at `id` (must be outside `0..=31`, the built-in
/// range). Returns an error if `id` is already taken.
pub fn register_codec(id: u8, codec: Arc<dyn CustomCodec>) -> BcResult<()> {
    let mut reg = codec_registry().write().expect("codec registry poisoned");
    check_id_free(id, 31, reg.contains_key(&id))?;
    reg.insert(id, codec);
    Ok(())
}

pub(crate) fn get_codec(id: u8) -> BcResult<Arc<dyn CustomCodec>> {
    codec_registry()
        .read()
        .expect("codec registry poisoned")
        .get(&id)
        .cloned()
        .ok_or_else(|| BcError::CodecUnsupported(format!("no codec registered for id {id}")))
}

/// Registers a filter at `id` (must be outside `0..=31`).
pub fn register_filter(id: u8, filter: Arc<dyn CustomFilter>) -> BcResult<()> {
    let mut reg = filter_registry().write().expect("filter registry poisoned");
    check_id_free(id, 31, reg.contains_key(&id))?;
    reg.insert(id, filter);
    Ok(())
}

pub(crate) fn get_filter(id: u8) -> BcResult<Arc<dyn CustomFilter>> {
    filter_registry()
        .read()
        .expect("filter registry poisoned")
        .get(&id)
        .cloned()
        .ok_or_else(|| BcError::FilterPipeline(format!("no filter registered for id {id}")))
}

/// Registers an I/O backend factory at `id` (must be outside `0` (stdio)
/// and `1` (mmap)).
pub fn register_io_backend(id: u8, factory: Arc<dyn IoBackendFactory>) -> BcResult<()> {
    let mut reg = io_registry().write().expect("io registry poisoned");
    if id == io_id::STDIO || id == io_id::MMAP {
        return Err(BcError::InvalidParam(format!(
            "id {id} is reserved for the built-in stdio/mmap backends"
        )));
    }
    if reg.contains_key(&id) {
        return Err(BcError::InvalidParam(format!(
            "id {id} is already registered"
        )));
    }
    reg.insert(id, factory);
    Ok(())
}

pub(crate) fn get_io_backend(id: u8) -> BcResult<Arc<dyn IoBackendFactory>> {
    io_registry()
        .read()
        .expect("io registry poisoned")
        .get(&id)
        .cloned()
        .ok_or_else(|| BcError::PluginIo(format!("no I/O backend registered for id {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DoublingCodec;

    impl CustomCodec for DoublingCodec {
        fn name(&self) -> &str {
            "doubling-test-codec"
        }
        fn encode(&self, _clevel: u8, src: &[u8], dest: &mut [u8]) -> BcResult<usize> {
            if dest.len() < src.len() {
                return Ok(0);
            }
            dest[..src.len()].copy_from_slice(src);
            Ok(src.len())
        }
        fn decode(&self, src: &[u8], dest: &mut [u8]) -> BcResult<usize> {
            dest.copy_from_slice(src);
            Ok(src.len())
        }
    }

    #[test]
    fn register_and_dispatch_custom_codec() {
        register_codec(200, Arc::new(DoublingCodec)).unwrap();
        let codec = Codec::from_id(200).unwrap();
        let src = b"hello custom codec";
        let mut compressed = vec![0u8; src.len()];
        let n = codec.encode(0, src, &mut compressed).unwrap();
        let mut back = vec![0u8; n];
        codec.decode(&compressed[..n], &mut back).unwrap();
        assert_eq!(&back, src);
    }

    #[test]
    fn rejects_builtin_id() {
        assert!(register_codec(codec_id::ZSTD, Arc::new(DoublingCodec)).is_err());
    }

    struct XorFilter;

    impl CustomFilter for XorFilter {
        fn name(&self) -> &str {
            "xor-test-filter"
        }
        fn forward(&self, _typesize: usize, meta: u8, src: &[u8], dest: &mut [u8]) -> BcResult<()> {
            for (d, s) in dest.iter_mut().zip(src) {
                *d = s ^ meta;
            }
            Ok(())
        }
        fn inverse(&self, typesize: usize, meta: u8, src: &[u8], dest: &mut [u8]) -> BcResult<()> {
            self.forward(typesize, meta, src, dest)
        }
    }

    #[test]
    fn register_and_dispatch_custom_filter() {
        use crate::filters::{apply_forward, apply_inverse, Filter};
        register_filter(201, Arc::new(XorFilter)).unwrap();
        let filter = Filter::from_id_meta(201, 0x42).unwrap().unwrap();
        let src: Vec<u8> = (0..64u8).collect();
        let forward = apply_forward(&[filter], 1, &src).unwrap();
        assert_ne!(forward, src);
        let back = apply_inverse(&[filter], 1, &forward).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn rejects_builtin_filter_id() {
        assert!(register_filter(crate::constants::filter_id::DELTA, Arc::new(XorFilter)).is_err());
    }

    struct StdioFactory;

    impl IoBackendFactory for StdioFactory {
        fn name(&self) -> &str {
            "stdio-relabeled"
        }
        fn open_create(&self, path: &str) -> BcResult<Box<dyn IoBackend>> {
            Ok(Box::new(crate::io::StdioBackend::open_create(path)?))
        }
        fn open_existing(&self, path: &str) -> BcResult<Box<dyn IoBackend>> {
            Ok(Box::new(crate::io::StdioBackend::open_existing(path)?))
        }
    }

    #[test]
    fn register_and_dispatch_io_backend() {
        register_io_backend(220, Arc::new(StdioFactory)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.b2frame");
        let factory = get_io_backend(220).unwrap();
        let mut backend = factory.open_create(path.to_str().unwrap()).unwrap();
        backend.write(0, b"hello").unwrap();
        backend.flush().unwrap();
        let mut reopened = factory.open_existing(path.to_str().unwrap()).unwrap();
        assert_eq!(reopened.read_owned(0, 5).unwrap(), b"hello");
    }

    #[test]
    fn rejects_reserved_io_ids() {
        assert!(register_io_backend(io_id::STDIO, Arc::new(StdioFactory)).is_err());
        assert!(register_io_backend(io_id::MMAP, Arc::new(StdioFactory)).is_err());
    }
}

//! Metalayer registries attached to a super-chunk: up to
//! [`crate::constants::MAX_METALAYERS`] fixed-size named blobs, plus a much
//! larger, fully mutable variable-length table whose contents are
//! individually compressed.

use crate::codecs::Codec;
use crate::constants::{MAX_METALAYERS, MAX_METALAYER_NAME, MAX_VLMETALAYERS};
use crate::context::Cparams;
use crate::error::{BcError, BcResult};

/// A fixed metalayer: content length may shrink or stay the same on update,
/// but never grow past what it was created with.
#[derive(Debug, Clone)]
pub struct Metalayer {
    pub name: String,
    pub content: Vec<u8>,
    original_len: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MetalayerTable {
    entries: Vec<Metalayer>,
}

impl MetalayerTable {
    pub fn add(&mut self, name: &str, content: &[u8]) -> BcResult<()> {
        if name.len() > MAX_METALAYER_NAME {
            return Err(BcError::InvalidParam(format!(
                "metalayer name {name:?} exceeds {MAX_METALAYER_NAME} chars"
            )));
        }
        if self.entries.len() >= MAX_METALAYERS {
            return Err(BcError::InvalidParam(format!(
                "super-chunk already has {MAX_METALAYERS} fixed metalayers"
            )));
        }
        if self.exists(name) {
            return Err(BcError::InvalidParam(format!(
                "metalayer {name:?} already exists"
            )));
        }
        self.entries.push(Metalayer {
            name: name.to_string(),
            content: content.to_vec(),
            original_len: content.len(),
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.content.as_slice())
    }

    pub fn update(&mut self, name: &str, content: &[u8]) -> BcResult<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| BcError::NotFound(format!("metalayer {name:?}")))?;
        if content.len() > entry.original_len {
            return Err(BcError::InvalidParam(format!(
                "metalayer {name:?} cannot grow past its original {} bytes",
                entry.original_len
            )));
        }
        entry.content = content.to_vec();
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.iter().any(|m| m.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metalayer> {
        self.entries.iter()
    }

    pub fn from_raw(entries: Vec<(String, Vec<u8>)>) -> Self {
        MetalayerTable {
            entries: entries
                .into_iter()
                .map(|(name, content)| {
                    let original_len = content.len();
                    Metalayer {
                        name,
                        content,
                        original_len,
                    }
                })
                .collect(),
        }
    }
}

/// A variable-length metalayer entry; `content` is stored already compressed
/// with `vlmeta_cparams`.
#[derive(Debug, Clone)]
struct VlMetalayer {
    name: String,
    compressed: Vec<u8>,
    original_len: usize,
}

#[derive(Debug, Clone)]
pub struct VlMetaTable {
    entries: Vec<VlMetalayer>,
    cparams: Cparams,
}

impl Default for VlMetaTable {
    fn default() -> Self {
        VlMetaTable {
            entries: Vec::new(),
            cparams: Cparams {
                typesize: 1,
                codec: Codec::Zstd,
                filters: vec![],
                ..Cparams::default()
            },
        }
    }
}

impl VlMetaTable {
    pub fn add(&mut self, name: &str, content: &[u8]) -> BcResult<()> {
        if self.entries.len() >= MAX_VLMETALAYERS {
            return Err(BcError::InvalidParam(format!(
                "super-chunk already has {MAX_VLMETALAYERS} vlmeta entries"
            )));
        }
        if self.exists(name) {
            return Err(BcError::InvalidParam(format!(
                "vlmeta entry {name:?} already exists"
            )));
        }
        let chunk = crate::chunk::compress_ctx(&self.cparams, content)?;
        self.entries.push(VlMetalayer {
            name: name.to_string(),
            compressed: chunk,
            original_len: content.len(),
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> BcResult<Vec<u8>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| BcError::NotFound(format!("vlmeta entry {name:?}")))?;
        let mut dest = vec![0u8; entry.original_len];
        crate::chunk::decompress_ctx(
            &crate::context::Dparams::default(),
            &entry.compressed,
            &mut dest,
            None,
        )?;
        Ok(dest)
    }

    pub fn update(&mut self, name: &str, content: &[u8]) -> BcResult<()> {
        let chunk = crate::chunk::compress_ctx(&self.cparams, content)?;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| BcError::NotFound(format!("vlmeta entry {name:?}")))?;
        entry.compressed = chunk;
        entry.original_len = content.len();
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> BcResult<()> {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        if self.entries.len() == before {
            return Err(BcError::NotFound(format!("vlmeta entry {name:?}")));
        }
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn raw_entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.compressed.as_slice()))
    }

    pub fn from_raw(entries: Vec<(String, Vec<u8>, usize)>) -> Self {
        VlMetaTable {
            entries: entries
                .into_iter()
                .map(|(name, compressed, original_len)| VlMetalayer {
                    name,
                    compressed,
                    original_len,
                })
                .collect(),
            ..VlMetaTable::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_metalayer_cannot_grow_on_update() {
        let mut table = MetalayerTable::default();
        table.add("codec_info", b"abcd").unwrap();
        assert!(table.update("codec_info", b"ab").is_ok());
        assert!(table.update("codec_info", b"abcdef").is_err());
    }

    #[test]
    fn vlmeta_roundtrips() {
        let mut table = VlMetaTable::default();
        table.add("author", b"a rust crate").unwrap();
        assert_eq!(table.get("author").unwrap(), b"a rust crate");
        table.update("author", b"someone else").unwrap();
        assert_eq!(table.get("author").unwrap(), b"someone else");
        table.delete("author").unwrap();
        assert!(table.get("author").is_err());
    }
}

//! The codec pipeline: byte-reducing compressors that run
//! after the filter pipeline, one per sub-stream. Built-in ids occupy 0..31;
//! [`Codec::id`]/[`Codec::from_id`] are the wire mapping.

pub mod blosclz;

use crate::constants::codec_id;
use crate::error::{BcError, BcResult};

/// A built-in codec, or `Custom` dispatching to a codec registered through
/// [`crate::registry::register_codec`] (ids 32..255; the built-in range
/// 0..31 never collides with it). `LZ4HC` shares LZ4's wire format and
/// decoder; it differs only in how hard the encoder searches, which
/// `lz4_flex` does not expose as a separate knob, so it is implemented as
/// LZ4 at a fixed high search effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    BloscLZ,
    Lz4,
    Lz4Hc,
    Zlib,
    Zstd,
    Custom(u8),
}

impl Codec {
    pub fn id(self) -> u8 {
        match self {
            Codec::BloscLZ => codec_id::BLOSCLZ,
            Codec::Lz4 => codec_id::LZ4,
            Codec::Lz4Hc => codec_id::LZ4HC,
            Codec::Zlib => codec_id::ZLIB,
            Codec::Zstd => codec_id::ZSTD,
            Codec::Custom(id) => id,
        }
    }

    /// Built-ins take priority; anything outside `0..=31` that isn't one of
    /// them becomes `Custom(id)`, resolved against the registry lazily (at
    /// `encode`/`decode` time) rather than here, since a chunk's header can
    /// be parsed before the codec that wrote it has been registered in this
    /// process.
    pub fn from_id(id: u8) -> BcResult<Codec> {
        Ok(match id {
            codec_id::BLOSCLZ => Codec::BloscLZ,
            codec_id::LZ4 => Codec::Lz4,
            codec_id::LZ4HC => Codec::Lz4Hc,
            codec_id::ZLIB => Codec::Zlib,
            codec_id::ZSTD => Codec::Zstd,
            other if other > crate::constants::BUILTIN_ID_MAX => Codec::Custom(other),
            other => return Err(BcError::CodecUnsupported(format!("id {other}"))),
        })
    }

    pub fn by_name(name: &str) -> Option<Codec> {
        Some(match name {
            "blosclz" => Codec::BloscLZ,
            "lz4" => Codec::Lz4,
            "lz4hc" => Codec::Lz4Hc,
            "zlib" => Codec::Zlib,
            "zstd" => Codec::Zstd,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::BloscLZ => "blosclz",
            Codec::Lz4 => "lz4",
            Codec::Lz4Hc => "lz4hc",
            Codec::Zlib => "zlib",
            Codec::Zstd => "zstd",
            Codec::Custom(_) => "custom",
        }
    }

    /// Encodes `src` into `dest`, returning the number of bytes written, or
    /// `Ok(0)` if the codec declined (the stream is treated as incompressible
    /// and stored raw by the caller).
    pub fn encode(self, clevel: u8, src: &[u8], dest: &mut [u8]) -> BcResult<usize> {
        match self {
            Codec::BloscLZ => Ok(blosclz::compress(clevel as i32, src, dest)),
            Codec::Lz4 | Codec::Lz4Hc => {
                lz4_flex::block::compress_into(src, dest).map_err(|e| {
                    BcError::CodecUnsupported(format!("lz4 compress: {e}"))
                })
            }
            Codec::Zlib => {
                use flate2::write::ZlibEncoder;
                use flate2::Compression;
                use std::io::Write;
                let level = Compression::new(clevel.min(9) as u32);
                let mut enc = ZlibEncoder::new(Vec::with_capacity(dest.len()), level);
                enc.write_all(src)
                    .map_err(|e| BcError::CodecUnsupported(format!("zlib compress: {e}")))?;
                let out = enc
                    .finish()
                    .map_err(|e| BcError::CodecUnsupported(format!("zlib compress: {e}")))?;
                if out.len() > dest.len() {
                    return Ok(0);
                }
                dest[..out.len()].copy_from_slice(&out);
                Ok(out.len())
            }
            Codec::Zstd => {
                let level = (clevel as i32 * 22 / 9).max(1);
                let out = zstd::bulk::compress(src, level)
                    .map_err(|e| BcError::CodecUnsupported(format!("zstd compress: {e}")))?;
                if out.len() > dest.len() {
                    return Ok(0);
                }
                dest[..out.len()].copy_from_slice(&out);
                Ok(out.len())
            }
            Codec::Custom(id) => crate::registry::get_codec(id)?.encode(clevel, src, dest),
        }
    }

    /// Decodes `src` (exactly one codec's compressed sub-stream) into `dest`,
    /// which must be exactly the expected decompressed length.
    pub fn decode(self, src: &[u8], dest: &mut [u8]) -> BcResult<usize> {
        match self {
            Codec::BloscLZ => {
                let n = blosclz::decompress(src, dest);
                if n != dest.len() {
                    return Err(BcError::InvalidHeader(
                        "blosclz decompressed length mismatch".into(),
                    ));
                }
                Ok(n)
            }
            Codec::Lz4 | Codec::Lz4Hc => lz4_flex::block::decompress_into(src, dest)
                .map_err(|e| BcError::InvalidHeader(format!("lz4 decompress: {e}"))),
            Codec::Zlib => {
                use flate2::write::ZlibDecoder;
                use std::io::Write;
                let mut dec = ZlibDecoder::new(Vec::with_capacity(dest.len()));
                dec.write_all(src)
                    .map_err(|e| BcError::InvalidHeader(format!("zlib decompress: {e}")))?;
                let out = dec
                    .finish()
                    .map_err(|e| BcError::InvalidHeader(format!("zlib decompress: {e}")))?;
                if out.len() != dest.len() {
                    return Err(BcError::InvalidHeader(
                        "zlib decompressed length mismatch".into(),
                    ));
                }
                dest.copy_from_slice(&out);
                Ok(out.len())
            }
            Codec::Zstd => {
                let n = zstd::bulk::decompress_to_buffer(src, dest)
                    .map_err(|e| BcError::InvalidHeader(format!("zstd decompress: {e}")))?;
                if n != dest.len() {
                    return Err(BcError::InvalidHeader(
                        "zstd decompressed length mismatch".into(),
                    ));
                }
                Ok(n)
            }
            Codec::Custom(id) => crate::registry::get_codec(id)?.decode(src, dest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: Codec) {
        let src: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let mut compressed = vec![0u8; src.len() + 64];
        let n = codec.encode(5, &src, &mut compressed).unwrap();
        assert!(n > 0);
        let mut back = vec![0u8; src.len()];
        codec.decode(&compressed[..n], &mut back).unwrap();
        assert_eq!(src, back);
    }

    #[test]
    fn blosclz_roundtrips() {
        roundtrip(Codec::BloscLZ);
    }

    #[test]
    fn lz4_roundtrips() {
        roundtrip(Codec::Lz4);
    }

    #[test]
    fn zlib_roundtrips() {
        roundtrip(Codec::Zlib);
    }

    #[test]
    fn zstd_roundtrips() {
        roundtrip(Codec::Zstd);
    }

    #[test]
    fn id_roundtrips() {
        for c in [Codec::BloscLZ, Codec::Lz4, Codec::Lz4Hc, Codec::Zlib, Codec::Zstd] {
            assert_eq!(Codec::from_id(c.id()).unwrap(), c);
        }
    }
}

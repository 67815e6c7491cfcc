//! The filter pipeline: a sequence of ≤6 reversible,
//! byte-preserving transforms applied to a block before the codec runs, and
//! undone (in reverse order) after the codec's inverse.

mod bitshuffle;
mod delta;
mod shuffle;
mod truncate;

use crate::constants::MAX_FILTERS;
use crate::error::{BcError, BcResult};

/// One slot in the filter pipeline. Built-in ids occupy 0..31;
/// `TruncatePrecision` carries its meta byte (signed precision bits) inline
/// since it's needed by both directions. `Custom` dispatches to a filter
/// registered through [`crate::registry::register_filter`] (ids 32..255),
/// carrying its meta byte the same way `TruncatePrecision` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Shuffle,
    Bitshuffle,
    Delta,
    TruncatePrecision(i8),
    Custom(u8, u8),
}

impl Filter {
    pub fn id(self) -> u8 {
        match self {
            Filter::Shuffle => crate::constants::filter_id::SHUFFLE,
            Filter::Bitshuffle => crate::constants::filter_id::BITSHUFFLE,
            Filter::Delta => crate::constants::filter_id::DELTA,
            Filter::TruncatePrecision(_) => crate::constants::filter_id::TRUNC_PREC,
            Filter::Custom(id, _) => id,
        }
    }

    pub fn meta(self) -> u8 {
        match self {
            Filter::TruncatePrecision(bits) => bits as u8,
            Filter::Custom(_, meta) => meta,
            _ => 0,
        }
    }

    pub fn from_id_meta(id: u8, meta: u8) -> BcResult<Option<Filter>> {
        use crate::constants::filter_id::*;
        Ok(match id {
            NOFILTER => None,
            SHUFFLE => Some(Filter::Shuffle),
            BITSHUFFLE => Some(Filter::Bitshuffle),
            DELTA => Some(Filter::Delta),
            TRUNC_PREC => Some(Filter::TruncatePrecision(meta as i8)),
            other if other > crate::constants::BUILTIN_ID_MAX => {
                Some(Filter::Custom(other, meta))
            }
            other => {
                return Err(BcError::FilterPipeline(format!(
                    "unknown filter id {other}"
                )))
            }
        })
    }
}

/// Validates a pipeline: at most
/// [`MAX_FILTERS`] slots, and `TruncatePrecision` only makes sense for
/// 4- or 8-byte typesizes.
pub fn validate_pipeline(filters: &[Filter], typesize: usize) -> BcResult<()> {
    if filters.len() > MAX_FILTERS {
        return Err(BcError::FilterPipeline(format!(
            "pipeline has {} filters, max is {MAX_FILTERS}",
            filters.len()
        )));
    }
    for f in filters {
        if matches!(f, Filter::TruncatePrecision(_)) && typesize != 4 && typesize != 8 {
            return Err(BcError::FilterPipeline(
                "truncate-precision requires typesize 4 or 8".into(),
            ));
        }
    }
    Ok(())
}

fn apply_one_forward(filter: Filter, typesize: usize, block: &[u8], dest: &mut [u8]) -> BcResult<()> {
    match filter {
        Filter::Shuffle => {
            shuffle::shuffle(typesize, block, dest);
            Ok(())
        }
        Filter::Bitshuffle => bit_level_apply(typesize, block, dest, bitshuffle::bitshuffle),
        Filter::Delta => {
            delta::encode(typesize, block, dest);
            Ok(())
        }
        Filter::TruncatePrecision(bits) => match typesize {
            4 => truncate::truncate_f32(bits, block, dest),
            8 => truncate::truncate_f64(bits, block, dest),
            other => Err(BcError::FilterPipeline(format!(
                "truncate-precision unsupported for typesize {other}"
            ))),
        },
        Filter::Custom(id, meta) => {
            crate::registry::get_filter(id)?.forward(typesize, meta, block, dest)
        }
    }
}

fn apply_one_inverse(filter: Filter, typesize: usize, block: &[u8], dest: &mut [u8]) -> BcResult<()> {
    match filter {
        Filter::Shuffle => {
            shuffle::unshuffle(typesize, block, dest);
            Ok(())
        }
        Filter::Bitshuffle => bit_level_apply(typesize, block, dest, bitshuffle::bitunshuffle),
        Filter::Delta => {
            delta::decode(typesize, block, dest);
            Ok(())
        }
        // Truncation is lossy; there is nothing to invert, so pass through.
        Filter::TruncatePrecision(_) => {
            dest.copy_from_slice(block);
            Ok(())
        }
        Filter::Custom(id, meta) => {
            crate::registry::get_filter(id)?.inverse(typesize, meta, block, dest)
        }
    }
}

/// Shared scalar-remainder wrapper for bit-level filters: runs
/// `f` over the largest multiple-of-8-elements prefix and copies the
/// leftover bytes through untouched.
fn bit_level_apply(
    typesize: usize,
    block: &[u8],
    dest: &mut [u8],
    f: fn(usize, usize, &[u8], &mut [u8]),
) -> BcResult<()> {
    if typesize == 0 {
        return Err(BcError::FilterPipeline("typesize must be >= 1".into()));
    }
    let nelems = block.len() / typesize;
    let whole = nelems - nelems % 8;
    let whole_bytes = whole * typesize;
    if whole > 0 {
        f(typesize, whole, &block[..whole_bytes], &mut dest[..whole_bytes]);
    }
    dest[whole_bytes..].copy_from_slice(&block[whole_bytes..]);
    Ok(())
}

/// Runs the forward pipeline over `block`, in pipeline order.
pub fn apply_forward(filters: &[Filter], typesize: usize, block: &[u8]) -> BcResult<Vec<u8>> {
    let mut current = block.to_vec();
    for &filter in filters {
        let mut next = vec![0u8; current.len()];
        apply_one_forward(filter, typesize, &current, &mut next)?;
        current = next;
    }
    Ok(current)
}

/// Runs the inverse pipeline over `block`, in reverse pipeline order.
pub fn apply_inverse(filters: &[Filter], typesize: usize, block: &[u8]) -> BcResult<Vec<u8>> {
    let mut current = block.to_vec();
    for &filter in filters.iter().rev() {
        let mut next = vec![0u8; current.len()];
        apply_one_inverse(filter, typesize, &current, &mut next)?;
        current = next;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_roundtrips_shuffle_then_delta() {
        let typesize = 4;
        let n = 256;
        let mut src = Vec::with_capacity(n * typesize);
        for i in 0..n as i32 {
            src.extend_from_slice(&i.to_le_bytes());
        }
        let filters = [Filter::Delta, Filter::Shuffle];
        let forward = apply_forward(&filters, typesize, &src).unwrap();
        let back = apply_inverse(&filters, typesize, &forward).unwrap();
        assert_eq!(src, back);
    }

    #[test]
    fn rejects_too_many_filters() {
        let filters = vec![Filter::Shuffle; MAX_FILTERS + 1];
        assert!(validate_pipeline(&filters, 4).is_err());
    }
}

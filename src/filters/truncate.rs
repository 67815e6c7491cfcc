//! Truncate-precision filter: zeroes low mantissa bits of IEEE-754 floats to
//! improve downstream codec ratio at a controlled precision cost. Operates
//! via `to_le_bytes`/`from_le_bytes` rather than unaligned pointer casts.

use crate::error::{BcError, BcResult};

const MANTISSA_BITS_F32: i32 = 23;
const MANTISSA_BITS_F64: i32 = 52;

fn zeroed_bits(prec_bits: i8, mantissa_bits: i32) -> BcResult<u32> {
    let prec_bits = prec_bits as i32;
    if prec_bits.abs() > mantissa_bits {
        return Err(BcError::FilterPipeline(format!(
            "precision {prec_bits} exceeds the {mantissa_bits}-bit mantissa"
        )));
    }
    let zeroed = if prec_bits >= 0 {
        mantissa_bits - prec_bits
    } else {
        -prec_bits
    };
    if zeroed >= mantissa_bits {
        return Err(BcError::FilterPipeline(format!(
            "precision reduction of {zeroed} bits would zero the whole mantissa"
        )));
    }
    Ok(zeroed as u32)
}

/// Truncate the mantissa of every f32 in `block` to `prec_bits`, writing the
/// result (still a valid IEEE-754 byte layout) into `dest`.
pub fn truncate_f32(prec_bits: i8, block: &[u8], dest: &mut [u8]) -> BcResult<()> {
    let zeroed = zeroed_bits(prec_bits, MANTISSA_BITS_F32)?;
    let mask = !0u32 << zeroed;
    for (src, out) in block.chunks_exact(4).zip(dest.chunks_exact_mut(4)) {
        let bits = u32::from_le_bytes(src.try_into().unwrap()) & mask;
        out.copy_from_slice(&bits.to_le_bytes());
    }
    let rem = block.len() - block.len() % 4;
    dest[rem..].copy_from_slice(&block[rem..]);
    Ok(())
}

/// Truncate the mantissa of every f64 in `block` to `prec_bits`.
pub fn truncate_f64(prec_bits: i8, block: &[u8], dest: &mut [u8]) -> BcResult<()> {
    let zeroed = zeroed_bits(prec_bits, MANTISSA_BITS_F64)?;
    let mask = !0u64 << zeroed;
    for (src, out) in block.chunks_exact(8).zip(dest.chunks_exact_mut(8)) {
        let bits = u64::from_le_bytes(src.try_into().unwrap()) & mask;
        out.copy_from_slice(&bits.to_le_bytes());
    }
    let rem = block.len() - block.len() % 8;
    dest[rem..].copy_from_slice(&block[rem..]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_idempotent() {
        let vals: Vec<f32> = vec![1.0, 2.5, std::f32::consts::PI, -7.25];
        let mut block = Vec::new();
        for v in &vals {
            block.extend_from_slice(&v.to_le_bytes());
        }
        let mut once = vec![0u8; block.len()];
        truncate_f32(10, &block, &mut once).unwrap();
        let mut twice = vec![0u8; block.len()];
        truncate_f32(10, &once, &mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_out_of_range_precision() {
        let block = vec![0u8; 4];
        let mut dest = vec![0u8; 4];
        assert!(truncate_f32(30, &block, &mut dest).is_err());
    }
}

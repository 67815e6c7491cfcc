//! Bit-shuffle: transposes a block so that bit `k` of every byte-lane `j` of
//! every element is grouped contiguously. Ported from the generic (non-SIMD)
//! reference implementation of the bit-transpose algorithm; ported to safe
//! Rust (no raw pointer casts).
//!
//! Bit-level filters only operate on a whole number of 8-element groups
//! (`size % 8 == 0`); the trailing remainder bytes are copied
//! through unshuffled by the caller in [`super::apply_forward`]/
//! [`super::apply_inverse`].

#[inline]
fn trans_bit_8x8(x: &mut u64) {
    let mut t: u64;
    t = (*x ^ (*x >> 7)) & 0x00AA_00AA_00AA_00AA;
    *x ^= t ^ (t << 7);
    t = (*x ^ (*x >> 14)) & 0x0000_CCCC_0000_CCCC;
    *x ^= t ^ (t << 14);
    t = (*x ^ (*x >> 28)) & 0x0000_0000_F0F0_F0F0;
    *x ^= t ^ (t << 28);
}

fn trans_byte_elem(input: &[u8], output: &mut [u8], size: usize, elem_size: usize) {
    for jj in 0..elem_size {
        for ii in 0..size {
            output[jj * size + ii] = input[ii * elem_size + jj];
        }
    }
}

fn trans_byte_bitrow(input: &[u8], output: &mut [u8], size: usize, elem_size: usize) {
    let nbyte_row = size / 8;
    for jj in 0..elem_size {
        for ii in 0..nbyte_row {
            for kk in 0..8 {
                output[ii * 8 * elem_size + jj * 8 + kk] = input[(jj * 8 + kk) * nbyte_row + ii];
            }
        }
    }
}

fn trans_bit_byte(input: &[u8], output: &mut [u8], size: usize, elem_size: usize) {
    let nbyte = elem_size * size;
    let nbyte_bitrow = nbyte / 8;
    for ii in 0..nbyte_bitrow {
        let mut x = u64::from_ne_bytes(input[ii * 8..ii * 8 + 8].try_into().unwrap());
        trans_bit_8x8(&mut x);
        for kk in 0..8 {
            output[kk * nbyte_bitrow + ii] = (x & 0xFF) as u8;
            x >>= 8;
        }
    }
}

fn shuffle_bit_eightelem(input: &[u8], output: &mut [u8], size: usize, elem_size: usize) {
    let nbyte = elem_size * size;
    let mut jj = 0;
    while jj < 8 * elem_size {
        let mut ii = 0;
        while ii + 8 * elem_size - 1 < nbyte {
            let mut x = u64::from_ne_bytes(input[ii + jj..ii + jj + 8].try_into().unwrap());
            trans_bit_8x8(&mut x);
            for kk in 0..8 {
                let out_index = ii + jj / 8 + kk * elem_size;
                output[out_index] = (x & 0xFF) as u8;
                x >>= 8;
            }
            ii += 8 * elem_size;
        }
        jj += 8;
    }
}

/// Bit-shuffle `size` elements of `elem_size` bytes each. `size` must be a
/// multiple of 8.
pub fn bitshuffle(elem_size: usize, size: usize, input: &[u8], output: &mut [u8]) {
    debug_assert_eq!(size % 8, 0);
    let total = size * elem_size;
    let mut tmp = vec![0u8; total];
    trans_byte_elem(input, &mut tmp, size, elem_size);
    let mut tmp2 = vec![0u8; total];
    trans_bit_byte(&tmp, &mut tmp2, size, elem_size);
    trans_byte_bitrow_eight(&tmp2, output, size, elem_size);
}

/// Helper mirroring `bshuf_trans_bitrow_eight`: a transpose of 8-row groups.
fn trans_byte_bitrow_eight(input: &[u8], output: &mut [u8], size: usize, elem_size: usize) {
    let nbyte_bitrow = size / 8;
    for ii in 0..8 {
        for jj in 0..nbyte_bitrow {
            let out_start = (jj * 8 + ii) * elem_size;
            let in_start = (ii * nbyte_bitrow + jj) * elem_size;
            output[out_start..out_start + elem_size]
                .copy_from_slice(&input[in_start..in_start + elem_size]);
        }
    }
}

/// Inverse of [`bitshuffle`].
pub fn bitunshuffle(elem_size: usize, size: usize, input: &[u8], output: &mut [u8]) {
    debug_assert_eq!(size % 8, 0);
    let total = size * elem_size;
    let mut tmp = vec![0u8; total];
    trans_byte_bitrow(input, &mut tmp, size, elem_size);
    shuffle_bit_eightelem(&tmp, output, size, elem_size);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_multiple_of_eight() {
        let typesize = 4;
        let nelems = 64; // multiple of 8
        let mut src = Vec::with_capacity(nelems * typesize);
        for i in 0..nelems as i32 {
            src.extend_from_slice(&(i * 7 % 251).to_le_bytes());
        }
        let mut shuffled = vec![0u8; src.len()];
        bitshuffle(typesize, nelems, &src, &mut shuffled);
        let mut back = vec![0u8; src.len()];
        bitunshuffle(typesize, nelems, &shuffled, &mut back);
        assert_eq!(src, back);
    }
}

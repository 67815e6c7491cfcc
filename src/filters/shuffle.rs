//! Byte-shuffle: reorders a block so that byte `j` of every element is
//! grouped contiguously. Ported from the generic (non-SIMD) reference
//! routine; SIMD dispatch is out of scope.

/// Shuffle `src` into `dest`, grouping byte-lane `j` of every `typesize`-sized
/// element together. `block.len()` need not be a multiple of `typesize`; the
/// remainder is copied through unshuffled.
pub fn shuffle(typesize: usize, block: &[u8], dest: &mut [u8]) {
    debug_assert_eq!(block.len(), dest.len());
    let nelems = block.len() / typesize;
    let rem_start = nelems * typesize;

    for j in 0..typesize {
        for i in 0..nelems {
            dest[j * nelems + i] = block[i * typesize + j];
        }
    }
    dest[rem_start..].copy_from_slice(&block[rem_start..]);
}

/// Inverse of [`shuffle`].
pub fn unshuffle(typesize: usize, block: &[u8], dest: &mut [u8]) {
    debug_assert_eq!(block.len(), dest.len());
    let nelems = block.len() / typesize;
    let rem_start = nelems * typesize;

    for i in 0..nelems {
        for j in 0..typesize {
            dest[i * typesize + j] = block[j * nelems + i];
        }
    }
    dest[rem_start..].copy_from_slice(&block[rem_start..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_arange_i32() {
        let n = 1000;
        let mut src = Vec::with_capacity(n * 4);
        for i in 0..n as i32 {
            src.extend_from_slice(&i.to_le_bytes());
        }
        let mut shuffled = vec![0u8; src.len()];
        shuffle(4, &src, &mut shuffled);
        let mut back = vec![0u8; src.len()];
        unshuffle(4, &shuffled, &mut back);
        assert_eq!(src, back);
    }

    #[test]
    fn handles_non_multiple_of_typesize() {
        let src: Vec<u8> = (0..37u8).collect();
        let mut shuffled = vec![0u8; src.len()];
        shuffle(4, &src, &mut shuffled);
        let mut back = vec![0u8; src.len()];
        unshuffle(4, &shuffled, &mut back);
        assert_eq!(src, back);
    }
}

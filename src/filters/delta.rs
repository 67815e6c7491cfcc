//! Delta filter: replaces each element with its lane-wise difference from
//! the previous element, byte lane by byte lane. This keeps blocks
//! independently encodable/decodable (no cross-block reference state is
//! needed), which matters because the block pipeline dispatches blocks to
//! the worker pool in arbitrary order. The exact delta reference scheme is
//! an implementation detail of the filter, so this version favors
//! parallel-safety over matching any one upstream implementation
//! byte-for-byte.

/// Delta-encode `block` (typesize-wide elements) into `dest`.
pub fn encode(typesize: usize, block: &[u8], dest: &mut [u8]) {
    debug_assert_eq!(block.len(), dest.len());
    if block.is_empty() {
        return;
    }
    dest[..typesize].copy_from_slice(&block[..typesize]);
    let nelems = block.len() / typesize;
    for i in 1..nelems {
        for j in 0..typesize {
            let cur = block[i * typesize + j];
            let prev = block[(i - 1) * typesize + j];
            dest[i * typesize + j] = cur.wrapping_sub(prev);
        }
    }
    // Leftover bytes that don't form a whole element pass through untouched.
    let rem_start = nelems * typesize;
    dest[rem_start..].copy_from_slice(&block[rem_start..]);
}

/// Inverse of [`encode`].
pub fn decode(typesize: usize, block: &[u8], dest: &mut [u8]) {
    debug_assert_eq!(block.len(), dest.len());
    if block.is_empty() {
        return;
    }
    dest[..typesize].copy_from_slice(&block[..typesize]);
    let nelems = block.len() / typesize;
    for i in 1..nelems {
        for j in 0..typesize {
            let delta = block[i * typesize + j];
            let prev = dest[(i - 1) * typesize + j];
            dest[i * typesize + j] = delta.wrapping_add(prev);
        }
    }
    let rem_start = nelems * typesize;
    dest[rem_start..].copy_from_slice(&block[rem_start..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_arange() {
        let n = 500;
        let mut src = Vec::with_capacity(n * 4);
        for i in 0..n as i32 {
            src.extend_from_slice(&i.to_le_bytes());
        }
        let mut enc = vec![0u8; src.len()];
        encode(4, &src, &mut enc);
        let mut dec = vec![0u8; src.len()];
        decode(4, &enc, &mut dec);
        assert_eq!(src, dec);
    }
}

//! WebSocket frame masking utilities
//!
//! XOR with a repeating 4-byte key. Masking and unmasking are the same
//! operation. The offset variants let a payload be unmasked piecewise as it
//! arrives from the channel in short reads.

/// Apply a WebSocket mask in place
///
/// Processes 8 bytes per step with a doubled key, then finishes the tail
/// byte by byte.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ mask_u64;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Apply mask starting at `offset` bytes into the masked payload
///
/// Equivalent to `data[i] ^= mask[(offset + i) % 4]`.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: usize) {
    let offset = offset & 3;
    if offset == 0 {
        apply_mask(data, mask);
        return;
    }

    let rotated_mask = [
        mask[offset],
        mask[(offset + 1) & 3],
        mask[(offset + 2) & 3],
        mask[(offset + 3) & 3],
    ];
    apply_mask(data, rotated_mask);
}

/// Generate a random mask for outgoing frames
///
/// Uses `fastrand`; masking keys only need to be unpredictable to
/// intermediaries, not cryptographically strong.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    fastrand::u32(..).to_ne_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_mask_basic() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        let original = b"Hello, WebSocket!".to_vec();
        let mut data = original.clone();

        apply_mask(&mut data, mask);
        assert_ne!(data, original);

        // XOR is self-inverse
        apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn test_apply_mask_matches_definition() {
        let mask = [0xde, 0xad, 0xbe, 0xef];
        for len in 0..=37 {
            let original: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let mut data = original.clone();
            apply_mask(&mut data, mask);

            for (i, byte) in data.iter().enumerate() {
                assert_eq!(*byte, original[i] ^ mask[i % 4], "len {len}, index {i}");
            }
        }
    }

    #[test]
    fn test_apply_mask_empty() {
        let mut data: Vec<u8> = vec![];
        apply_mask(&mut data, [1, 2, 3, 4]);
        assert!(data.is_empty());
    }

    #[test]
    fn test_apply_mask_offset() {
        let mask = [0x01, 0x02, 0x03, 0x04];
        let mut data = vec![0x00; 8];

        apply_mask_offset(&mut data, mask, 1);

        assert_eq!(data, vec![0x02, 0x03, 0x04, 0x01, 0x02, 0x03, 0x04, 0x01]);
    }

    #[test]
    fn test_piecewise_unmask_equals_whole() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        let original: Vec<u8> = (0..100u8).collect();

        let mut whole = original.clone();
        apply_mask(&mut whole, mask);

        let mut pieces = original.clone();
        let mut pos = 0;
        for step in [1, 3, 5, 7, 11, 13, 17, 43] {
            let end = (pos + step).min(pieces.len());
            apply_mask_offset(&mut pieces[pos..end], mask, pos);
            pos = end;
        }
        assert_eq!(pos, original.len());
        assert_eq!(pieces, whole);
    }

    #[test]
    fn test_generate_mask_varies() {
        let masks: Vec<[u8; 4]> = (0..16).map(|_| generate_mask()).collect();
        assert!(masks.iter().any(|m| *m != masks[0]));
    }
}

//! Byte/bit primitives shared by the rest of the codec: Pascal strings,
//! padding arithmetic, block chunking, and bitmap construction.
//!
//! Nothing here is HFS-specific; it is the small toolbox the higher-level
//! modules (`btree`, `catalog`, `volume`) build on.

/// Round `size` up to the next multiple of `factor`.
pub fn pad_up(size: usize, factor: usize) -> usize {
    size.div_ceil(factor) * factor
}

/// Pack `bytes` as a 1-byte-length-prefixed Pascal string, zero-padded (or
/// space-padded, via `fill`) to exactly `field_width` bytes including the
/// length byte. `bytes` must fit in `field_width - 1`.
pub fn pack_pstring_fixed(bytes: &[u8], field_width: usize, fill: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(field_width);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    out.resize(field_width, fill);
    out
}

/// Read a fixed-width, length-prefixed Pascal string field back to its
/// content bytes (the padding is discarded).
pub fn parse_pstring_fixed(field: &[u8]) -> &[u8] {
    let len = field[0] as usize;
    &field[1..1 + len]
}

/// Split `data` into `block_size`-byte chunks, zero-padding the final chunk.
/// An empty input yields no chunks.
pub fn chunk_into_blocks(data: &[u8], block_size: usize) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return Vec::new();
    }
    data.chunks(block_size)
        .map(|chunk| {
            let mut block = chunk.to_vec();
            block.resize(block_size, 0);
            block
        })
        .collect()
}

/// Build a bit-vector of `total_bits` bits (packed MSB-first into
/// `total_bits.div_ceil(8)` bytes) with the first `used` bits set.
pub fn bitmap(total_bits: usize, used: usize) -> Vec<u8> {
    let mut buf = vec![0u8; total_bits.div_ceil(8)];
    for i in 0..used {
        buf[i / 8] |= 0x80 >> (i % 8);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_up_rounds_to_multiple() {
        assert_eq!(pad_up(0, 512), 0);
        assert_eq!(pad_up(1, 512), 512);
        assert_eq!(pad_up(512, 512), 512);
        assert_eq!(pad_up(513, 512), 1024);
    }

    #[test]
    fn pstring_field_round_trips() {
        let field = pack_pstring_fixed(b"Untitled", 28, 0);
        assert_eq!(field.len(), 28);
        assert_eq!(parse_pstring_fixed(&field), b"Untitled");
    }

    #[test]
    fn chunking_pads_final_block() {
        let chunks = chunk_into_blocks(b"abcde", 4);
        assert_eq!(chunks, vec![b"abcd".to_vec(), vec![b'e', 0, 0, 0]]);
        assert!(chunk_into_blocks(&[], 4).is_empty());
    }

    #[test]
    fn bitmap_marks_leading_bits() {
        let bm = bitmap(16, 10);
        assert_eq!(bm, vec![0xFF, 0xC0]);
    }
}

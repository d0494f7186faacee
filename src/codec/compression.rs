//! DEFLATE compression stage, via `flate2`.

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

use crate::error::{CacheError, CacheResult};

/// Compress `data` at the given level (1-9). Caller is responsible for
/// deciding whether compression is worthwhile (the codec gates this on
/// a minimum input size).
pub fn compress(data: &[u8], level: u32) -> CacheResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(data, Compression::new(level));
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Serialization(format!("compression failed: {e}")))?;
    Ok(out)
}

/// Decompress data previously produced by [`compress`].
pub fn decompress(data: &[u8]) -> CacheResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Serialization(format!("decompression failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_at_every_level() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        for level in [1u32, 5, 9] {
            let compressed = compress(&data, level).unwrap();
            let restored = decompress(&compressed).unwrap();
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn rejects_garbage_input() {
        assert!(decompress(b"not compressed data").is_err());
    }
}

//! zlib transforms over IDAT payloads and the chunk CRC.

use std::io::{Read, Write};

use flate2::Crc;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

pub use flate2::Compression;

use super::PngError;

/// Upper bound on deflate's expansion ratio.
const MAX_INFLATE_RATIO: usize = 1032;

/// Inflate a zlib stream that must decode to exactly `expected_len` bytes.
///
/// `expected_len` comes from an untrusted header, so the initial allocation
/// is capped by what `compressed` could possibly expand to.
pub fn inflate(compressed: &[u8], expected_len: usize) -> Result<Vec<u8>, PngError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let capacity = expected_len.min(compressed.len().saturating_mul(MAX_INFLATE_RATIO));
    let mut raw = Vec::with_capacity(capacity);
    // Read one byte past the expected size so oversized streams are caught.
    decoder
        .by_ref()
        .take((expected_len as u64).saturating_add(1))
        .read_to_end(&mut raw)
        .map_err(PngError::Inflate)?;
    if raw.len() != expected_len {
        return Err(PngError::RawLength {
            expected: expected_len,
            actual: raw.len(),
        });
    }
    Ok(raw)
}

pub fn deflate(raw: &[u8], level: Compression) -> Result<Vec<u8>, PngError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2 + 64), level);
    encoder.write_all(raw).map_err(PngError::Deflate)?;
    encoder.finish().map_err(PngError::Deflate)
}

/// CRC-32 over a chunk's type followed by its payload.
pub fn crc32(kind: &[u8; 4], data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    crc.sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inflate_deflate_round_trip() {
        let raw: Vec<u8> = (0..4000u32).map(|i| (i * 7 % 251) as u8).collect();
        for level in [Compression::none(), Compression::fast(), Compression::best()] {
            let packed = deflate(&raw, level).unwrap();
            assert_eq!(inflate(&packed, raw.len()).unwrap(), raw);
        }
    }

    #[test]
    fn test_inflate_empty_stream() {
        let packed = deflate(&[], Compression::default()).unwrap();
        assert!(inflate(&packed, 0).unwrap().is_empty());
    }

    #[test]
    fn test_inflate_size_mismatch() {
        let packed = deflate(&[1, 2, 3, 4, 5], Compression::default()).unwrap();
        assert!(matches!(
            inflate(&packed, 8),
            Err(PngError::RawLength {
                expected: 8,
                actual: 5
            })
        ));
        assert!(matches!(
            inflate(&packed, 3),
            Err(PngError::RawLength {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_inflate_huge_claimed_size() {
        let packed = deflate(&[0; 16], Compression::default()).unwrap();
        let claimed = usize::MAX / 2;
        match inflate(&packed, claimed) {
            Err(PngError::RawLength { expected, actual }) => {
                assert_eq!(expected, claimed);
                assert_eq!(actual, 16);
            }
            other => panic!("unexpected result {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_inflate_garbage() {
        assert!(matches!(
            inflate(b"definitely not zlib", 10),
            Err(PngError::Inflate(_))
        ));
    }

    #[test]
    fn test_crc_matches_known_iend() {
        // Every PNG ends with IEND whose CRC is AE 42 60 82.
        assert_eq!(crc32(b"IEND", &[]), 0xAE42_6082);
    }
}

//! zlib-framed compression for git-style object storage.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

/// deflate strategy, mirrored from zlib's own constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Default,
    Filtered,
    HuffmanOnly,
    Rle,
    Fixed,
}

/// compress `data` at the given level (0-9) and memory level (1-9).
///
/// strategy is accepted for interface compatibility with the original zlib
/// knobs; `flate2` only exposes level, so finer strategies degrade to the
/// nearest level-driven behavior.
pub fn compress(data: &[u8], level: i32, _strategy: Strategy, mem_level: i32) -> Result<Vec<u8>> {
    if !(0..=9).contains(&level) {
        return Err(Error::InvalidLevel(level));
    }
    if !(1..=9).contains(&mem_level) {
        return Err(Error::InvalidMemLevel(mem_level));
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level as u32));
    encoder
        .write_all(data)
        .map_err(|e| Error::CompressionFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::CompressionFailed(e.to_string()))
}

/// decompress a zlib stream, validating the header before handing off to `flate2`.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 6 {
        return Err(Error::TruncatedData);
    }

    validate_zlib_header(data)?;

    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(classify_decompress_error)?;
    Ok(out)
}

/// `flate2` reports every failure as a plain `io::Error`; sort its message
/// back into the distinct failure modes callers branch on rather than
/// collapsing them all into [`Error::DecompressionFailed`].
fn classify_decompress_error(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        return Error::TruncatedData;
    }
    let msg = e.to_string();
    if msg.contains("checksum") {
        return Error::InvalidChecksum;
    }
    if msg.contains("corrupt") || msg.contains("invalid stored block") || msg.contains("invalid distance") || msg.contains("invalid literal") {
        return Error::CorruptedData(msg);
    }
    Error::DecompressionFailed(msg)
}

/// does `data` begin with a well-formed zlib header (CMF/FLG check bits).
pub fn is_zlib_compressed(data: &[u8]) -> bool {
    data.len() >= 2 && validate_zlib_header(&data[..2]).is_ok()
}

fn validate_zlib_header(data: &[u8]) -> Result<()> {
    let cmf = data[0];
    let flg = data[1];

    if cmf & 0x0f != 8 {
        return Err(Error::InvalidZlibHeader);
    }

    let header = (cmf as u16) * 256 + flg as u16;
    if header % 31 != 0 {
        return Err(Error::InvalidChecksum);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let data = b"hello world, this is compressible text text text text";
        let compressed = compress(data, 6, Strategy::Default, 8).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_roundtrip_empty() {
        let compressed = compress(b"", 6, Strategy::Default, 8).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, b"");
    }

    #[test]
    fn test_level_zero_still_framed() {
        let data = b"no compression requested but still zlib-framed";
        let compressed = compress(data, 0, Strategy::Default, 8).unwrap();
        assert!(is_zlib_compressed(&compressed));
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_invalid_level_rejected() {
        assert!(matches!(
            compress(b"x", 10, Strategy::Default, 8),
            Err(Error::InvalidLevel(10))
        ));
        assert!(matches!(
            compress(b"x", -1, Strategy::Default, 8),
            Err(Error::InvalidLevel(-1))
        ));
    }

    #[test]
    fn test_invalid_mem_level_rejected() {
        assert!(matches!(
            compress(b"x", 6, Strategy::Default, 0),
            Err(Error::InvalidMemLevel(0))
        ));
        assert!(matches!(
            compress(b"x", 6, Strategy::Default, 10),
            Err(Error::InvalidMemLevel(10))
        ));
    }

    #[test]
    fn test_truncated_data_rejected() {
        assert!(matches!(decompress(&[1, 2, 3]), Err(Error::TruncatedData)));
    }

    #[test]
    fn test_bad_header_rejected() {
        let bad = vec![0xff, 0xff, 0, 0, 0, 0];
        assert!(matches!(decompress(&bad), Err(Error::InvalidZlibHeader)));
    }

    #[test]
    fn test_corrupted_body_after_valid_header_is_not_generic_failure() {
        let mut compressed = compress(b"some text worth compressing", 6, Strategy::Default, 8).unwrap();
        let last = compressed.len() - 1;
        compressed[last] ^= 0xff;
        match decompress(&compressed) {
            Err(Error::CorruptedData(_)) | Err(Error::InvalidChecksum) | Err(Error::TruncatedData) => {}
            other => panic!("expected a classified decompression error, got {other:?}"),
        }
    }

    #[test]
    fn test_is_zlib_compressed() {
        let compressed = compress(b"content", 6, Strategy::Default, 8).unwrap();
        assert!(is_zlib_compressed(&compressed));
        assert!(!is_zlib_compressed(b"plain text, not zlib"));
        assert!(!is_zlib_compressed(&[1]));
    }
}

//! optional page compression interposed between the page layer and the cold
//! bucket.

use crate::error::{Error, Result};

/// codecs a page may be compressed with before landing in the cold bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Zstd,
    Brotli,
    Gzip,
}

impl Codec {
    pub fn as_str(self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Zstd => "zstd",
            Codec::Brotli => "brotli",
            Codec::Gzip => "gzip",
        }
    }
}

/// persisted alongside a compressed page so decompression is deterministic.
#[derive(Debug, Clone)]
pub struct PageCompressionMeta {
    pub codec: Codec,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl PageCompressionMeta {
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.compressed_size as f64 / self.original_size as f64
        }
    }
}

/// MIME types treated as already compressed; compressing them again is wasted
/// CPU for essentially no size win.
const ALREADY_COMPRESSED_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "video/mp4",
    "video/webm",
    "audio/mpeg",
    "audio/ogg",
    "application/zip",
    "application/gzip",
    "application/x-7z-compressed",
    "application/zstd",
];

/// running totals for statistics.
#[derive(Debug, Clone, Default)]
pub struct CompressionStats {
    pub pages_compressed: u64,
    pub pages_skipped: u64,
    pub total_original_bytes: u64,
    pub total_compressed_bytes: u64,
}

impl CompressionStats {
    pub fn average_ratio(&self) -> f64 {
        if self.total_original_bytes == 0 {
            1.0
        } else {
            self.total_compressed_bytes as f64 / self.total_original_bytes as f64
        }
    }
}

/// selects a codec per write, skipping small or already-compressed payloads,
/// and tracks aggregate ratio statistics.
pub struct PageCompressor {
    codec: Codec,
    min_size: u64,
    stats: std::sync::Mutex<CompressionStats>,
}

impl PageCompressor {
    pub fn new(codec: Codec, min_size: u64) -> Self {
        PageCompressor {
            codec,
            min_size,
            stats: std::sync::Mutex::new(CompressionStats::default()),
        }
    }

    fn should_skip(&self, size: u64, mime: Option<&str>) -> bool {
        if self.codec == Codec::None {
            return true;
        }
        if size < self.min_size {
            return true;
        }
        if let Some(mime) = mime {
            if ALREADY_COMPRESSED_MIMES.contains(&mime) {
                return true;
            }
        }
        false
    }

    /// compress `data`, or pass it through unchanged when skip rules apply.
    pub fn compress(&self, data: &[u8], mime: Option<&str>) -> Result<(Vec<u8>, PageCompressionMeta)> {
        let original_size = data.len() as u64;

        if self.should_skip(original_size, mime) {
            self.stats.lock().unwrap().pages_skipped += 1;
            return Ok((
                data.to_vec(),
                PageCompressionMeta {
                    codec: Codec::None,
                    original_size,
                    compressed_size: original_size,
                },
            ));
        }

        let compressed = encode(self.codec, data)?;
        let meta = PageCompressionMeta {
            codec: self.codec,
            original_size,
            compressed_size: compressed.len() as u64,
        };

        let mut stats = self.stats.lock().unwrap();
        stats.pages_compressed += 1;
        stats.total_original_bytes += meta.original_size;
        stats.total_compressed_bytes += meta.compressed_size;

        Ok((compressed, meta))
    }

    pub fn decompress(&self, data: &[u8], meta: &PageCompressionMeta) -> Result<Vec<u8>> {
        decode(meta.codec, data)
    }

    pub fn stats(&self) -> CompressionStats {
        self.stats.lock().unwrap().clone()
    }
}

fn encode(codec: Codec, data: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(data.to_vec()),
        Codec::Zstd => zstd::encode_all(data, 0).map_err(|e| Error::CompressionFailed(e.to_string())),
        Codec::Gzip => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| Error::CompressionFailed(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| Error::CompressionFailed(e.to_string()))
        }
        Codec::Brotli => {
            let mut out = Vec::new();
            let params = brotli::enc::BrotliEncoderParams::default();
            brotli::BrotliCompress(&mut &data[..], &mut out, &params)
                .map_err(|e| Error::CompressionFailed(e.to_string()))?;
            Ok(out)
        }
    }
}

fn decode(codec: Codec, data: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(data.to_vec()),
        Codec::Zstd => zstd::decode_all(data).map_err(|e| Error::DecompressionFailed(e.to_string())),
        Codec::Gzip => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
        Codec::Brotli => {
            let mut out = Vec::new();
            brotli::BrotliDecompress(&mut &data[..], &mut out)
                .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
    }
}

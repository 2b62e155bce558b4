//! Decompression codecs, chosen from the file extension.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Trait for codecs that wrap an opened input file into a line-readable stream.
pub trait CompressionCodec: Send + Sync {
    /// Wrap `file` in a streaming decoder.
    fn create_reader(&self, file: File) -> io::Result<Box<dyn BufRead + Send>>;

    /// Human-readable name of this codec (for logging/debugging).
    fn name(&self) -> &'static str;
}

/// Gzip codec using flate2. Handles multi-member archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn create_reader(&self, file: File) -> io::Result<Box<dyn BufRead + Send>> {
        Ok(Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(file))))
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

/// Zstandard codec using zstd.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

impl CompressionCodec for ZstdCodec {
    fn create_reader(&self, file: File) -> io::Result<Box<dyn BufRead + Send>> {
        let decoder = zstd::stream::Decoder::new(file)?;
        Ok(Box::new(BufReader::new(decoder)))
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

/// Plain text, no decompression.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCodec;

impl CompressionCodec for NoopCodec {
    fn create_reader(&self, file: File) -> io::Result<Box<dyn BufRead + Send>> {
        Ok(Box::new(BufReader::new(file)))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Pick a codec from the extension: `.gz`, `.zst`/`.zstd`, anything else is plain.
pub fn codec_for_path(path: &Path) -> &'static dyn CompressionCodec {
    match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => &GzipCodec,
        Some("zst") | Some("zstd") => &ZstdCodec,
        _ => &NoopCodec,
    }
}

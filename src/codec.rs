//! Compression codec registry, keyed by TOC method name.
//!
//! # Identity rules
//! The TOC stores an ordered table of method names (fixed-width ANSI on
//! disk); compression block entries refer to it by index.  Index 0 is always
//! the implicit "None" sentinel: such blocks are stored verbatim and never
//! reach a codec.  A reader that encounters a method name it cannot supply
//! MUST fail the read; there is no fallback codec and no negotiation.
//!
//! Method names are matched case-insensitively so that a TOC written with
//! `"ZSTD"` decodes with the same codec as `"Zstd"`.

use std::io::{Read, Write};

use thiserror::Error;

/// In-memory spelling of the index-0 passthrough sentinel.
pub const METHOD_NONE: &str = "None";

/// Default compression level passed to level-aware codecs.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Compression(String),
    #[error("decompression error: {0}")]
    Decompression(String),
    /// Emitted when a TOC names a codec this build cannot supply.
    /// Decoding MUST NOT continue.
    #[error("compression method '{name}' is not available in this build")]
    UnavailableCodec { name: String },
    #[error("decompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ───────────────────────────────────────────

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "Zstd"
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "LZ4"
    }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(data))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

pub struct BrotliCodec;
impl Codec for BrotliCodec {
    fn name(&self) -> &'static str {
        "Brotli"
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let quality = level.clamp(0, 11) as u32;
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, 4096, quality, 22);
            w.write_all(data)
                .map_err(|e| CodecError::Compression(e.to_string()))?;
        }
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        brotli::Decompressor::new(data, 4096)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn name(&self) -> &'static str {
        "LZMA"
    }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut std::io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_decompress(&mut std::io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a TOC method name to a built-in codec.
///
/// Returns `Err(CodecError::UnavailableCodec)` for unknown names.  The
/// caller MUST NOT fall back to any other codec.  The "None" sentinel is not
/// a codec and is rejected here; callers handle method index 0 themselves.
pub fn get_codec(name: &str) -> Result<Box<dyn Codec>, CodecError> {
    match name.to_ascii_lowercase().as_str() {
        "zstd" => Ok(Box::new(ZstdCodec)),
        "lz4" => Ok(Box::new(Lz4Codec)),
        "brotli" => Ok(Box::new(BrotliCodec)),
        "lzma" => Ok(Box::new(LzmaCodec)),
        _ => Err(CodecError::UnavailableCodec {
            name: name.to_string(),
        }),
    }
}

/// True for names that denote the stored-verbatim sentinel.
pub fn is_method_none(name: &str) -> bool {
    name.is_empty() || name.eq_ignore_ascii_case(METHOD_NONE)
}

/// Decompress a block payload into a caller-supplied buffer whose length is
/// the declared uncompressed size.  A codec that produces any other length
/// corrupts the output assembly, so it is rejected here.
pub fn decompress_into(name: &str, payload: &[u8], out: &mut [u8]) -> Result<(), CodecError> {
    let codec = get_codec(name)?;
    let decompressed = codec.decompress(payload)?;
    if decompressed.len() != out.len() {
        return Err(CodecError::SizeMismatch {
            expected: out.len(),
            actual: decompressed.len(),
        });
    }
    out.copy_from_slice(&decompressed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_codecs() {
        let data: Vec<u8> = (0u8..=255).cycle().take(16 * 1024).collect();
        for name in ["Zstd", "LZ4", "Brotli", "LZMA"] {
            let codec = get_codec(name).unwrap();
            let compressed = codec.compress(&data, DEFAULT_COMPRESSION_LEVEL).unwrap();
            let decompressed = codec.decompress(&compressed).unwrap();
            assert_eq!(decompressed, data, "{name} roundtrip failed");
        }
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        assert!(get_codec("zstd").is_ok());
        assert!(get_codec("ZSTD").is_ok());
        assert!(get_codec("lz4").is_ok());
    }

    #[test]
    fn unknown_codec_fails_hard() {
        assert!(matches!(
            get_codec("Oodle"),
            Err(CodecError::UnavailableCodec { .. })
        ));
    }

    #[test]
    fn none_sentinel_detection() {
        assert!(is_method_none("None"));
        assert!(is_method_none("none"));
        assert!(is_method_none(""));
        assert!(!is_method_none("Zstd"));
    }

    #[test]
    fn decompress_into_checks_declared_size() {
        let data = vec![7u8; 4096];
        let compressed = get_codec("Zstd")
            .unwrap()
            .compress(&data, DEFAULT_COMPRESSION_LEVEL)
            .unwrap();

        let mut exact = vec![0u8; 4096];
        decompress_into("Zstd", &compressed, &mut exact).unwrap();
        assert_eq!(exact, data);

        let mut short = vec![0u8; 100];
        assert!(matches!(
            decompress_into("Zstd", &compressed, &mut short),
            Err(CodecError::SizeMismatch { .. })
        ));
    }
}

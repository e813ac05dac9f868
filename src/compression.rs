//! The compressor seam used by the wire framer. The framer only knows *that* a payload is
//! compressed; the algorithm back-ends live behind cargo features.

#[cfg(any(
    feature = "zstd-compression",
    feature = "zlib-compression",
    feature = "snappy-compression"
))]
use crate::error::Error;
use crate::error::{ErrorKind, Result};

#[cfg(feature = "zlib-compression")]
use flate2::{
    write::{ZlibDecoder, ZlibEncoder},
    Compression,
};
#[cfg(any(feature = "zlib-compression", feature = "snappy-compression"))]
use std::io::prelude::*;

/// The numeric compressor ids carried in OP_COMPRESSED frames.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub(crate) enum CompressorId {
    Noop = 0,
    Snappy = 1,
    Zlib = 2,
    Zstd = 3,
}

impl CompressorId {
    pub(crate) fn from_u8(id: u8) -> Result<Self> {
        match id {
            0 => Ok(CompressorId::Noop),
            1 => Ok(CompressorId::Snappy),
            2 => Ok(CompressorId::Zlib),
            3 => Ok(CompressorId::Zstd),
            other => Err(ErrorKind::InvalidResponse {
                message: format!("Invalid wire protocol compressor id: {}", other),
            }
            .into()),
        }
    }
}

/// A compressor negotiated during the handshake and applied to eligible outgoing commands.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Compressor {
    /// Zstd compression at the given level.
    #[cfg(feature = "zstd-compression")]
    Zstd {
        /// The compression level; `None` selects the zstd default.
        level: Option<i32>,
    },
    /// Zlib compression at the given level.
    #[cfg(feature = "zlib-compression")]
    Zlib {
        /// The compression level; `None` selects the zlib default.
        level: Option<u32>,
    },
    /// Snappy compression.
    #[cfg(feature = "snappy-compression")]
    Snappy,
}

impl Compressor {
    /// The name the handshake advertises for this compressor.
    pub(crate) fn name(&self) -> &'static str {
        match *self {
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd { .. } => "zstd",
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { .. } => "zlib",
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => "snappy",
        }
    }

    /// Parse a compressor name from the server's `compression` list.
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            #[cfg(feature = "zstd-compression")]
            "zstd" => Some(Compressor::Zstd { level: None }),
            #[cfg(feature = "zlib-compression")]
            "zlib" => Some(Compressor::Zlib { level: None }),
            #[cfg(feature = "snappy-compression")]
            "snappy" => Some(Compressor::Snappy),
            _ => None,
        }
    }

    pub(crate) fn id(&self) -> CompressorId {
        match *self {
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd { .. } => CompressorId::Zstd,
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { .. } => CompressorId::Zlib,
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => CompressorId::Snappy,
        }
    }

    /// Compress a full message body.
    pub(crate) fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match *self {
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd { level } => {
                zstd::encode_all(bytes, level.unwrap_or(zstd::DEFAULT_COMPRESSION_LEVEL))
                    .map_err(|e| {
                        Error::internal(format!("an error occurred during zstd compression: {}", e))
                    })
            }
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { level } => {
                let level = level
                    .map(Compression::new)
                    .unwrap_or_else(Compression::default);
                let mut encoder = ZlibEncoder::new(Vec::new(), level);
                encoder.write_all(bytes).map_err(|e| {
                    Error::internal(format!("an error occurred during zlib compression: {}", e))
                })?;
                encoder.finish().map_err(|e| {
                    Error::internal(format!("an error occurred during zlib compression: {}", e))
                })
            }
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => {
                // The server expects the raw snappy format, not the frame format.
                let mut compressor = snap::raw::Encoder::new();
                compressor.compress_vec(bytes).map_err(|e| {
                    Error::internal(format!("an error occurred during snappy compression: {}", e))
                })
            }
        }
    }
}

/// Decompresses an incoming OP_COMPRESSED payload given its compressor id byte.
pub(crate) fn decompress(compressor_id: u8, source: &[u8]) -> Result<Vec<u8>> {
    match CompressorId::from_u8(compressor_id)? {
        CompressorId::Noop => Ok(source.to_vec()),
        #[cfg(feature = "zstd-compression")]
        CompressorId::Zstd => zstd::decode_all(source).map_err(|e| {
            Error::internal(format!("an error occurred during zstd decompression: {}", e))
        }),
        #[cfg(feature = "zlib-compression")]
        CompressorId::Zlib => {
            let mut decoder = ZlibDecoder::new(Vec::new());
            decoder.write_all(source).map_err(|e| {
                Error::internal(format!("an error occurred during zlib decompression: {}", e))
            })?;
            decoder.finish().map_err(|e| {
                Error::internal(format!("an error occurred during zlib decompression: {}", e))
            })
        }
        #[cfg(feature = "snappy-compression")]
        CompressorId::Snappy => {
            let mut decompressor = snap::raw::Decoder::new();
            decompressor.decompress_vec(source).map_err(|e| {
                Error::internal(format!(
                    "an error occurred during snappy decompression: {}",
                    e
                ))
            })
        }
        #[allow(unreachable_patterns)]
        other => Err(ErrorKind::InvalidResponse {
            message: format!(
                "server sent a reply compressed with {:?}, but support for it is not enabled",
                other
            ),
        }
        .into()),
    }
}

#[cfg(all(test, feature = "zlib-compression"))]
mod test {
    use super::*;

    #[test]
    fn zlib_round_trip() {
        let compressor = Compressor::Zlib { level: Some(4) };
        assert_eq!(compressor.id(), CompressorId::Zlib);
        let compressed = compressor.compress(b"foobarZLIB").unwrap();
        let original = decompress(CompressorId::Zlib as u8, &compressed).unwrap();
        assert_eq!(original, b"foobarZLIB");
    }
}

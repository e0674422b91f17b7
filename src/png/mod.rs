//! Minimal PNG container model.
//!
//! A fragment is a complete PNG with exactly three critical chunks: one IHDR,
//! one IDAT and one IEND. Ancillary chunks are tolerated on read and dropped
//! on write.

pub mod codec;
pub mod parser;

use std::io::{self, Write};
use thiserror::Error;

pub use parser::{is_png, read_header};

pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];
pub const IHDR_SIZE: usize = 13;

pub const IHDR: [u8; 4] = *b"IHDR";
pub const IDAT: [u8; 4] = *b"IDAT";
pub const IEND: [u8; 4] = *b"IEND";

/// PNG caps chunk lengths at 2^31 - 1.
pub const MAX_CHUNK_LEN: u32 = 0x7FFF_FFFF;

#[derive(Debug, Error)]
pub enum PngError {
    #[error("not a PNG: signature mismatch")]
    Signature,

    #[error("truncated while reading {0}")]
    Truncated(&'static str),

    #[error("chunk length {0} exceeds the PNG limit")]
    ChunkTooLong(u32),

    #[error("CRC mismatch in {kind} chunk: stored {stored:#010x}, computed {computed:#010x}")]
    Crc {
        kind: String,
        stored: u32,
        computed: u32,
    },

    #[error("IHDR payload is {0} bytes, expected 13")]
    HeaderSize(usize),

    #[error("expected {expected} chunk, found {found}")]
    ChunkOrder {
        expected: &'static str,
        found: String,
    },

    #[error("duplicate {0} chunk")]
    DuplicateChunk(&'static str),

    #[error("missing {0} chunk")]
    MissingChunk(&'static str),

    #[error("unexpected critical chunk {0}")]
    UnexpectedChunk(String),

    #[error("{0} trailing byte(s) after IEND")]
    TrailingData(usize),

    #[error("unsupported bit depth {bit_depth} for color type {color_type}")]
    Format { bit_depth: u8, color_type: u8 },

    #[error("interlaced images are not supported")]
    Interlaced,

    #[error("image dimensions overflow")]
    Overflow,

    #[error("incompatible fragment: {0}")]
    Mismatch(String),

    #[error("zlib stream is corrupt: {0}")]
    Inflate(#[source] io::Error),

    #[error("decoded {actual} bytes of scanlines, header implies {expected}")]
    RawLength { expected: usize, actual: usize },

    #[error("zlib encode failed: {0}")]
    Deflate(#[source] io::Error),
}

/// Decoded IHDR payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub compression: u8,
    pub filter: u8,
    pub interlace: u8,
}

impl ImageHeader {
    pub fn parse(payload: &[u8]) -> Result<Self, PngError> {
        if payload.len() != IHDR_SIZE {
            return Err(PngError::HeaderSize(payload.len()));
        }
        Ok(Self {
            width: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            height: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            bit_depth: payload[8],
            color_type: payload[9],
            compression: payload[10],
            filter: payload[11],
            interlace: payload[12],
        })
    }

    pub fn to_bytes(&self) -> [u8; IHDR_SIZE] {
        let mut out = [0u8; IHDR_SIZE];
        out[0..4].copy_from_slice(&self.width.to_be_bytes());
        out[4..8].copy_from_slice(&self.height.to_be_bytes());
        out[8] = self.bit_depth;
        out[9] = self.color_type;
        out[10] = self.compression;
        out[11] = self.filter;
        out[12] = self.interlace;
        out
    }

    /// Samples per pixel for the color type, if the bit depth is legal for it.
    pub fn channels(&self) -> Result<u32, PngError> {
        let allowed: &[u8] = match self.color_type {
            0 => &[1, 2, 4, 8, 16],
            3 => &[1, 2, 4, 8],
            2 | 4 | 6 => &[8, 16],
            _ => &[],
        };
        if !allowed.contains(&self.bit_depth) {
            return Err(PngError::Format {
                bit_depth: self.bit_depth,
                color_type: self.color_type,
            });
        }
        Ok(match self.color_type {
            0 | 3 => 1,
            4 => 2,
            2 => 3,
            _ => 4,
        })
    }

    /// Filter stride: whole bytes per pixel, at least one.
    pub fn bytes_per_pixel(&self) -> Result<usize, PngError> {
        let bits = self.channels()? * u32::from(self.bit_depth);
        Ok(bits.div_ceil(8) as usize)
    }

    /// Bytes in one scanline including its leading filter-type byte.
    pub fn scanline_len(&self) -> Result<usize, PngError> {
        let bits = u64::from(self.width) * u64::from(self.channels()?) * u64::from(self.bit_depth);
        let bytes = bits.div_ceil(8).checked_add(1).ok_or(PngError::Overflow)?;
        usize::try_from(bytes).map_err(|_| PngError::Overflow)
    }

    /// Size of the fully inflated IDAT stream.
    pub fn raw_len(&self) -> Result<usize, PngError> {
        if self.interlace != 0 {
            return Err(PngError::Interlaced);
        }
        self.scanline_len()?
            .checked_mul(self.height as usize)
            .ok_or(PngError::Overflow)
    }

    /// Fields that must agree between two fragments before they can be stacked.
    pub fn check_stackable(&self, other: &ImageHeader) -> Result<(), PngError> {
        let mismatch = |what: &str, a: u32, b: u32| {
            Err(PngError::Mismatch(format!("{} {} differs from {}", what, b, a)))
        };
        if self.width != other.width {
            return mismatch("width", self.width, other.width);
        }
        if self.bit_depth != other.bit_depth {
            return mismatch("bit depth", self.bit_depth.into(), other.bit_depth.into());
        }
        if self.color_type != other.color_type {
            return mismatch("color type", self.color_type.into(), other.color_type.into());
        }
        if self.compression != other.compression || self.filter != other.filter {
            return Err(PngError::Mismatch(
                "compression or filter method differs".to_string(),
            ));
        }
        if self.interlace != 0 || other.interlace != 0 {
            return Err(PngError::Interlaced);
        }
        Ok(())
    }
}

/// One length-prefixed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: [u8; 4],
    pub data: Vec<u8>,
    pub crc: u32,
}

impl Chunk {
    /// Build a chunk with a freshly computed CRC.
    pub fn new(kind: [u8; 4], data: Vec<u8>) -> Self {
        let crc = codec::crc32(&kind, &data);
        Self { kind, data, crc }
    }

    pub fn kind_str(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }

    /// Ancillary chunks have bit 5 set in the first type byte.
    pub fn is_ancillary(&self) -> bool {
        self.kind[0] & 0x20 != 0
    }

    pub fn encoded_len(&self) -> usize {
        12 + self.data.len()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let len = u32::try_from(self.data.len())
            .ok()
            .filter(|len| *len <= MAX_CHUNK_LEN)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "chunk too long"))?;
        w.write_all(&len.to_be_bytes())?;
        w.write_all(&self.kind)?;
        w.write_all(&self.data)?;
        w.write_all(&self.crc.to_be_bytes())
    }
}

/// A PNG reduced to its three critical chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplePng {
    pub header: ImageHeader,
    pub ihdr: Chunk,
    pub idat: Chunk,
    pub iend: Chunk,
}

impl SimplePng {
    /// Assemble a PNG from a header and an already compressed IDAT payload.
    pub fn new(header: ImageHeader, idat: Vec<u8>) -> Self {
        Self::with_trailer(header, idat, Chunk::new(IEND, Vec::new()))
    }

    pub fn with_trailer(header: ImageHeader, idat: Vec<u8>, iend: Chunk) -> Self {
        Self {
            header,
            ihdr: Chunk::new(IHDR, header.to_bytes().to_vec()),
            idat: Chunk::new(IDAT, idat),
            iend,
        }
    }

    /// Compress raw scanlines at the default level and wrap them.
    pub fn encode(header: ImageHeader, raw: &[u8]) -> Result<Self, PngError> {
        let expected = header.raw_len()?;
        if raw.len() != expected {
            return Err(PngError::RawLength {
                expected,
                actual: raw.len(),
            });
        }
        let idat = codec::deflate(raw, codec::Compression::default())?;
        Ok(Self::new(header, idat))
    }

    /// Inflate the IDAT payload into scanlines sized from this image's header.
    pub fn decode_scanlines(&self) -> Result<Vec<u8>, PngError> {
        codec::inflate(&self.idat.data, self.header.raw_len()?)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&PNG_SIGNATURE)?;
        self.ihdr.write_to(w)?;
        self.idat.write_to(w)?;
        self.iend.write_to(w)
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let len = PNG_SIGNATURE.len()
            + self.ihdr.encoded_len()
            + self.idat.encoded_len()
            + self.iend.encoded_len();
        let mut out = Vec::with_capacity(len);
        self.write_to(&mut out)?;
        Ok(out)
    }
}

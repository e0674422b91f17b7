use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::trace;

use super::codec::crc32;
use super::{
    Chunk, IDAT, IEND, IHDR, IHDR_SIZE, ImageHeader, MAX_CHUNK_LEN, PNG_SIGNATURE, PngError,
    SimplePng,
};
use crate::error::{Error, Result};

/// Signature plus one complete IHDR chunk.
const HEADER_PREFIX_LEN: usize = PNG_SIGNATURE.len() + 12 + IHDR_SIZE;

pub fn is_png(buf: &[u8]) -> bool {
    buf.len() >= PNG_SIGNATURE.len() && buf[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

/// Sequential reader over length-prefixed chunks following the signature.
pub struct ChunkReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    pub fn new(buf: &'a [u8]) -> std::result::Result<Self, PngError> {
        if buf.len() < PNG_SIGNATURE.len() {
            return Err(PngError::Truncated("signature"));
        }
        if !is_png(buf) {
            return Err(PngError::Signature);
        }
        Ok(Self {
            buf,
            pos: PNG_SIGNATURE.len(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &'static str) -> std::result::Result<&'a [u8], PngError> {
        if self.remaining() < n {
            return Err(PngError::Truncated(what));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_u32(&mut self, what: &'static str) -> std::result::Result<u32, PngError> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Next chunk with its CRC verified, or `None` at end of input.
    pub fn next_chunk(&mut self) -> std::result::Result<Option<Chunk>, PngError> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let len = self.take_u32("chunk length")?;
        if len > MAX_CHUNK_LEN {
            return Err(PngError::ChunkTooLong(len));
        }
        let mut kind = [0u8; 4];
        kind.copy_from_slice(self.take(4, "chunk type")?);
        let data = self.take(len as usize, "chunk data")?.to_vec();
        let stored = self.take_u32("chunk CRC")?;

        let computed = crc32(&kind, &data);
        if stored != computed {
            return Err(PngError::Crc {
                kind: String::from_utf8_lossy(&kind).into_owned(),
                stored,
                computed,
            });
        }
        Ok(Some(Chunk {
            kind,
            data,
            crc: stored,
        }))
    }
}

/// Read the IHDR fields of a PNG file without loading the rest of it.
pub fn read_header(path: impl AsRef<Path>) -> Result<ImageHeader> {
    let path = path.as_ref();
    let mut prefix = Vec::with_capacity(HEADER_PREFIX_LEN);
    File::open(path)?
        .take(HEADER_PREFIX_LEN as u64)
        .read_to_end(&mut prefix)?;
    parse_header(&prefix).map_err(|e| Error::png(path, e))
}

fn parse_header(buf: &[u8]) -> std::result::Result<ImageHeader, PngError> {
    let mut reader = ChunkReader::new(buf)?;
    let chunk = reader.next_chunk()?.ok_or(PngError::MissingChunk("IHDR"))?;
    if chunk.kind != IHDR {
        return Err(PngError::ChunkOrder {
            expected: "IHDR",
            found: chunk.kind_str(),
        });
    }
    ImageHeader::parse(&chunk.data)
}

impl SimplePng {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes).map_err(|e| Error::png(path, e))
    }

    /// Walk every chunk and enforce IHDR first, one IDAT, IEND last.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, PngError> {
        let mut reader = ChunkReader::new(bytes)?;

        let ihdr = reader.next_chunk()?.ok_or(PngError::MissingChunk("IHDR"))?;
        if ihdr.kind != IHDR {
            return Err(PngError::ChunkOrder {
                expected: "IHDR",
                found: ihdr.kind_str(),
            });
        }
        let header = ImageHeader::parse(&ihdr.data)?;

        let mut idat = None;
        let iend = loop {
            let chunk = reader.next_chunk()?.ok_or(PngError::MissingChunk("IEND"))?;
            match chunk.kind {
                IDAT if idat.is_some() => return Err(PngError::DuplicateChunk("IDAT")),
                IDAT => idat = Some(chunk),
                IEND => break chunk,
                IHDR => return Err(PngError::DuplicateChunk("IHDR")),
                _ if chunk.is_ancillary() => {
                    trace!(kind = %chunk.kind_str(), "skipping ancillary chunk");
                }
                _ => return Err(PngError::UnexpectedChunk(chunk.kind_str())),
            }
        };
        let idat = idat.ok_or(PngError::MissingChunk("IDAT"))?;

        if reader.remaining() > 0 {
            return Err(PngError::TrailingData(reader.remaining()));
        }

        Ok(Self {
            header,
            ihdr,
            idat,
            iend,
        })
    }
}

use crate::error::{Error, Result};

pub const INITIAL_CAPACITY: usize = 1024 * 1024;
pub const CAPACITY_INCREMENT: usize = 512 * 1024;

/// Accumulates one response: header-derived sequence number plus body bytes.
///
/// The byte after the last valid byte is always zero, so `buf.len()` is
/// `size + 1` and `buf.capacity()` never drops below that.
#[derive(Debug)]
pub struct ResponseCapture {
    buf: Vec<u8>,
    size: usize,
    capacity: usize,
    seq: Option<i64>,
    marker: String,
}

impl ResponseCapture {
    pub fn new(initial_capacity: usize, marker: &str) -> Result<Self> {
        let capacity = initial_capacity.max(1);
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| Error::CaptureAlloc {
                requested: capacity,
            })?;
        buf.push(0);
        Ok(Self {
            buf,
            size: 0,
            capacity,
            seq: None,
            marker: marker.to_string(),
        })
    }

    /// Inspect one `Name: value` header line for the sequence marker.
    pub fn header_line(&mut self, line: &str) {
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        if !name.trim().eq_ignore_ascii_case(&self.marker) {
            return;
        }
        self.seq = value.trim().parse::<i64>().ok();
    }

    /// Append a body slice, growing by at least the fixed increment when full.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let needed = self.size + bytes.len() + 1;
        if needed > self.capacity {
            let new_capacity = self.capacity + CAPACITY_INCREMENT.max(bytes.len() + 1);
            self.buf
                .try_reserve_exact(new_capacity - self.buf.len())
                .map_err(|_| Error::CaptureAlloc {
                    requested: new_capacity,
                })?;
            self.capacity = new_capacity;
        }

        self.buf.truncate(self.size);
        self.buf.extend_from_slice(bytes);
        self.size += bytes.len();
        self.buf.push(0);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Parsed sequence number, `None` until the marker header is seen.
    pub fn sequence(&self) -> Option<i64> {
        self.seq
    }

    pub fn body(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    pub fn into_body(mut self) -> Vec<u8> {
        self.buf.truncate(self.size);
        self.buf
    }
}

//! TFRecord framing.
//!
//! Each record is `len: u64 LE | masked_crc32c(len): u32 LE | data | masked_crc32c(data): u32 LE`.

use std::io::{self, Read, Write};

const MASK_DELTA: u32 = 0xa282_ead8;

/// CRC32C rotated and offset so that CRCs of data containing CRCs stay well distributed.
pub fn masked_crc32c(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Writes length-prefixed, checksummed records.
pub struct RecordWriter<W: Write> {
    inner: W,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_record(&mut self, data: &[u8]) -> io::Result<()> {
        let len = (data.len() as u64).to_le_bytes();
        self.inner.write_all(&len)?;
        self.inner.write_all(&masked_crc32c(&len).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.inner.write_all(&masked_crc32c(data).to_le_bytes())?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

/// Reads records written by [`RecordWriter`], verifying both checksums.
///
/// A record cut short at the end of the stream (a writer that has not flushed
/// yet) ends iteration instead of failing.
pub struct RecordReader<R: Read> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut len_bytes = [0u8; 8];
        let mut len_crc = [0u8; 4];
        if !read_full(&mut self.inner, &mut len_bytes)?
            || !read_full(&mut self.inner, &mut len_crc)?
        {
            return Ok(None);
        }
        if masked_crc32c(&len_bytes) != u32::from_le_bytes(len_crc) {
            return Err(corrupt("length checksum mismatch"));
        }
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut data = vec![0u8; len];
        if !read_full(&mut self.inner, &mut data)? {
            return Ok(None);
        }
        let mut footer = [0u8; 4];
        if !read_full(&mut self.inner, &mut footer)? {
            return Ok(None);
        }
        if masked_crc32c(&data) != u32::from_le_bytes(footer) {
            return Err(corrupt("data checksum mismatch"));
        }
        Ok(Some(data))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Fill `buf` completely; `Ok(false)` on a clean or partial end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn corrupt(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

use std::cmp;
use std::io::{Error, ErrorKind, Read, Seek, SeekFrom, Write};

/// Growable byte buffer with a position cursor.
///
/// Reads return short counts once the cursor hits the end. Writes overwrite
/// whatever lies under the cursor and grow the buffer when they run past the
/// end, which is what lets array frames back-patch their headers in place.
/// The cursor can only be repositioned within `[0, len]`; growth happens by
/// writing, never by seeking.
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    data: Vec<u8>,
    position: usize,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        MemoryBuffer {
            data: Vec::new(),
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) -> Result<(), Error> {
        if position > self.data.len() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "position past end of buffer",
            ));
        }
        self.position = position;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.position = 0;
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Read for MemoryBuffer {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let avail = cmp::min(buf.len(), self.data.len() - self.position);
        buf[..avail].copy_from_slice(&self.data[self.position..self.position + avail]);
        self.position += avail;
        Ok(avail)
    }
}

impl Write for MemoryBuffer {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        let overlap = cmp::min(buf.len(), self.data.len() - self.position);
        self.data[self.position..self.position + overlap].copy_from_slice(&buf[..overlap]);
        self.data.extend_from_slice(&buf[overlap..]);
        self.position += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl Seek for MemoryBuffer {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        let target = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::End(d) => self.data.len() as i128 + d as i128,
            SeekFrom::Current(d) => self.position as i128 + d as i128,
        };
        if target < 0 || target > self.data.len() as i128 {
            return Err(Error::new(ErrorKind::InvalidInput, "seek out of bounds"));
        }
        self.position = target as usize;
        Ok(self.position as u64)
    }
}

/// Read into `buf` until it is full or the reader hits EoF.
///
/// Returns `(eof, bytes_read)`; `eof` is only meaningful when the buffer was
/// not filled.
pub fn fill_buf<R: Read>(data: &mut R, buf: &mut [u8]) -> std::io::Result<(bool, usize)> {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => return Ok((true, buf_read)),
            Ok(x) => buf_read += x,
            Err(e) => return Err(e),
        };
    }
    Ok((false, buf_read))
}

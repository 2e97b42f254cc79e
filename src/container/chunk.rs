use std::io::{ErrorKind, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::buf::MemoryBuffer;
use crate::container::{ContainerError, Mode};

// An array frame is count: u32, element_size: u32
const ARRAY_FRAME_SIZE: usize = 8;

/// Fixed-size value that crosses the wire as its little-endian byte image.
pub trait Scalar: Copy + Default {
    fn read_from(buf: &mut MemoryBuffer) -> Result<Self, std::io::Error>;
    fn write_to(self, buf: &mut MemoryBuffer) -> Result<(), std::io::Error>;
}

macro_rules! scalar {
    ($t:ty, $read:ident, $write:ident) => {
        impl Scalar for $t {
            fn read_from(buf: &mut MemoryBuffer) -> Result<Self, std::io::Error> {
                buf.$read::<LittleEndian>()
            }

            fn write_to(self, buf: &mut MemoryBuffer) -> Result<(), std::io::Error> {
                buf.$write::<LittleEndian>(self)
            }
        }
    };
}

scalar!(u16, read_u16, write_u16);
scalar!(i16, read_i16, write_i16);
scalar!(u32, read_u32, write_u32);
scalar!(i32, read_i32, write_i32);
scalar!(u64, read_u64, write_u64);
scalar!(i64, read_i64, write_i64);
scalar!(f32, read_f32, write_f32);
scalar!(f64, read_f64, write_f64);

impl Scalar for u8 {
    fn read_from(buf: &mut MemoryBuffer) -> Result<Self, std::io::Error> {
        buf.read_u8()
    }

    fn write_to(self, buf: &mut MemoryBuffer) -> Result<(), std::io::Error> {
        buf.write_u8(self)
    }
}

impl Scalar for i8 {
    fn read_from(buf: &mut MemoryBuffer) -> Result<Self, std::io::Error> {
        buf.read_i8()
    }

    fn write_to(self, buf: &mut MemoryBuffer) -> Result<(), std::io::Error> {
        buf.write_i8(self)
    }
}

// One byte on the wire, nonzero reads back as true
impl Scalar for bool {
    fn read_from(buf: &mut MemoryBuffer) -> Result<Self, std::io::Error> {
        Ok(buf.read_u8()? != 0)
    }

    fn write_to(self, buf: &mut MemoryBuffer) -> Result<(), std::io::Error> {
        buf.write_u8(self as u8)
    }
}

struct FrameState {
    start_pos: usize,
    last_pos: usize,
    count: u32,
    element_size: u32,
}

/// Cursor into the uncompressed payload, scoped to one chunk codec call.
///
/// Every primitive dispatches on [`Mode`], so one codec function describes
/// the chunk in both directions. The order of primitive calls is the entire
/// schema.
pub struct ChunkStream<'a> {
    buffer: &'a mut MemoryBuffer,
    mode: Mode,
    frames: Vec<FrameState>,
}

fn map_read_err(e: std::io::Error) -> ContainerError {
    if e.kind() == ErrorKind::UnexpectedEof {
        ContainerError::UnexpectedEndOfStream
    } else {
        ContainerError::IOError(e)
    }
}

impl<'a> ChunkStream<'a> {
    pub(crate) fn new(buffer: &'a mut MemoryBuffer, mode: Mode) -> Self {
        ChunkStream {
            buffer,
            mode,
            frames: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Raw bytes: read into the slice, or write the slice out.
    pub fn read_write_bytes(&mut self, bytes: &mut [u8]) -> Result<(), ContainerError> {
        match self.mode {
            Mode::Reading => self.buffer.read_exact(bytes).map_err(map_read_err),
            Mode::Writing => {
                self.buffer.write_all(bytes)?;
                Ok(())
            }
        }
    }

    /// Little-endian scalar, both directions.
    pub fn read_write<V: Scalar>(&mut self, v: &mut V) -> Result<(), ContainerError> {
        match self.mode {
            Mode::Reading => {
                *v = V::read_from(self.buffer).map_err(map_read_err)?;
            }
            Mode::Writing => {
                v.write_to(self.buffer)?;
            }
        }
        Ok(())
    }

    /// Read-side shorthand over [`read_write`](Self::read_write) with a
    /// default value. In writing mode this writes the default, only call it
    /// from codec paths that run while reading.
    pub fn read<V: Scalar>(&mut self) -> Result<V, ContainerError> {
        let mut v = V::default();
        self.read_write(&mut v)?;
        Ok(v)
    }

    /// In-memory type `M`, stored as `S`. Narrows on write, widens on read.
    /// Both conversions must be total for every value that can occur.
    pub fn read_write_as<M, S>(&mut self, v: &mut M) -> Result<(), ContainerError>
    where
        M: Copy + Into<S> + From<S>,
        S: Scalar,
    {
        match self.mode {
            Mode::Reading => {
                *v = M::from(S::read_from(self.buffer).map_err(map_read_err)?);
            }
            Mode::Writing => {
                let stored: S = (*v).into();
                stored.write_to(self.buffer)?;
            }
        }
        Ok(())
    }

    /// NUL-terminated string. Writing truncates at the first embedded NUL,
    /// reading stops at the first zero byte.
    pub fn read_write_string(&mut self, s: &mut String) -> Result<(), ContainerError> {
        match self.mode {
            Mode::Reading => {
                *s = self.read_string()?;
            }
            Mode::Writing => {
                self.put_string(s.as_str())?;
            }
        }
        Ok(())
    }

    /// Write-only value. While reading, the same width is consumed from the
    /// stream and discarded, the cursor must advance either way.
    pub fn write<V: Scalar>(&mut self, v: V) -> Result<(), ContainerError> {
        match self.mode {
            Mode::Reading => {
                let _ = self.read::<V>()?;
                Ok(())
            }
            Mode::Writing => {
                let mut tmp = v;
                self.read_write(&mut tmp)
            }
        }
    }

    /// Write-only string, discarded while reading like [`write`](Self::write).
    pub fn write_string(&mut self, s: &str) -> Result<(), ContainerError> {
        match self.mode {
            Mode::Reading => {
                let _ = self.read_string()?;
                Ok(())
            }
            Mode::Writing => self.put_string(s),
        }
    }

    /// Length-and-stride framed vector. Reading clears `vec` and refills it
    /// from the stored count; writing frames every element.
    pub fn read_write_vector<T, F>(&mut self, vec: &mut Vec<T>, mut f: F) -> Result<(), ContainerError>
    where
        T: Default,
        F: FnMut(&mut Self, &mut T) -> Result<(), ContainerError>,
    {
        match self.mode {
            Mode::Reading => {
                let count = self.begin_array()?;
                vec.clear();
                for _ in 0..count {
                    let mut el = T::default();
                    f(self, &mut el)?;
                    self.next_element()?;
                    vec.push(el);
                }
                self.end_array()
            }
            Mode::Writing => {
                self.begin_array()?;
                for el in vec.iter_mut() {
                    f(self, el)?;
                    self.next_element()?;
                }
                self.end_array()
            }
        }
    }

    /// Framed array into a fixed set of slots.
    ///
    /// Reading default-initializes every slot first, then consumes the
    /// stored count: elements beyond `N` are skipped over (by stride when
    /// fixed, by running the codec when variable) and a short count leaves
    /// the tail slots at their defaults. Writing only frames elements whose
    /// codec returns `true`, so a codec can skip slots it considers empty.
    pub fn read_write_array<T, F, const N: usize>(
        &mut self,
        arr: &mut [T; N],
        mut f: F,
    ) -> Result<(), ContainerError>
    where
        T: Default,
        F: FnMut(&mut Self, &mut T) -> Result<bool, ContainerError>,
    {
        match self.mode {
            Mode::Reading => {
                let count = self.begin_array()?;
                for el in arr.iter_mut() {
                    *el = T::default();
                }
                for i in 0..count as usize {
                    if i < N {
                        f(self, &mut arr[i])?;
                    } else if self.current_stride() == 0 {
                        // Self-delimiting excess element, consume it to advance
                        let mut scratch = T::default();
                        f(self, &mut scratch)?;
                    }
                    self.next_element()?;
                }
                self.end_array()
            }
            Mode::Writing => {
                self.begin_array()?;
                for el in arr.iter_mut() {
                    if f(self, el)? {
                        self.next_element()?;
                    }
                }
                self.end_array()
            }
        }
    }

    fn read_string(&mut self) -> Result<String, ContainerError> {
        let mut bytes = Vec::with_capacity(64);
        loop {
            let c = self.buffer.read_u8().map_err(map_read_err)?;
            if c == 0 {
                break;
            }
            bytes.push(c);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn put_string(&mut self, s: &str) -> Result<(), ContainerError> {
        let bytes = s.as_bytes();
        let len = bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(bytes.len());

        self.buffer.write_all(&bytes[..len])?;
        self.buffer.write_all(&[0u8])?;
        Ok(())
    }

    fn current_stride(&self) -> u32 {
        self.frames.last().map(|f| f.element_size).unwrap_or(0)
    }

    fn begin_array(&mut self) -> Result<u32, ContainerError> {
        match self.mode {
            Mode::Reading => {
                let count = self.buffer.read_u32::<LittleEndian>().map_err(map_read_err)?;
                let element_size = self.buffer.read_u32::<LittleEndian>().map_err(map_read_err)?;
                self.frames.push(FrameState {
                    start_pos: 0,
                    last_pos: self.buffer.position(),
                    count,
                    element_size,
                });
                Ok(count)
            }
            Mode::Writing => {
                let start_pos = self.buffer.position();
                // Placeholder, back-patched by end_array
                self.buffer.write_u32::<LittleEndian>(0)?;
                self.buffer.write_u32::<LittleEndian>(0)?;
                self.frames.push(FrameState {
                    start_pos,
                    last_pos: self.buffer.position(),
                    count: 0,
                    element_size: 0,
                });
                Ok(0)
            }
        }
    }

    fn next_element(&mut self) -> Result<(), ContainerError> {
        let frame = self.frames.last_mut().ok_or(ContainerError::MalformedArray)?;
        match self.mode {
            Mode::Reading => {
                if frame.count == 0 {
                    return Ok(());
                }
                if frame.element_size != 0 {
                    // Fixed stride: land exactly one stride past the previous
                    // element, regardless of what the codec consumed
                    frame.last_pos += frame.element_size as usize;
                    self.buffer.set_position(frame.last_pos)?;
                }
                frame.count -= 1;
            }
            Mode::Writing => {
                let el_size = self.buffer.position() - frame.last_pos;
                if frame.count == 0 {
                    frame.element_size = el_size as u32;
                } else if frame.element_size as usize != el_size {
                    // Element sizes diverged, fall back to variable stride
                    frame.element_size = 0;
                }
                frame.count += 1;
                frame.last_pos = self.buffer.position();
            }
        }
        Ok(())
    }

    fn end_array(&mut self) -> Result<(), ContainerError> {
        let frame = self.frames.pop().ok_or(ContainerError::MalformedArray)?;
        if self.mode == Mode::Writing {
            let end_pos = self.buffer.position();
            if frame.count == 0 && end_pos != frame.start_pos + ARRAY_FRAME_SIZE {
                return Err(ContainerError::MalformedArray);
            }
            self.buffer.set_position(frame.start_pos)?;
            self.buffer.write_u32::<LittleEndian>(frame.count)?;
            self.buffer.write_u32::<LittleEndian>(frame.element_size)?;
            self.buffer.set_position(end_pos)?;
        }
        Ok(())
    }
}




#[cfg(test)]
mod test_fixed_arrays {
    use super::*;

    #[test]
    fn exact_fit_roundtrip() {
        let mut buf = MemoryBuffer::new();
        let mut arr: [u32; 3] = [10, 20, 30];
        ChunkStream::new(&mut buf, Mode::Writing)
            .read_write_array(&mut arr, |s, v| {
                s.read_write(v)?;
                Ok(true)
            })
            .unwrap();

        buf.set_position(0).unwrap();
        let mut back: [u32; 3] = [0; 3];
        ChunkStream::new(&mut buf, Mode::Reading)
            .read_write_array(&mut back, |s, v| {
                s.read_write(v)?;
                Ok(true)
            })
            .unwrap();
        assert_eq!(back, [10, 20, 30]);
    }

    #[test]
    fn stored_count_below_capacity_defaults_tail() {
        let mut buf = MemoryBuffer::new();
        let mut small: [u16; 2] = [5, 6];
        ChunkStream::new(&mut buf, Mode::Writing)
            .read_write_array(&mut small, |s, v| {
                s.read_write(v)?;
                Ok(true)
            })
            .unwrap();

        buf.set_position(0).unwrap();
        let mut grown: [u16; 4] = [9; 4];
        ChunkStream::new(&mut buf, Mode::Reading)
            .read_write_array(&mut grown, |s, v| {
                s.read_write(v)?;
                Ok(true)
            })
            .unwrap();
        assert_eq!(grown, [5, 6, 0, 0]);
    }

    #[test]
    fn stored_count_above_capacity_consumes_excess() {
        let mut buf = MemoryBuffer::new();
        let mut big: [u16; 4] = [1, 2, 3, 4];
        ChunkStream::new(&mut buf, Mode::Writing)
            .read_write_array(&mut big, |s, v| {
                s.read_write(v)?;
                Ok(true)
            })
            .unwrap();
        // Trailing sentinel to check cursor position after the frame
        buf.write_u8(0xEE).unwrap();

        buf.set_position(0).unwrap();
        let mut shrunk: [u16; 2] = [0; 2];
        {
            let mut stream = ChunkStream::new(&mut buf, Mode::Reading);
            stream
                .read_write_array(&mut shrunk, |s, v| {
                    s.read_write(v)?;
                    Ok(true)
                })
                .unwrap();
            assert_eq!(stream.read::<u8>().unwrap(), 0xEE);
        }
        assert_eq!(shrunk, [1, 2]);
    }

    #[test]
    fn excess_variable_elements_consumed_by_codec() {
        let mut buf = MemoryBuffer::new();
        let mut strings: [String; 3] = ["a".to_string(), "bc".to_string(), "def".to_string()];
        ChunkStream::new(&mut buf, Mode::Writing)
            .read_write_array(&mut strings, |s, v| {
                s.read_write_string(v)?;
                Ok(true)
            })
            .unwrap();
        buf.write_u8(0xEE).unwrap();

        buf.set_position(0).unwrap();
        let mut two: [String; 2] = Default::default();
        {
            let mut stream = ChunkStream::new(&mut buf, Mode::Reading);
            stream
                .read_write_array(&mut two, |s, v| {
                    s.read_write_string(v)?;
                    Ok(true)
                })
                .unwrap();
            assert_eq!(stream.read::<u8>().unwrap(), 0xEE);
        }
        assert_eq!(two[0], "a");
        assert_eq!(two[1], "bc");
    }

    #[test]
    fn sparse_write_skips_unframed_slots() {
        let mut buf = MemoryBuffer::new();
        let mut arr: [u8; 4] = [1, 0, 3, 0];
        ChunkStream::new(&mut buf, Mode::Writing)
            .read_write_array(&mut arr, |s, v| {
                if *v == 0 {
                    return Ok(false);
                }
                s.read_write(v)?;
                Ok(true)
            })
            .unwrap();

        // Only the two nonzero slots were framed
        assert_eq!(
            buf.as_slice(),
            &[0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 1, 3]
        );
    }
}

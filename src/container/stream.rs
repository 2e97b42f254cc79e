use std::cmp;
use std::io::{ErrorKind, Read, Write};

use log::warn;

use crate::buf::{fill_buf, MemoryBuffer};
use crate::compress;
use crate::container::chunk::ChunkStream;
use crate::container::header::{ChunkEntry, Header};
use crate::container::{
    ContainerError, Mode, COMPRESSION_DEFLATE, COMPRESSION_NONE, COPY_BLOCK_SIZE,
};
use crate::hash;

/// Caller-driven checks applied while opening a container for reading.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Expected file-kind constant; anything else is [`ContainerError::BadMagic`].
    pub magic: u32,
    /// Highest `min_version` this reader understands.
    pub supported_version: u32,
    /// Recompute the payload digest and compare against the stored one.
    pub verify_digest: bool,
}

/// One open session of the container format over an underlying byte stream.
///
/// A reading session parses the header, loads the chunk directory and
/// inflates the whole payload up front; afterwards it only serves
/// [`read_write_chunk`](Self::read_write_chunk) lookups from memory. A
/// writing session accumulates chunks into its buffer and emits everything
/// on [`finish`](Self::finish).
pub struct ContainerStream<T> {
    inner: T,
    mode: Mode,
    header: Header,
    chunks: Vec<ChunkEntry>,
    buffer: MemoryBuffer,
}

fn map_open_err(e: std::io::Error) -> ContainerError {
    if e.kind() == ErrorKind::UnexpectedEof {
        ContainerError::Truncated
    } else {
        ContainerError::IOError(e)
    }
}

impl<T: Read> ContainerStream<T> {
    /// Open an existing container for reading.
    pub fn reading(mut inner: T, options: &ReadOptions) -> Result<Self, ContainerError> {
        let header = Header::read_from(&mut inner).map_err(map_open_err)?;
        if header.magic != options.magic {
            return Err(ContainerError::BadMagic {
                expected: options.magic,
                found: header.magic,
            });
        }
        if header.min_version > options.supported_version {
            return Err(ContainerError::VersionTooNew {
                required: header.min_version,
                supported: options.supported_version,
            });
        }

        // Don't trust num_chunks for preallocation, a truncated stream fails
        // fast entry by entry instead
        let mut chunks = Vec::new();
        for _ in 0..header.num_chunks {
            chunks.push(ChunkEntry::read_from(&mut inner).map_err(map_open_err)?);
        }

        // Copy the stored payload off the stream in blocks
        let mut buffer = MemoryBuffer::new();
        let mut block = [0u8; COPY_BLOCK_SIZE];
        let mut bytes_left = header.compressed_size;
        while bytes_left > 0 {
            let want = cmp::min(bytes_left, COPY_BLOCK_SIZE as u64) as usize;
            let (_, got) = fill_buf(&mut inner, &mut block[..want])?;
            if got < want {
                return Err(ContainerError::Truncated);
            }
            buffer.write_all(&block[..got])?;
            bytes_left -= got as u64;
        }

        if header.compression == COMPRESSION_DEFLATE {
            let inflated =
                compress::inflate(buffer.as_slice()).ok_or(ContainerError::InflateError)?;
            if inflated.len() as u64 != header.uncompressed_size {
                warn!(
                    "inflated payload is {} bytes, header declares {}",
                    inflated.len(),
                    header.uncompressed_size
                );
            }
            buffer.clear();
            buffer.write_all(&inflated)?;
        }

        if options.verify_digest && hash::sha1(buffer.as_slice()).as_bytes() != &header.sha1 {
            return Err(ContainerError::IntegrityError);
        }

        buffer.set_position(0)?;
        Ok(ContainerStream {
            inner,
            mode: Mode::Reading,
            header,
            chunks,
            buffer,
        })
    }
}

impl<T: Write> ContainerStream<T> {
    /// Open a fresh container for writing. Nothing touches the underlying
    /// stream until [`finish`](Self::finish).
    pub fn writing(inner: T, magic: u32, target_version: u32, min_version: u32) -> Self {
        ContainerStream {
            inner,
            mode: Mode::Writing,
            header: Header {
                magic,
                target_version,
                min_version,
                num_chunks: 0,
                uncompressed_size: 0,
                compression: COMPRESSION_DEFLATE,
                compressed_size: 0,
                sha1: [0u8; 20],
            },
            chunks: Vec::new(),
            buffer: MemoryBuffer::new(),
        }
    }

    /// Finalize the session and hand the underlying stream back.
    ///
    /// In writing mode this hashes the accumulated payload, compresses it
    /// (falling back to raw storage if the codec fails) and emits header,
    /// directory and payload. In reading mode it is a no-op. Skipping
    /// `finish` on a writer produces no output at all.
    pub fn finish(mut self) -> Result<T, ContainerError> {
        if self.mode == Mode::Reading {
            return Ok(self.inner);
        }

        let payload = self.buffer.as_slice();
        self.header.num_chunks = self.chunks.len() as u32;
        self.header.uncompressed_size = payload.len() as u64;
        self.header.compressed_size = payload.len() as u64;
        self.header.sha1 = *hash::sha1(payload).as_bytes();

        let compressed = if self.header.compression == COMPRESSION_DEFLATE {
            match compress::deflate(payload) {
                Some(bytes) => {
                    self.header.compressed_size = bytes.len() as u64;
                    Some(bytes)
                }
                None => {
                    warn!("payload compression failed, storing raw bytes");
                    self.header.compression = COMPRESSION_NONE;
                    None
                }
            }
        } else {
            None
        };

        self.header
            .write_to(&mut self.inner)
            .map_err(ContainerError::FinalizationError)?;
        for chunk in &self.chunks {
            chunk
                .write_to(&mut self.inner)
                .map_err(ContainerError::FinalizationError)?;
        }
        match &compressed {
            Some(bytes) => self
                .inner
                .write_all(bytes)
                .map_err(ContainerError::FinalizationError)?,
            None => self
                .inner
                .write_all(self.buffer.as_slice())
                .map_err(ContainerError::FinalizationError)?,
        }
        self.inner
            .flush()
            .map_err(ContainerError::FinalizationError)?;

        Ok(self.inner)
    }
}

impl<T> ContainerStream<T> {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Writer-side header access, e.g. to switch the compression id before
    /// any chunk is written. The derived fields (`num_chunks`, sizes,
    /// `sha1`) are overwritten by `finish`.
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Abandon the session and hand the underlying stream back without
    /// finalizing. A writer abandoned this way has emitted nothing.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Run `codec` over the chunk with the given id.
    ///
    /// Reading: seeks to the first directory entry with a matching id and
    /// runs the codec there; returns `Ok(false)` without invoking the codec
    /// when no entry matches, so callers can treat chunk presence as
    /// optional.
    ///
    /// Writing: runs the codec at the current end of the payload and
    /// appends a directory entry covering whatever it wrote.
    pub fn read_write_chunk<F>(&mut self, id: u32, codec: F) -> Result<bool, ContainerError>
    where
        F: FnOnce(&mut ChunkStream) -> Result<(), ContainerError>,
    {
        match self.mode {
            Mode::Reading => {
                let entry = self.chunks.iter().find(|e| e.id == id).copied();
                match entry {
                    None => Ok(false),
                    Some(entry) => {
                        self.buffer.set_position(entry.offset as usize)?;
                        let mut stream = ChunkStream::new(&mut self.buffer, Mode::Reading);
                        codec(&mut stream)?;
                        Ok(true)
                    }
                }
            }
            Mode::Writing => {
                let offset = self.buffer.position() as u64;
                let mut stream = ChunkStream::new(&mut self.buffer, Mode::Writing);
                codec(&mut stream)?;
                let length = self.buffer.position() as u64 - offset;
                self.chunks.push(ChunkEntry { id, offset, length });
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod test_container_roundtrip {
    use super::*;
    use crate::container::{CHUNK_ENTRY_SIZE, HEADER_SIZE};
    use std::io::{Cursor, Seek, SeekFrom};

    const MAGIC: u32 = 0x4b534143;

    fn read_options() -> ReadOptions {
        ReadOptions {
            magic: MAGIC,
            supported_version: 1,
            verify_digest: true,
        }
    }

    fn rewound(mut cursor: Cursor<Vec<u8>>) -> Cursor<Vec<u8>> {
        cursor.seek(SeekFrom::Start(0)).unwrap();
        cursor
    }

    #[test]
    fn empty_container() {
        // Write to the stream
        let data = Cursor::new(Vec::new());
        let writer = ContainerStream::writing(data, MAGIC, 1, 1);
        let data = writer.finish().unwrap();

        // Header + a deflated empty payload, nothing else
        let bytes = data.get_ref();
        assert!(bytes.len() > HEADER_SIZE);
        let header = Header::read_from(&mut &bytes[..]).unwrap();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.num_chunks, 0);
        assert_eq!(header.uncompressed_size, 0);
        assert_eq!(header.compression, COMPRESSION_DEFLATE);
        assert_eq!(header.compressed_size as usize, bytes.len() - HEADER_SIZE);
        assert_eq!(
            hash::Digest::from(header.sha1).to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );

        // Read back and assert stuff
        let mut reader = ContainerStream::reading(rewound(data), &read_options()).unwrap();
        assert_eq!(reader.header().num_chunks, 0);
        let found = reader
            .read_write_chunk(0x1000, |_| panic!("codec must not run"))
            .unwrap();
        assert!(!found);
    }

    #[test]
    fn single_chunk_single_u32() {
        let data = Cursor::new(Vec::new());
        let mut writer = ContainerStream::writing(data, MAGIC, 1, 1);
        writer
            .read_write_chunk(0x1000, |s| {
                let mut v: u32 = 0xDEADBEEF;
                s.read_write(&mut v)
            })
            .unwrap();
        let data = writer.finish().unwrap();

        // Directory holds exactly {id, offset 0, length 4}
        let bytes = data.get_ref();
        let header = Header::read_from(&mut &bytes[..]).unwrap();
        assert_eq!(header.num_chunks, 1);
        let entry = ChunkEntry::read_from(&mut &bytes[HEADER_SIZE..]).unwrap();
        assert_eq!(
            entry,
            ChunkEntry {
                id: 0x1000,
                offset: 0,
                length: 4
            }
        );

        // The uncompressed payload is the little-endian image
        let payload_start = HEADER_SIZE + CHUNK_ENTRY_SIZE;
        let payload = compress::inflate(&bytes[payload_start..]).unwrap();
        assert_eq!(payload, vec![0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(payload.len() as u64, header.uncompressed_size);

        let mut reader = ContainerStream::reading(rewound(data), &read_options()).unwrap();
        let mut back: u32 = 0;
        let found = reader
            .read_write_chunk(0x1000, |s| s.read_write(&mut back))
            .unwrap();
        assert!(found);
        assert_eq!(back, 0xDEADBEEF);
    }

    #[test]
    fn vector_chunk_wire_image() {
        let data = Cursor::new(Vec::new());
        let mut writer = ContainerStream::writing(data, MAGIC, 1, 1);
        writer
            .read_write_chunk(0x2000, |s| {
                let mut values: Vec<u16> = vec![1, 2, 3];
                s.read_write_vector(&mut values, |s, v| s.read_write(v))
            })
            .unwrap();
        let data = writer.finish().unwrap();

        let bytes = data.get_ref();
        let payload_start = HEADER_SIZE + CHUNK_ENTRY_SIZE;
        let payload = compress::inflate(&bytes[payload_start..]).unwrap();
        assert_eq!(
            payload,
            vec![
                0x03, 0x00, 0x00, 0x00, // count
                0x02, 0x00, 0x00, 0x00, // element_size
                0x01, 0x00, 0x02, 0x00, 0x03, 0x00,
            ]
        );

        let mut reader = ContainerStream::reading(rewound(data), &read_options()).unwrap();
        let mut back: Vec<u16> = Vec::new();
        reader
            .read_write_chunk(0x2000, |s| {
                s.read_write_vector(&mut back, |s, v| s.read_write(v))
            })
            .unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn two_chunks_and_a_missing_id() {
        let data = Cursor::new(Vec::new());
        let mut writer = ContainerStream::writing(data, MAGIC, 1, 1);
        writer
            .read_write_chunk(0xAAAA, |s| s.write(0x42u8))
            .unwrap();
        writer
            .read_write_chunk(0xBBBB, |s| s.write(0x99u8))
            .unwrap();
        let data = writer.finish().unwrap();

        let bytes = data.get_ref();
        let first = ChunkEntry::read_from(&mut &bytes[HEADER_SIZE..]).unwrap();
        let second =
            ChunkEntry::read_from(&mut &bytes[HEADER_SIZE + CHUNK_ENTRY_SIZE..]).unwrap();
        assert_eq!(
            first,
            ChunkEntry {
                id: 0xAAAA,
                offset: 0,
                length: 1
            }
        );
        assert_eq!(
            second,
            ChunkEntry {
                id: 0xBBBB,
                offset: 1,
                length: 1
            }
        );

        let mut reader = ContainerStream::reading(rewound(data), &read_options()).unwrap();
        let mut v: u8 = 0;
        assert!(reader
            .read_write_chunk(0xBBBB, |s| s.read_write(&mut v))
            .unwrap());
        assert_eq!(v, 0x99);
        assert!(!reader
            .read_write_chunk(0xCCCC, |s| s.read_write(&mut v))
            .unwrap());
        // Chunks can be revisited in any order
        assert!(reader
            .read_write_chunk(0xAAAA, |s| s.read_write(&mut v))
            .unwrap());
        assert_eq!(v, 0x42);
    }

    #[test]
    fn shared_codec_round_trips_a_record() {
        // One codec function drives both directions
        #[derive(Debug, Default, PartialEq)]
        struct Track {
            name: String,
            composer: String,
            bytes_per_tick: u32,
            size: u64,
        }

        fn track_codec(s: &mut ChunkStream, t: &mut Track) -> Result<(), ContainerError> {
            s.read_write_string(&mut t.name)?;
            s.read_write_string(&mut t.composer)?;
            s.read_write(&mut t.bytes_per_tick)?;
            s.read_write(&mut t.size)?;
            Ok(())
        }

        fn library_codec(s: &mut ChunkStream, tracks: &mut Vec<Track>) -> Result<(), ContainerError> {
            s.write(2u16)?; // chunk-local version field
            s.read_write_vector(tracks, track_codec)
        }

        let mut tracks = vec![
            Track {
                name: "Overture".to_string(),
                composer: "Anonymous".to_string(),
                bytes_per_tick: 1764,
                size: 882_000,
            },
            Track {
                name: "March".to_string(),
                composer: "Traditional".to_string(),
                bytes_per_tick: 882,
                size: 441_000,
            },
        ];

        let data = Cursor::new(Vec::new());
        let mut writer = ContainerStream::writing(data, MAGIC, 1, 1);
        writer
            .read_write_chunk(0x10, |s| library_codec(s, &mut tracks))
            .unwrap();
        let data = writer.finish().unwrap();

        let mut reader = ContainerStream::reading(rewound(data), &read_options()).unwrap();
        let mut back: Vec<Track> = Vec::new();
        reader
            .read_write_chunk(0x10, |s| library_codec(s, &mut back))
            .unwrap();
        assert_eq!(back, tracks);
    }

    #[test]
    fn deterministic_output() {
        fn build() -> Vec<u8> {
            let mut writer = ContainerStream::writing(Cursor::new(Vec::new()), MAGIC, 3, 2);
            writer
                .read_write_chunk(0x1, |s| {
                    let mut v: u64 = 0x0123456789ABCDEF;
                    s.read_write(&mut v)
                })
                .unwrap();
            writer
                .read_write_chunk(0x2, |s| {
                    let mut s2 = "same every time".to_string();
                    s.read_write_string(&mut s2)
                })
                .unwrap();
            writer.finish().unwrap().into_inner()
        }

        assert_eq!(build(), build());
    }

    #[test]
    fn header_versions_survive() {
        let data = Cursor::new(Vec::new());
        let writer = ContainerStream::writing(data, MAGIC, 9, 4);
        let data = writer.finish().unwrap();

        let reader = ContainerStream::reading(
            rewound(data),
            &ReadOptions {
                magic: MAGIC,
                supported_version: 4,
                verify_digest: false,
            },
        )
        .unwrap();
        assert_eq!(reader.header().target_version, 9);
        assert_eq!(reader.header().min_version, 4);
    }
}

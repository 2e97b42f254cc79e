//! Chunked container file format
//!
//! A container is a set of independently addressable chunks, each a freeform
//! byte blob whose interior layout is owned by the codec that wrote it. The
//! whole payload is compressed as one unit and carries a SHA-1 digest for
//! integrity. Unless otherwise noted everything is stored in Little Endian
//! format.
//!
//! # Top Level
//!
//! | Type     | Name      | Description |
//! | -------: | --------- | ----------- |
//! | [u8; 64] | header    | See [Header](#header) |
//! | [u8; 20] | entry × N | Chunk directory, one entry per chunk |
//! | [u8; M]  | payload   | The stored payload, `compressed_size` bytes |
//!
//! # Header
//!
//! | Type     | Name              | Description |
//! | -------: | ----------------- | ----------- |
//! | u32      | magic             | Caller-chosen constant identifying the file kind |
//! | u32      | target_version    | The writer's current version |
//! | u32      | min_version       | Minimum reader version that can understand the payload |
//! | u32      | num_chunks        | Count of directory entries |
//! | u64      | uncompressed_size | Payload length after decompression |
//! | u32      | compression       | 0 = none, 1 = deflate, others reserved |
//! | u64      | compressed_size   | Payload length as stored on the stream |
//! | [u8; 20] | sha1              | Digest over the uncompressed payload |
//! | [u8; 8]  | padding           | Reserved, written as zero |
//!
//! # Chunk directory
//!
//! Each entry is `id: u32, offset: u64, length: u64` where the offset and
//! length address a range of the *uncompressed* payload. Ids are not required
//! to be unique; the reader takes the first match. Writers should not emit
//! duplicates.
//!
//! # Chunk interior
//!
//! The format records no field names, tags, or type codes inside a chunk.
//! The order of primitive calls in the user codec *is* the schema, which is
//! why one bidirectional codec function serves both directions. The only
//! self-describing structure is the array frame:
//!
//! | Type    | Name         | Description |
//! | ------: | ------------ | ----------- |
//! | u32     | count        | Number of elements that follow |
//! | u32     | element_size | Fixed stride, or 0 for self-delimiting elements |
//! | [u8; ?] | elements     | `count` element bodies |
//!
//! Writers detect the stride automatically: the first element fixes it, any
//! later element of a different size resets it to 0. A nonzero stride lets
//! readers seek past elements without decoding them.
//!
//! Strings are NUL-terminated UTF-8.

mod chunk;
mod header;
mod stream;

pub use chunk::{ChunkStream, Scalar};
pub use header::{ChunkEntry, Header, CHUNK_ENTRY_SIZE, HEADER_SIZE};
pub use stream::{ContainerStream, ReadOptions};

use thiserror::Error;

/// Payload stored raw.
pub const COMPRESSION_NONE: u32 = 0;
/// Payload stored as a zlib deflate stream.
pub const COMPRESSION_DEFLATE: u32 = 1;

// Block size for copying the stored payload off the underlying stream
const COPY_BLOCK_SIZE: usize = 2 * 1024;

/// Direction of a container session. Every codec primitive dispatches on
/// this, it is the whole of the bidirectional pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Reading,
    Writing,
}

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error("stream ended before the declared payload length")]
    Truncated,
    #[error("bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },
    #[error("payload requires version {required}, reader supports {supported}")]
    VersionTooNew { required: u32, supported: u32 },
    #[error("payload decompression failed")]
    InflateError,
    #[error("payload digest does not match the stored digest")]
    IntegrityError,
    #[error("array data was written but no elements were recorded")]
    MalformedArray,
    #[error("container finalization failed")]
    FinalizationError(#[source] std::io::Error),
    #[error("read past the end of the chunk buffer")]
    UnexpectedEndOfStream,
}

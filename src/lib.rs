//! Chunked binary container format with a bidirectional codec stream.
//!
//! A container file is a 64 byte header, a directory of `(id, offset,
//! length)` chunk entries, and a whole-payload compressed blob. User code
//! describes the interior of each chunk with a single codec function that
//! serves both directions: the [`container::ChunkStream`] it receives
//! carries a [`container::Mode`] and every primitive on it reads or writes
//! accordingly, so the two directions cannot drift apart.
//!
//! See [`container`] for the on-disk layout.

pub mod buf;
pub mod compress;
pub mod container;
pub mod hash;

pub use container::{
    ChunkEntry, ChunkStream, ContainerError, ContainerStream, Header, Mode, ReadOptions, Scalar,
};

use std::io::{Error, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// On-wire size of [`Header`].
pub const HEADER_SIZE: usize = 64;
/// On-wire size of [`ChunkEntry`].
pub const CHUNK_ENTRY_SIZE: usize = 20;

/// Fixed container header. Magic-agnostic on its own, the open path checks
/// `magic` and `min_version` against what the caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub target_version: u32,
    pub min_version: u32,
    pub num_chunks: u32,
    pub uncompressed_size: u64,
    pub compression: u32,
    pub compressed_size: u64,
    pub sha1: [u8; 20],
}

impl Header {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let magic = reader.read_u32::<LittleEndian>()?;
        let target_version = reader.read_u32::<LittleEndian>()?;
        let min_version = reader.read_u32::<LittleEndian>()?;
        let num_chunks = reader.read_u32::<LittleEndian>()?;
        let uncompressed_size = reader.read_u64::<LittleEndian>()?;
        let compression = reader.read_u32::<LittleEndian>()?;
        let compressed_size = reader.read_u64::<LittleEndian>()?;

        let mut sha1 = [0u8; 20];
        reader.read_exact(&mut sha1)?;

        let mut padding = [0u8; 8];
        reader.read_exact(&mut padding)?;

        Ok(Header {
            magic,
            target_version,
            min_version,
            num_chunks,
            uncompressed_size,
            compression,
            compressed_size,
            sha1,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.target_version)?;
        writer.write_u32::<LittleEndian>(self.min_version)?;
        writer.write_u32::<LittleEndian>(self.num_chunks)?;
        writer.write_u64::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u32::<LittleEndian>(self.compression)?;
        writer.write_u64::<LittleEndian>(self.compressed_size)?;
        writer.write_all(&self.sha1)?;
        writer.write_all(&[0u8; 8])?;
        Ok(())
    }
}

/// Directory entry addressing one chunk within the uncompressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    pub id: u32,
    pub offset: u64,
    pub length: u64,
}

impl ChunkEntry {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let id = reader.read_u32::<LittleEndian>()?;
        let offset = reader.read_u64::<LittleEndian>()?;
        let length = reader.read_u64::<LittleEndian>()?;
        Ok(ChunkEntry { id, offset, length })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_u32::<LittleEndian>(self.id)?;
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_u64::<LittleEndian>(self.length)?;
        Ok(())
    }
}

use std::io::{copy, Read};

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

/// Compress a whole buffer. `None` signals codec failure, the caller decides
/// whether to fall back to storing the bytes raw.
pub fn deflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(data, Compression::default());

    let mut out: Vec<u8> = Vec::new();
    match copy(&mut encoder, &mut out) {
        Ok(_) => Some(out),
        Err(_) => None,
    }
}

/// Decompress a whole buffer. `None` signals a corrupt or truncated stream.
pub fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);

    let mut out: Vec<u8> = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(_) => None,
    }
}

use std::fmt;

use sha1::{Digest as _, Sha1};

// Encapsulate the digest engine, the container format stores a 20 byte SHA-1
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Digest([u8; 20]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<[u8; 20]> for Digest {
    fn from(bytes: [u8; 20]) -> Self {
        Digest(bytes)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

pub fn sha1(data: &[u8]) -> Digest {
    let mut hasher = Sha1::new();
    hasher.update(data);
    Digest(hasher.finalize().into())
}

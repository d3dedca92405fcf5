use std::fmt::{self, Debug, Display, Formatter};

use blake2::{
    digest::{Update, VariableOutput},
    VarBlake2b,
};
use datasize::DataSize;
use hex_fmt::HexFmt;
use serde::{Deserialize, Serialize};

/// A 256-bit blake2b digest, used to identify blocks, consensus messages and eras.
#[derive(
    DataSize,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct Digest([u8; Digest::LENGTH]);

impl Digest {
    /// The number of bytes in a digest.
    pub const LENGTH: usize = 32;

    /// Creates a digest from raw bytes.
    pub const fn new(bytes: [u8; Digest::LENGTH]) -> Self {
        Digest(bytes)
    }

    /// Returns the digest as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the first eight bytes of the digest as a little-endian integer.
    ///
    /// Used to derive pseudorandomness seeds from key block hashes.
    pub fn to_seed(&self) -> u64 {
        let mut eight = [0; 8];
        eight.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(eight)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(&HexFmt(&self.0), f)
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Digest({:10})", HexFmt(&self.0))
    }
}

/// Hashes a byte slice with blake2b-256.
pub fn hash<T: AsRef<[u8]>>(data: T) -> Digest {
    let mut result = [0; Digest::LENGTH];
    let mut hasher = VarBlake2b::new(Digest::LENGTH).expect("should create hasher");
    hasher.update(data.as_ref());
    hasher.finalize_variable(|slice| {
        result.copy_from_slice(slice);
    });
    Digest(result)
}

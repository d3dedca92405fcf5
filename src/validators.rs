use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Display, Formatter},
};

use datasize::DataSize;
use hex_fmt::HexFmt;
use serde::{Deserialize, Serialize};

/// A validator identity.
///
/// The signature scheme itself is outside this crate; identities are opaque key bytes.
#[derive(
    DataSize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PublicKey([u8; PublicKey::LENGTH]);

impl PublicKey {
    /// The number of bytes in a public key.
    pub const LENGTH: usize = 32;

    /// Creates a public key from raw bytes.
    pub const fn new(bytes: [u8; PublicKey::LENGTH]) -> Self {
        PublicKey(bytes)
    }

    /// Returns the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:10}", HexFmt(&self.0))
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "PublicKey({:10})", HexFmt(&self.0))
    }
}

/// The bonded-validators snapshot of an era: who may sign messages, and with what weight.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    weights: BTreeMap<PublicKey, u64>,
}

impl Validators {
    /// Creates a snapshot from a weight map. Panics if the total weight is zero.
    pub fn new(weights: BTreeMap<PublicKey, u64>) -> Self {
        let validators = Validators { weights };
        assert!(
            validators.total_weight() > 0,
            "cannot create a validator set with total weight 0"
        );
        validators
    }

    /// Returns whether the given identity is bonded in this snapshot.
    pub fn contains(&self, id: &PublicKey) -> bool {
        self.weights.contains_key(id)
    }

    /// Returns the sum of all validator weights.
    pub fn total_weight(&self) -> u64 {
        self.weights
            .values()
            .fold(0u64, |sum, weight| sum.saturating_add(*weight))
    }

    /// Iterates over `(identity, weight)` pairs in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&PublicKey, &u64)> {
        self.weights.iter()
    }

    /// The number of bonded validators.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Returns whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl FromIterator<(PublicKey, u64)> for Validators {
    fn from_iter<I: IntoIterator<Item = (PublicKey, u64)>>(iter: I) -> Self {
        Validators::new(iter.into_iter().collect())
    }
}

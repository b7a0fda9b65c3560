use crate::chaincfg::chainhash::Hash;

/// Defines a bitcoin data type that is used to track previous transaction
/// outputs.  Equality is by value, so outpoints are usable as map keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    /// Returns a new bitcoin transaction outpoint with the provided hash and
    /// index.
    pub fn new(hash: Hash, index: u32) -> OutPoint {
        OutPoint { hash, index }
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hash.string(), self.index)
    }
}

use {
    super::{double_sha256, MsgTx},
    crate::chaincfg::chainhash::Hash,
};

/// A bitcoin block header.
#[derive(Clone, Debug, Default)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash,
    pub merkle_root: Hash,

    /// Block time as a unix timestamp.
    pub timestamp: i64,

    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Serializes the header to the fixed 80 byte bitcoin wire encoding.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(80);

        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_block.bytes());
        buf.extend_from_slice(self.merkle_root.bytes());
        buf.extend_from_slice(&(self.timestamp as u32).to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());

        buf
    }

    /// Computes the block hash: the double sha256 of the serialized header.
    pub fn block_hash(&self) -> Hash {
        double_sha256(&self.serialize())
    }
}

/// A bitcoin block message: a header followed by its transactions.
#[derive(Clone, Debug, Default)]
pub struct MsgBlock {
    pub header: BlockHeader,
    pub transactions: Vec<MsgTx>,
}

impl MsgBlock {
    pub fn new(header: BlockHeader) -> MsgBlock {
        MsgBlock {
            header,
            transactions: Vec::new(),
        }
    }

    pub fn add_transaction(&mut self, tx: MsgTx) {
        self.transactions.push(tx);
    }

    /// Computes the hash of the block, which is the hash of its header alone.
    pub fn block_hash(&self) -> Hash {
        self.header.block_hash()
    }
}

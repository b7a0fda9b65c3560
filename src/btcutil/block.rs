use {
    super::Tx,
    crate::{chaincfg::chainhash::Hash, wire::MsgBlock},
};

/// Provides easier and more efficient manipulation of raw blocks.  The block
/// hash is computed once on construction, and the contained transactions are
/// wrapped with their index within the block.
#[derive(Clone, Debug)]
pub struct Block {
    msg_block: MsgBlock,
    hash: Hash,
    height: i32,
}

impl Block {
    /// Returns a new instance of a bitcoin block at the given chain height.
    pub fn new(msg_block: MsgBlock, height: i32) -> Block {
        let hash = msg_block.block_hash();

        Block {
            msg_block,
            hash,
            height,
        }
    }

    /// The underlying wire block message.
    pub fn msg_block(&self) -> &MsgBlock {
        &self.msg_block
    }

    /// The cached hash of the block.
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// The height of the block within the chain.
    pub fn height(&self) -> i32 {
        self.height
    }

    /// The block time as a unix timestamp.
    pub fn timestamp(&self) -> i64 {
        self.msg_block.header.timestamp
    }

    /// Returns the contained transactions wrapped with their hash and index
    /// within the block.
    pub fn transactions(&self) -> Vec<Tx> {
        self.msg_block
            .transactions
            .iter()
            .enumerate()
            .map(|(i, msg_tx)| {
                let mut tx = Tx::new(msg_tx.clone());
                tx.set_index(i as i32);
                tx
            })
            .collect()
    }
}

use crate::{chaincfg::chainhash::Hash, wire::MsgTx};

/// The value of a transaction index for a transaction that is not yet part of
/// a block.
pub const TX_INDEX_UNKNOWN: i32 = -1;

/// Provides easier and more efficient manipulation of raw transactions.  It
/// memoizes the hash for the transaction on its first access so subsequent
/// accesses don't have to repeat the relatively expensive hashing operation.
#[derive(Clone, Debug)]
pub struct Tx {
    msg_tx: MsgTx,
    hash: Hash,
    index: i32,
}

impl Tx {
    /// Returns a new instance of a bitcoin transaction given an underlying
    /// wire message.  The transaction index is unknown until set.
    pub fn new(msg_tx: MsgTx) -> Tx {
        let hash = msg_tx.tx_hash();

        Tx {
            msg_tx,
            hash,
            index: TX_INDEX_UNKNOWN,
        }
    }

    /// The underlying wire transaction message.
    pub fn msg_tx(&self) -> &MsgTx {
        &self.msg_tx
    }

    /// The cached hash of the transaction.
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// The saved index of the transaction within a block.  This value will be
    /// TX_INDEX_UNKNOWN if it hasn't already explicitly been set.
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Sets the index of the transaction in within a block.
    pub fn set_index(&mut self, index: i32) {
        self.index = index;
    }

    /// Returns the serialized transaction encoded in hexadecimal.
    pub fn hex(&self) -> String {
        hex::encode(self.msg_tx.serialize())
    }
}

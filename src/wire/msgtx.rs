use {
    super::{double_sha256, write_var_int, OutPoint},
    crate::chaincfg::chainhash::Hash,
};

/// A bitcoin transaction input.
#[derive(Clone, Debug, Default)]
pub struct TxIn {
    pub previous_out_point: OutPoint,
    pub signature_script: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(previous_out_point: OutPoint, signature_script: Vec<u8>) -> TxIn {
        TxIn {
            previous_out_point,
            signature_script,
            sequence: u32::MAX,
        }
    }
}

/// A bitcoin transaction output carrying a value in satoshi and the public
/// key script that must be satisfied to spend it.
#[derive(Clone, Debug, Default)]
pub struct TxOut {
    pub value: i64,
    pub pk_script: Vec<u8>,
}

impl TxOut {
    pub fn new(value: i64, pk_script: Vec<u8>) -> TxOut {
        TxOut { value, pk_script }
    }
}

/// A bitcoin transaction message.
#[derive(Clone, Debug, Default)]
pub struct MsgTx {
    pub version: i32,
    pub tx_in: Vec<TxIn>,
    pub tx_out: Vec<TxOut>,
    pub lock_time: u32,
}

impl MsgTx {
    pub fn new() -> MsgTx {
        MsgTx {
            version: 1,
            tx_in: Vec::new(),
            tx_out: Vec::new(),
            lock_time: 0,
        }
    }

    pub fn add_tx_in(&mut self, tx_in: TxIn) {
        self.tx_in.push(tx_in);
    }

    pub fn add_tx_out(&mut self, tx_out: TxOut) {
        self.tx_out.push(tx_out);
    }

    /// Serializes the transaction to the bitcoin wire encoding.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialize_size());

        buf.extend_from_slice(&self.version.to_le_bytes());

        write_var_int(&mut buf, self.tx_in.len() as u64);
        for txin in self.tx_in.iter() {
            buf.extend_from_slice(txin.previous_out_point.hash.bytes());
            buf.extend_from_slice(&txin.previous_out_point.index.to_le_bytes());
            write_var_int(&mut buf, txin.signature_script.len() as u64);
            buf.extend_from_slice(&txin.signature_script);
            buf.extend_from_slice(&txin.sequence.to_le_bytes());
        }

        write_var_int(&mut buf, self.tx_out.len() as u64);
        for txout in self.tx_out.iter() {
            buf.extend_from_slice(&txout.value.to_le_bytes());
            write_var_int(&mut buf, txout.pk_script.len() as u64);
            buf.extend_from_slice(&txout.pk_script);
        }

        buf.extend_from_slice(&self.lock_time.to_le_bytes());

        buf
    }

    /// Returns the number of bytes the serialized transaction occupies.
    pub fn serialize_size(&self) -> usize {
        // 4 version + 4 lock time, plus conservative room for the var ints.
        let mut n = 8 + 9 + 9;
        for txin in self.tx_in.iter() {
            n += 40 + 9 + txin.signature_script.len();
        }
        for txout in self.tx_out.iter() {
            n += 8 + 9 + txout.pk_script.len();
        }
        n
    }

    /// Generates the hash of the transaction: the double sha256 of the
    /// serialized transaction.
    pub fn tx_hash(&self) -> Hash {
        double_sha256(&self.serialize())
    }
}

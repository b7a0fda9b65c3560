//! Package wire implements the subset of the bitcoin wire protocol needed by
//! the RPC subsystem: outpoints, transactions and block headers together with
//! their serialization and hashing.

mod blockheader;
mod msgtx;
mod outpoint;

pub use blockheader::{BlockHeader, MsgBlock};
pub use msgtx::{MsgTx, TxIn, TxOut};
pub use outpoint::OutPoint;

use {
    crate::chaincfg::chainhash::{constants::HASH_SIZE, Hash},
    rand::Rng,
    sha2::{Digest, Sha256},
};

/// Calculates sha256(sha256(b)) and returns the resulting chain hash.
pub fn double_sha256(b: &[u8]) -> Hash {
    let first = Sha256::digest(b);
    let second = Sha256::digest(first);

    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&second);
    Hash::from_bytes(out)
}

/// Returns a cryptographically random uint64.
pub fn random_uint64() -> u64 {
    rand::thread_rng().gen()
}

/// Serializes a variable length integer to the wire encoding and appends it
/// to the destination buffer.
pub(crate) fn write_var_int(dst: &mut Vec<u8>, val: u64) {
    if val < 0xfd {
        dst.push(val as u8);
    } else if val <= 0xffff {
        dst.push(0xfd);
        dst.extend_from_slice(&(val as u16).to_le_bytes());
    } else if val <= 0xffff_ffff {
        dst.push(0xfe);
        dst.extend_from_slice(&(val as u32).to_le_bytes());
    } else {
        dst.push(0xff);
        dst.extend_from_slice(&val.to_le_bytes());
    }
}

//! Package chaincfg defines the chain configuration parameters the RPC
//! subsystem needs to decode and encode payment addresses for the active
//! network.

pub mod chainhash;

/// Defines the subset of a bitcoin network's parameters used by this
/// subsystem: the magic version bytes that prefix base58check encoded
/// payment addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Params {
    /// Human readable network name.
    pub name: &'static str,

    /// First byte of a base58check encoded pay-to-pubkey-hash address.
    pub pub_key_hash_addr_id: u8,

    /// First byte of a base58check encoded pay-to-script-hash address.
    pub script_hash_addr_id: u8,
}

/// Parameters for the main bitcoin network.
pub const MAIN_NET_PARAMS: Params = Params {
    name: "mainnet",
    pub_key_hash_addr_id: 0x00,
    script_hash_addr_id: 0x05,
};

/// Parameters for the version 3 test network.
pub const TEST_NET3_PARAMS: Params = Params {
    name: "testnet3",
    pub_key_hash_addr_id: 0x6f,
    script_hash_addr_id: 0xc4,
};

/// Parameters for the simulation test network.
pub const SIM_NET_PARAMS: Params = Params {
    name: "simnet",
    pub_key_hash_addr_id: 0x3f,
    script_hash_addr_id: 0x7b,
};

use {
    crate::chaincfg::Params,
    ripemd::Ripemd160,
    sha2::{Digest, Sha256},
};

/// Calculates ripemd160(sha256(b)), the digest used to identify
/// pay-to-pubkey-hash and pay-to-script-hash addresses.
pub fn hash160(b: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(b);
    let ripe = Ripemd160::digest(sha);

    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

/// Describes errors decoding payment addresses.
#[derive(Clone, PartialEq)]
pub enum AddressError {
    /// The base58check payload has the wrong length or a bad checksum.
    MalformedAddress(String),

    /// A pubkey address with a serialization length other than 33 or 65.
    UnknownPubKeyLength(usize),
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            AddressError::MalformedAddress(ref addr) => {
                write!(f, "malformed address: {}", addr)
            }
            AddressError::UnknownPubKeyLength(len) => {
                write!(f, "pubkey of unknown serialized length {}", len)
            }
        }
    }
}

impl std::fmt::Debug for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            AddressError::MalformedAddress(ref addr) => {
                write!(f, "AddressError(malformed address: {})", addr)
            }
            AddressError::UnknownPubKeyLength(len) => {
                write!(f, "AddressError(pubkey of unknown serialized length {})", len)
            }
        }
    }
}

/// A decoded bitcoin payment address.
///
/// The `Other` variant carries address kinds this subsystem does not decode
/// natively.  It is produced for base58check payloads with an unrecognized
/// version byte and may also be minted by script parsers for script templates
/// newer than the decoder; only the encoded payment string is retained.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Address {
    /// A pay-to-pubkey-hash address holding the ripemd160(sha256) digest of
    /// the public key.
    PubKeyHash { hash: [u8; 20], net_id: u8 },

    /// A pay-to-script-hash address holding the ripemd160(sha256) digest of
    /// the redeem script.
    ScriptHash { hash: [u8; 20], net_id: u8 },

    /// A pay-to-pubkey address holding the 33 or 65 byte serialized public
    /// key.  The net id is the pay-to-pubkey-hash version byte used when the
    /// key is rendered as its implicit P2PKH address.
    PubKey { key: Vec<u8>, net_id: u8 },

    /// An address kind without a native decoding.
    Other { encoded: String },
}

impl Address {
    /// Decodes the string encoding of an address into a concrete address
    /// kind for the given network.
    ///
    /// Pubkey addresses are hexadecimal serialized public keys (33 or 65
    /// bytes).  All other supported kinds are base58check encoded with a one
    /// byte version prefix.  Valid base58check payloads with a version byte
    /// matching neither the pay-to-pubkey-hash nor the pay-to-script-hash id
    /// of the network decode to [`Address::Other`].
    pub fn decode(addr: &str, params: &Params) -> Result<Address, AddressError> {
        // Serialized public keys are either 65 bytes (130 hex chars) if
        // uncompressed or 33 bytes (66 hex chars) if compressed.
        if addr.len() == 130 || addr.len() == 66 {
            if let Ok(key) = hex::decode(addr) {
                return Ok(Address::PubKey {
                    key,
                    net_id: params.pub_key_hash_addr_id,
                });
            }
        }

        let decoded = match bs58::decode(addr).with_check(None).into_vec() {
            Ok(d) => d,

            Err(_) => return Err(AddressError::MalformedAddress(addr.into())),
        };

        if decoded.len() != 21 {
            return Err(AddressError::MalformedAddress(addr.into()));
        }

        let net_id = decoded[0];
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&decoded[1..]);

        if net_id == params.pub_key_hash_addr_id {
            return Ok(Address::PubKeyHash { hash, net_id });
        }
        if net_id == params.script_hash_addr_id {
            return Ok(Address::ScriptHash { hash, net_id });
        }

        Ok(Address::Other {
            encoded: addr.into(),
        })
    }

    /// Constructs a pay-to-pubkey-hash address from a 20 byte digest.
    pub fn new_pub_key_hash(hash: [u8; 20], params: &Params) -> Address {
        Address::PubKeyHash {
            hash,
            net_id: params.pub_key_hash_addr_id,
        }
    }

    /// Constructs a pay-to-script-hash address from a 20 byte digest.
    pub fn new_script_hash(hash: [u8; 20], params: &Params) -> Address {
        Address::ScriptHash {
            hash,
            net_id: params.script_hash_addr_id,
        }
    }

    /// Constructs a pay-to-pubkey address from a serialized public key.  An
    /// error is returned if the key length is neither compressed (33) nor
    /// uncompressed (65).
    pub fn new_pub_key(key: Vec<u8>, params: &Params) -> Result<Address, AddressError> {
        match key.len() {
            33 | 65 => Ok(Address::PubKey {
                key,
                net_id: params.pub_key_hash_addr_id,
            }),

            len => Err(AddressError::UnknownPubKeyLength(len)),
        }
    }

    /// Returns the string encoding of the address as it would appear in a
    /// transaction.
    pub fn encode_address(&self) -> String {
        match *self {
            Address::PubKeyHash { ref hash, net_id } | Address::ScriptHash { ref hash, net_id } => {
                let mut payload = Vec::with_capacity(21);
                payload.push(net_id);
                payload.extend_from_slice(hash);
                bs58::encode(payload).with_check().into_string()
            }

            Address::PubKey { ref key, .. } => hex::encode(key),

            Address::Other { ref encoded } => encoded.clone(),
        }
    }

    /// Returns the raw bytes the address pays to: the 20 byte digest for
    /// hash based kinds or the serialized public key for pubkey addresses.
    pub fn script_address(&self) -> &[u8] {
        match *self {
            Address::PubKeyHash { ref hash, .. } | Address::ScriptHash { ref hash, .. } => hash,
            Address::PubKey { ref key, .. } => key,
            Address::Other { ref encoded } => encoded.as_bytes(),
        }
    }

    /// For a pubkey address, the digest of its implicit pay-to-pubkey-hash
    /// form.
    pub fn pub_key_hash(&self) -> Option<[u8; 20]> {
        match *self {
            Address::PubKey { ref key, .. } => Some(hash160(key)),
            _ => None,
        }
    }
}

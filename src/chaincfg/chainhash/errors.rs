/// Contains all chain hash errors.
pub enum ChainHashError {
    /// Describes an error where the caller specified a hash string that has too many characters.
    HashStringSize,

    /// Describes an error where the hash size is not same as specified.
    HashSize,

    HexDecode(hex::FromHexError),
}

impl std::fmt::Display for ChainHashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ChainHashError::HashStringSize => write!(
                f,
                "Max hash string length is {} bytes",
                super::constants::MAX_HASH_STRING_SIZE
            ),
            ChainHashError::HashSize => write!(
                f,
                "Max hash length is {} bytes",
                super::constants::HASH_SIZE
            ),
            ChainHashError::HexDecode(ref e) => write!(f, "Error decoding hex, error: {}", e),
        }
    }
}

impl std::fmt::Debug for ChainHashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ChainHashError::HashStringSize => write!(
                f,
                "ChainHashError(max hash string length is {} bytes)",
                super::constants::MAX_HASH_STRING_SIZE
            ),
            ChainHashError::HashSize => write!(
                f,
                "ChainHashError(max hash length is {} bytes)",
                super::constants::HASH_SIZE
            ),
            ChainHashError::HexDecode(ref e) => {
                write!(f, "ChainHashError(error decoding hex, error: {})", e)
            }
        }
    }
}

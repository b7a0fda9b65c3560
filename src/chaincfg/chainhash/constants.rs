// HashSize of array used to store hashes.
pub const HASH_SIZE: usize = 32;

// MaxHashStringSize is the maximum length of a Hash hash string.
pub const MAX_HASH_STRING_SIZE: usize = HASH_SIZE * 2;

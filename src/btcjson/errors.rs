// Standard JSON-RPC 2.0 error codes.

/// Invalid JSON was received by the server.
pub const ERR_RPC_PARSE: i32 = -32700;
/// The method does not exist / is not available.
pub const ERR_RPC_METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const ERR_RPC_INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error.
pub const ERR_RPC_INTERNAL: i32 = -32603;

// General application defined JSON errors.

/// Invalid address or key.
pub const ERR_RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;
/// Block not found.
pub const ERR_RPC_BLOCK_NOT_FOUND: i32 = -5;
/// Invalid, missing or duplicate parameter.
pub const ERR_RPC_INVALID_PARAMETER: i32 = -8;
/// Database error.
pub const ERR_RPC_DATABASE: i32 = -20;
/// Error parsing or validating structure in raw format.
pub const ERR_RPC_DECODE_HEX_STRING: i32 = -22;

/// A JSON-RPC error object sent in replies and also used internally to carry
/// command failures between handlers and the dispatcher.
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: String) -> RpcError {
        RpcError { code, message }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::fmt::Debug for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RpcError({}: {})", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Returns the error for failing to decode a hex encoded parameter.
pub fn rpc_decode_hex_error(got_hex: &str) -> RpcError {
    RpcError::new(
        ERR_RPC_DECODE_HEX_STRING,
        format!("Argument must be hexadecimal string (not \"{}\")", got_hex),
    )
}

use crate::btcjson::{RpcError, ERR_RPC_DATABASE};

/// Errors surfaced by the websocket server internals.
#[derive(Clone, PartialEq)]
pub enum RpcServerError {
    /// A client send was not processed because the client has already been
    /// disconnected or dropped.  Long-running notification producers check
    /// for this to stop processing when there is no more work to be done.
    ClientQuit,
}

impl std::fmt::Display for RpcServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            RpcServerError::ClientQuit => write!(f, "client quit"),
        }
    }
}

impl std::fmt::Debug for RpcServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            RpcServerError::ClientQuit => write!(f, "RpcServerError(client quit)"),
        }
    }
}

/// The error returned when an unrecoverable reorganize is detected during a
/// rescan.
pub(crate) fn err_rescan_reorg() -> RpcError {
    RpcError::new(ERR_RPC_DATABASE, "Reorganize".into())
}

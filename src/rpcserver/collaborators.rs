//! Narrow contracts of the subsystems the websocket server collaborates
//! with: the block chain store, the block manager, script parsing and the
//! standard (non-websocket) command dispatcher.

use {
    crate::{
        btcjson::RpcError,
        btcutil::{Address, Block},
        chaincfg::{chainhash::Hash, Params},
    },
    async_trait::async_trait,
    tokio::sync::oneshot,
};

/// The sentinel height meaning "every block through the current tip" when
/// passed as the end of a height range.
pub const ALL_SHAS: i32 = i32::MAX;

/// Errors returned by the chain store.
pub enum DbError {
    /// The requested block hash is not part of the store, typically because
    /// the chain reorganized away from it.
    BlockShaMissing,

    /// Any other storage failure.
    Other(String),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DbError::BlockShaMissing => write!(f, "block sha missing"),
            DbError::Other(ref e) => write!(f, "{}", e),
        }
    }
}

impl std::fmt::Debug for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DbError::BlockShaMissing => write!(f, "DbError(block sha missing)"),
            DbError::Other(ref e) => write!(f, "DbError({})", e),
        }
    }
}

/// The block chain store.  Only the lookups needed by the rescan engine are
/// part of the contract.
#[async_trait]
pub trait ChainDb: Send + Sync {
    /// Returns the chain height of the block with the given hash.
    async fn fetch_block_height_by_sha(&self, sha: &Hash) -> Result<i32, DbError>;

    /// Returns the hashes of the main chain blocks with heights in
    /// `[start, end)`.  The store may return a truncated window; callers
    /// fetch repeatedly until an empty window is returned.
    async fn fetch_height_range(&self, start: i32, end: i32) -> Result<Vec<Hash>, DbError>;

    /// Returns the block with the given hash, or `DbError::BlockShaMissing`
    /// when the hash is no longer part of the store.
    async fn fetch_block_by_sha(&self, sha: &Hash) -> Result<Block, DbError>;

    /// Returns the hash and height of the current best block.
    async fn newest_sha(&self) -> Result<(Hash, i32), DbError>;
}

/// Releases a block manager pause when dropped.
pub struct PauseGuard {
    unpause: Option<oneshot::Sender<()>>,
}

impl PauseGuard {
    /// Wraps the channel the block manager is waiting on to resume.  A
    /// `None` channel produces a guard that pauses nothing, which is useful
    /// for block manager implementations without a pause facility.
    pub fn new(unpause: Option<oneshot::Sender<()>>) -> PauseGuard {
        PauseGuard { unpause }
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        if let Some(unpause) = self.unpause.take() {
            let _ = unpause.send(());
        }
    }
}

/// The block manager.  `pause` grabs a brief exclusive window in which no
/// further blocks are connected; while the returned guard is held, tip
/// equality implies no new blocks were appended.
#[async_trait]
pub trait BlockManager: Send + Sync {
    async fn pause(&self) -> PauseGuard;
}

/// Extracts the payment addresses a public key script pays to.  Scripts that
/// cannot be parsed yield an empty list.
pub trait ScriptParser: Send + Sync {
    fn extract_pk_script_addrs(&self, pk_script: &[u8], params: &Params) -> Vec<Address>;
}

/// The already-existing dispatcher for standard (non-websocket) commands.
/// Unknown websocket methods fall through to it, and the help command
/// consults it for usage and method help text.
#[async_trait]
pub trait StandardRpcDispatcher: Send + Sync {
    /// Executes a standard command and returns its result or RPC error.
    async fn standard_cmd_result(
        &self,
        method: &str,
        params: &[serde_json::Value],
    ) -> (Option<serde_json::Value>, Option<RpcError>);

    /// Reports whether the dispatcher implements the given method.
    fn has_method(&self, method: &str) -> bool;

    /// Returns the one-line usage overview of every command, optionally
    /// including the websocket extension commands.
    fn rpc_usage(&self, include_websockets: bool) -> Result<String, RpcError>;

    /// Returns the help text for a single method.
    fn rpc_method_help(&self, method: &str) -> Result<String, RpcError>;
}

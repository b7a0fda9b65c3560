//! RPC Types.
//! Method names for the websocket extension commands, the server-initiated
//! notifications, and their JSON result structures.

/// Authenticates a websocket client against the server credentials.
pub const AUTHENTICATE_METHOD: &str = "authenticate";
/// Returns the usage overview or the help text of a single command.
pub const HELP_METHOD: &str = "help";
/// Returns the session id of the websocket connection.
pub const SESSION_METHOD: &str = "session";
/// Registers the client for block connected/disconnected notifications.
pub const NOTIFY_BLOCKS_METHOD: &str = "notifyblocks";
/// Removes the block notification registration.
pub const STOP_NOTIFY_BLOCKS_METHOD: &str = "stopnotifyblocks";
/// Registers the client for mempool transaction notifications.
pub const NOTIFY_NEW_TRANSACTIONS_METHOD: &str = "notifynewtransactions";
/// Removes the mempool transaction notification registration.
pub const STOP_NOTIFY_NEW_TRANSACTIONS_METHOD: &str = "stopnotifynewtransactions";
/// Registers the client for notifications of outputs paying to an address.
pub const NOTIFY_RECEIVED_METHOD: &str = "notifyreceived";
/// Removes address notification registrations.
pub const STOP_NOTIFY_RECEIVED_METHOD: &str = "stopnotifyreceived";
/// Registers the client for notifications of spends of watched outpoints.
pub const NOTIFY_SPENT_METHOD: &str = "notifyspent";
/// Removes outpoint spend notification registrations.
pub const STOP_NOTIFY_SPENT_METHOD: &str = "stopnotifyspent";
/// Rescans a historical block range for relevant transactions.
pub const RESCAN_METHOD: &str = "rescan";

/// Notification that a block has been connected to the main chain.
pub const BLOCK_CONNECTED_NTFN_METHOD: &str = "blockconnected";
/// Notification that a block has been disconnected from the main chain.
pub const BLOCK_DISCONNECTED_NTFN_METHOD: &str = "blockdisconnected";
/// Notification that a new transaction was accepted into the mempool.
pub const TX_ACCEPTED_NTFN_METHOD: &str = "txaccepted";
/// Verbose form of the mempool acceptance notification.
pub const TX_ACCEPTED_VERBOSE_NTFN_METHOD: &str = "txacceptedverbose";
/// Notification that a transaction pays to a watched address.
pub const RECV_TX_NTFN_METHOD: &str = "recvtx";
/// Notification that a transaction spends a watched outpoint.
pub const REDEEMING_TX_NTFN_METHOD: &str = "redeemingtx";
/// Periodic progress report of a running rescan.
pub const RESCAN_PROGRESS_NTFN_METHOD: &str = "rescanprogress";
/// Final notification of a finished rescan.
pub const RESCAN_FINISHED_NTFN_METHOD: &str = "rescanfinished";

/// The result of the session command.
#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
pub struct SessionResult {
    #[serde(rename = "sessionid")]
    pub session_id: u64,
}

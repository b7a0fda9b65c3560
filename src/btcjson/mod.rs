//! Package btcjson implements the bitcoin JSON-RPC wire types used by the
//! websocket RPC subsystem: requests, replies, typed websocket commands,
//! server-initiated notifications and the standard error codes.

mod chain_commands;
mod chain_notifications;
mod errors;
mod jsonrpc;
pub mod rpc_types;

pub use chain_commands::{
    parse_ws_command, AuthenticateCmd, ChainCommand, HelpCmd, NotifyNewTransactionsCmd,
    NotifyReceivedCmd, NotifySpentCmd, OutPoint, RescanCmd, StopNotifyReceivedCmd,
    StopNotifySpentCmd,
};
pub use chain_notifications::{
    block_details, create_tx_raw_result, new_block_connected_ntfn, new_block_disconnected_ntfn,
    new_recv_tx_ntfn, new_redeeming_tx_ntfn, new_rescan_finished_ntfn, new_rescan_progress_ntfn,
    new_tx_accepted_ntfn, new_tx_accepted_verbose_ntfn, BlockDetails, ScriptPubKeyResult,
    TxRawResult, Vin, Vout,
};
pub use errors::{
    rpc_decode_hex_error, RpcError, ERR_RPC_BLOCK_NOT_FOUND, ERR_RPC_DATABASE,
    ERR_RPC_DECODE_HEX_STRING, ERR_RPC_INTERNAL, ERR_RPC_INVALID_ADDRESS_OR_KEY,
    ERR_RPC_INVALID_PARAMETER, ERR_RPC_INVALID_PARAMS, ERR_RPC_METHOD_NOT_FOUND, ERR_RPC_PARSE,
};
pub use jsonrpc::{create_marshalled_reply, marshal_notification, Reply, Request};

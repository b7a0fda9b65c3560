//! Typed websocket extension commands and their positional parameter
//! parsing.

use super::{rpc_types, RpcError, ERR_RPC_INVALID_PARAMS};

/// A serialized transaction outpoint as it appears in command parameters.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct OutPoint {
    pub hash: String,
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuthenticateCmd {
    pub username: String,
    pub passphrase: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HelpCmd {
    pub command: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NotifyNewTransactionsCmd {
    pub verbose: Option<bool>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NotifyReceivedCmd {
    pub addresses: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StopNotifyReceivedCmd {
    pub addresses: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NotifySpentCmd {
    pub out_points: Vec<OutPoint>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StopNotifySpentCmd {
    pub out_points: Vec<OutPoint>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RescanCmd {
    pub begin_block: String,
    pub addresses: Vec<String>,
    pub out_points: Vec<OutPoint>,
    pub end_block: Option<String>,
}

/// A websocket extension command parsed into its concrete form.
#[derive(Clone, Debug, PartialEq)]
pub enum ChainCommand {
    Authenticate(AuthenticateCmd),
    Help(HelpCmd),
    Session,
    NotifyBlocks,
    StopNotifyBlocks,
    NotifyNewTransactions(NotifyNewTransactionsCmd),
    StopNotifyNewTransactions,
    NotifyReceived(NotifyReceivedCmd),
    StopNotifyReceived(StopNotifyReceivedCmd),
    NotifySpent(NotifySpentCmd),
    StopNotifySpent(StopNotifySpentCmd),
    Rescan(RescanCmd),
}

fn invalid_params(method: &str, err: serde_json::Error) -> RpcError {
    RpcError::new(
        ERR_RPC_INVALID_PARAMS,
        format!("Failed to parse params for method {}: {}", method, err),
    )
}

fn wrong_param_count(method: &str) -> RpcError {
    RpcError::new(
        ERR_RPC_INVALID_PARAMS,
        format!("Wrong number of params for method {}", method),
    )
}

fn required<T: serde::de::DeserializeOwned>(
    method: &str,
    params: &[serde_json::Value],
    idx: usize,
) -> Result<T, RpcError> {
    let value = params.get(idx).ok_or_else(|| wrong_param_count(method))?;

    serde_json::from_value(value.clone()).map_err(|e| invalid_params(method, e))
}

fn optional<T: serde::de::DeserializeOwned>(
    method: &str,
    params: &[serde_json::Value],
    idx: usize,
) -> Result<Option<T>, RpcError> {
    match params.get(idx) {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| invalid_params(method, e)),
    }
}

/// Parses the positional parameters of a websocket extension command into
/// its concrete command value.  Returns None when the method is not a
/// websocket extension so the caller can fall back to the standard command
/// dispatcher.
pub fn parse_ws_command(
    method: &str,
    params: &[serde_json::Value],
) -> Option<Result<ChainCommand, RpcError>> {
    let cmd = match method {
        rpc_types::AUTHENTICATE_METHOD => (|| {
            Ok(ChainCommand::Authenticate(AuthenticateCmd {
                username: required(method, params, 0)?,
                passphrase: required(method, params, 1)?,
            }))
        })(),

        rpc_types::HELP_METHOD => (|| {
            Ok(ChainCommand::Help(HelpCmd {
                command: optional(method, params, 0)?,
            }))
        })(),

        rpc_types::SESSION_METHOD => Ok(ChainCommand::Session),

        rpc_types::NOTIFY_BLOCKS_METHOD => Ok(ChainCommand::NotifyBlocks),

        rpc_types::STOP_NOTIFY_BLOCKS_METHOD => Ok(ChainCommand::StopNotifyBlocks),

        rpc_types::NOTIFY_NEW_TRANSACTIONS_METHOD => (|| {
            Ok(ChainCommand::NotifyNewTransactions(
                NotifyNewTransactionsCmd {
                    verbose: optional(method, params, 0)?,
                },
            ))
        })(),

        rpc_types::STOP_NOTIFY_NEW_TRANSACTIONS_METHOD => {
            Ok(ChainCommand::StopNotifyNewTransactions)
        }

        rpc_types::NOTIFY_RECEIVED_METHOD => (|| {
            Ok(ChainCommand::NotifyReceived(NotifyReceivedCmd {
                addresses: required(method, params, 0)?,
            }))
        })(),

        rpc_types::STOP_NOTIFY_RECEIVED_METHOD => (|| {
            Ok(ChainCommand::StopNotifyReceived(StopNotifyReceivedCmd {
                addresses: required(method, params, 0)?,
            }))
        })(),

        rpc_types::NOTIFY_SPENT_METHOD => (|| {
            Ok(ChainCommand::NotifySpent(NotifySpentCmd {
                out_points: required(method, params, 0)?,
            }))
        })(),

        rpc_types::STOP_NOTIFY_SPENT_METHOD => (|| {
            Ok(ChainCommand::StopNotifySpent(StopNotifySpentCmd {
                out_points: required(method, params, 0)?,
            }))
        })(),

        rpc_types::RESCAN_METHOD => (|| {
            Ok(ChainCommand::Rescan(RescanCmd {
                begin_block: required(method, params, 0)?,
                addresses: optional(method, params, 1)?.unwrap_or_default(),
                out_points: optional(method, params, 2)?.unwrap_or_default(),
                end_block: optional(method, params, 3)?,
            }))
        })(),

        _ => return None,
    };

    Some(cmd)
}

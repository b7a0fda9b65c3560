use {
    super::{client::WsClient, collaborators::StandardRpcDispatcher, rescan},
    crate::{
        btcjson::{
            self, rpc_types, ChainCommand, HelpCmd, NotifyNewTransactionsCmd, NotifyReceivedCmd,
            NotifySpentCmd, RpcError, StopNotifyReceivedCmd, StopNotifySpentCmd,
            ERR_RPC_INTERNAL, ERR_RPC_INVALID_ADDRESS_OR_KEY, ERR_RPC_INVALID_PARAMETER,
            ERR_RPC_METHOD_NOT_FOUND,
        },
        btcutil::Address,
        chaincfg::{chainhash::Hash, Params},
        wire,
    },
    std::sync::Arc,
};

/// Methods a limited (non-admin) user is authorized to call.
pub(crate) const RPC_LIMITED: &[&str] = &[
    // Websockets commands.
    "help",
    "notifyblocks",
    "notifynewtransactions",
    "notifyreceived",
    "notifyspent",
    "rescan",
    "session",
    "stopnotifyblocks",
    "stopnotifynewtransactions",
    "stopnotifyreceived",
    "stopnotifyspent",
    // Websockets AND HTTP/S commands.
    "getbestblockhash",
    "getblock",
    "getblockcount",
    "getblockhash",
    "getcurrentnet",
    "getdifficulty",
    "getinfo",
    "getnettotals",
    "getnetworkhashps",
    "getrawmempool",
    "getrawtransaction",
    "gettxout",
    "searchrawtransactions",
    "sendrawtransaction",
    "submitblock",
    "validateaddress",
    "verifymessage",
];

/// Websocket commands which should be run asynchronously to the main input
/// handler so long-running operations do not stall quick requests.
pub(crate) fn is_async_command(method: &str) -> bool {
    method == rpc_types::RESCAN_METHOD
}

/// Reports whether the method has a websocket-specific handler.  The
/// authenticate command is handled directly by the input handler and is
/// deliberately not part of this set.
pub(crate) fn is_ws_handler(method: &str) -> bool {
    matches!(
        method,
        rpc_types::HELP_METHOD
            | rpc_types::SESSION_METHOD
            | rpc_types::NOTIFY_BLOCKS_METHOD
            | rpc_types::STOP_NOTIFY_BLOCKS_METHOD
            | rpc_types::NOTIFY_NEW_TRANSACTIONS_METHOD
            | rpc_types::STOP_NOTIFY_NEW_TRANSACTIONS_METHOD
            | rpc_types::NOTIFY_RECEIVED_METHOD
            | rpc_types::STOP_NOTIFY_RECEIVED_METHOD
            | rpc_types::NOTIFY_SPENT_METHOD
            | rpc_types::STOP_NOTIFY_SPENT_METHOD
            | rpc_types::RESCAN_METHOD
    )
}

/// A JSON-RPC request parsed into its id, method and, for websocket
/// extension methods, the concrete command value.  A `None` command means
/// the method belongs to the standard command dispatcher.
pub struct ParsedRpcCmd {
    pub id: serde_json::Value,
    pub method: String,
    pub params: Vec<serde_json::Value>,
    pub cmd: Option<ChainCommand>,
}

/// Parses a raw JSON-RPC request into a concrete command, falling back to a
/// standard dispatcher pass-through for methods without a websocket handler.
/// Methods known to neither produce a method-not-found error.
pub(crate) fn parse_cmd(
    request: &btcjson::Request,
    standard_dispatcher: &dyn StandardRpcDispatcher,
) -> Result<ParsedRpcCmd, RpcError> {
    let cmd = match btcjson::parse_ws_command(&request.method, &request.params) {
        Some(Ok(cmd)) => Some(cmd),

        Some(Err(e)) => return Err(e),

        None => {
            if !standard_dispatcher.has_method(&request.method) {
                return Err(RpcError::new(
                    ERR_RPC_METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                ));
            }

            None
        }
    };

    Ok(ParsedRpcCmd {
        id: request.id.clone(),
        method: request.method.clone(),
        params: request.params.clone(),
        cmd,
    })
}

/// Invokes the websocket handler for the parsed command and returns its
/// result.  The caller is responsible for routing standard commands to the
/// standard dispatcher before calling this.
pub(crate) async fn execute_ws_handler(
    wsc: &Arc<WsClient>,
    parsed: &ParsedRpcCmd,
) -> Result<Option<serde_json::Value>, RpcError> {
    let cmd = match parsed.cmd {
        Some(ref cmd) => cmd,

        None => {
            return Err(RpcError::new(
                ERR_RPC_INTERNAL,
                format!("No websocket handler for command <{}>", parsed.method),
            ))
        }
    };

    match *cmd {
        ChainCommand::Help(ref cmd) => handle_websocket_help(wsc, cmd),
        ChainCommand::Session => handle_session(wsc),
        ChainCommand::NotifyBlocks => handle_notify_blocks(wsc).await,
        ChainCommand::StopNotifyBlocks => handle_stop_notify_blocks(wsc).await,
        ChainCommand::NotifyNewTransactions(ref cmd) => {
            handle_notify_new_transactions(wsc, cmd).await
        }
        ChainCommand::StopNotifyNewTransactions => handle_stop_notify_new_transactions(wsc).await,
        ChainCommand::NotifyReceived(ref cmd) => handle_notify_received(wsc, cmd).await,
        ChainCommand::StopNotifyReceived(ref cmd) => handle_stop_notify_received(wsc, cmd).await,
        ChainCommand::NotifySpent(ref cmd) => handle_notify_spent(wsc, cmd).await,
        ChainCommand::StopNotifySpent(ref cmd) => handle_stop_notify_spent(wsc, cmd).await,
        ChainCommand::Rescan(ref cmd) => rescan::handle_rescan(wsc, cmd).await,

        // Authenticate is handled by the input handler before dispatch.
        ChainCommand::Authenticate(_) => Err(RpcError::new(
            ERR_RPC_INTERNAL,
            "Unexpected authenticate command".into(),
        )),
    }
}

/// Implements the help command for websocket connections.
fn handle_websocket_help(
    wsc: &Arc<WsClient>,
    cmd: &HelpCmd,
) -> Result<Option<serde_json::Value>, RpcError> {
    let dispatcher = &wsc.server.standard_dispatcher;

    // Provide a usage overview of all commands when no specific command was
    // specified.
    let command = cmd.command.as_deref().unwrap_or("");
    if command.is_empty() {
        let usage = dispatcher.rpc_usage(true)?;
        return Ok(Some(serde_json::Value::String(usage)));
    }

    // Check that the command asked for is supported and implemented.  Search
    // the list of websocket handlers as well as the main list of handlers
    // since help should only be provided for those cases.
    if !is_ws_handler(command) && !dispatcher.has_method(command) {
        return Err(RpcError::new(
            ERR_RPC_INVALID_PARAMETER,
            format!("Unknown command: {}", command),
        ));
    }

    // Get the help for the command.
    let help = dispatcher.rpc_method_help(command)?;
    Ok(Some(serde_json::Value::String(help)))
}

/// Implements the session command extension for websocket connections.
fn handle_session(wsc: &Arc<WsClient>) -> Result<Option<serde_json::Value>, RpcError> {
    let result = rpc_types::SessionResult {
        session_id: wsc.session_id(),
    };

    serde_json::to_value(result)
        .map(Some)
        .map_err(|e| RpcError::new(ERR_RPC_INTERNAL, format!("Failed to marshal session: {}", e)))
}

/// Implements the notifyblocks command extension for websocket connections.
async fn handle_notify_blocks(wsc: &Arc<WsClient>) -> Result<Option<serde_json::Value>, RpcError> {
    wsc.server.ntfn_mgr.register_block_updates(wsc.clone()).await;
    Ok(None)
}

/// Implements the stopnotifyblocks command extension for websocket
/// connections.
async fn handle_stop_notify_blocks(
    wsc: &Arc<WsClient>,
) -> Result<Option<serde_json::Value>, RpcError> {
    wsc.server
        .ntfn_mgr
        .unregister_block_updates(wsc.clone())
        .await;
    Ok(None)
}

/// Implements the notifynewtransactions command extension for websocket
/// connections.
async fn handle_notify_new_transactions(
    wsc: &Arc<WsClient>,
    cmd: &NotifyNewTransactionsCmd,
) -> Result<Option<serde_json::Value>, RpcError> {
    wsc.set_verbose_tx_updates(cmd.verbose.unwrap_or(false));
    wsc.server
        .ntfn_mgr
        .register_new_mempool_txs_updates(wsc.clone())
        .await;
    Ok(None)
}

/// Implements the stopnotifynewtransactions command extension for websocket
/// connections.
async fn handle_stop_notify_new_transactions(
    wsc: &Arc<WsClient>,
) -> Result<Option<serde_json::Value>, RpcError> {
    wsc.server
        .ntfn_mgr
        .unregister_new_mempool_txs_updates(wsc.clone())
        .await;
    Ok(None)
}

/// Implements the notifyreceived command extension for websocket
/// connections.
async fn handle_notify_received(
    wsc: &Arc<WsClient>,
    cmd: &NotifyReceivedCmd,
) -> Result<Option<serde_json::Value>, RpcError> {
    // Decode addresses to validate input, but the strings slice is used
    // directly if these are all ok.
    check_address_validity(&cmd.addresses, &wsc.server.config.chain_params)?;

    wsc.server
        .ntfn_mgr
        .register_tx_out_address_requests(wsc.clone(), cmd.addresses.clone())
        .await;
    Ok(None)
}

/// Implements the stopnotifyreceived command extension for websocket
/// connections.
async fn handle_stop_notify_received(
    wsc: &Arc<WsClient>,
    cmd: &StopNotifyReceivedCmd,
) -> Result<Option<serde_json::Value>, RpcError> {
    // Decode addresses to validate input, but the strings slice is used
    // directly if these are all ok.
    check_address_validity(&cmd.addresses, &wsc.server.config.chain_params)?;

    for addr in cmd.addresses.iter() {
        wsc.server
            .ntfn_mgr
            .unregister_tx_out_address_request(wsc.clone(), addr.clone())
            .await;
    }

    Ok(None)
}

/// Implements the notifyspent command extension for websocket connections.
async fn handle_notify_spent(
    wsc: &Arc<WsClient>,
    cmd: &NotifySpentCmd,
) -> Result<Option<serde_json::Value>, RpcError> {
    let outpoints = deserialize_outpoints(&cmd.out_points)?;

    wsc.server
        .ntfn_mgr
        .register_spent_requests(wsc.clone(), outpoints)
        .await;
    Ok(None)
}

/// Implements the stopnotifyspent command extension for websocket
/// connections.
async fn handle_stop_notify_spent(
    wsc: &Arc<WsClient>,
    cmd: &StopNotifySpentCmd,
) -> Result<Option<serde_json::Value>, RpcError> {
    let outpoints = deserialize_outpoints(&cmd.out_points)?;

    for outpoint in outpoints {
        wsc.server
            .ntfn_mgr
            .unregister_spent_request(wsc.clone(), outpoint)
            .await;
    }

    Ok(None)
}

/// Checks the validity of each address in the passed string slice.  It does
/// this by attempting to decode each address using the current active
/// network parameters.  If any single address fails to decode properly, the
/// function returns an error.
pub(crate) fn check_address_validity(addrs: &[String], params: &Params) -> Result<(), RpcError> {
    for addr in addrs {
        if Address::decode(addr, params).is_err() {
            return Err(RpcError::new(
                ERR_RPC_INVALID_ADDRESS_OR_KEY,
                format!("Invalid address or key: {}", addr),
            ));
        }
    }

    Ok(())
}

/// Deserializes each serialized outpoint.
pub(crate) fn deserialize_outpoints(
    serialized_outs: &[btcjson::OutPoint],
) -> Result<Vec<wire::OutPoint>, RpcError> {
    let mut outpoints = Vec::with_capacity(serialized_outs.len());
    for serialized in serialized_outs {
        let hash = Hash::new_from_str(&serialized.hash)
            .map_err(|_| btcjson::rpc_decode_hex_error(&serialized.hash))?;
        outpoints.push(wire::OutPoint::new(hash, serialized.index));
    }

    Ok(outpoints)
}

//! Builders for the server-initiated chain notifications.  Each builder
//! marshals the notification once into a JSON byte buffer that is then
//! queued to every interested client.

use {
    super::{jsonrpc, rpc_types},
    crate::{
        btcutil::{Amount, Block, Tx},
        chaincfg::Params,
    },
    serde_json::json,
};

/// Block context included in transaction notifications for mined
/// transactions.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct BlockDetails {
    pub height: i32,
    pub hash: String,
    pub index: i32,
    pub time: i64,
}

/// Creates the block details for a transaction at the given index of a
/// block, or None when the transaction is unmined.
pub fn block_details(block: Option<&Block>, tx_index: i32) -> Option<BlockDetails> {
    block.map(|block| BlockDetails {
        height: block.height(),
        hash: block.hash().string(),
        index: tx_index,
        time: block.timestamp(),
    })
}

/// The decoded transaction carried by the verbose mempool acceptance
/// notification.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub struct TxRawResult {
    pub hex: String,
    pub txid: String,
    pub version: i32,
    pub locktime: u32,
    pub vin: Vec<Vin>,
    pub vout: Vec<Vout>,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub struct Vin {
    pub txid: String,
    pub vout: u32,
    pub sequence: u32,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub struct Vout {
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKeyResult,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub struct ScriptPubKeyResult {
    pub hex: String,
}

/// Decodes a transaction into the raw result form used by the verbose
/// mempool acceptance notification.
pub fn create_tx_raw_result(_params: &Params, tx: &Tx) -> TxRawResult {
    let msg_tx = tx.msg_tx();

    let vin = msg_tx
        .tx_in
        .iter()
        .map(|txin| Vin {
            txid: txin.previous_out_point.hash.string(),
            vout: txin.previous_out_point.index,
            sequence: txin.sequence,
        })
        .collect();

    let vout = msg_tx
        .tx_out
        .iter()
        .enumerate()
        .map(|(n, txout)| Vout {
            value: Amount(txout.value).to_btc(),
            n: n as u32,
            script_pub_key: ScriptPubKeyResult {
                hex: hex::encode(&txout.pk_script),
            },
        })
        .collect();

    TxRawResult {
        hex: tx.hex(),
        txid: tx.hash().string(),
        version: msg_tx.version,
        locktime: msg_tx.lock_time,
        vin,
        vout,
    }
}

/// Marshals a blockconnected notification with the block hash, height and
/// timestamp.
pub fn new_block_connected_ntfn(
    hash: String,
    height: i32,
    time: i64,
) -> Result<Vec<u8>, serde_json::Error> {
    jsonrpc::marshal_notification(
        rpc_types::BLOCK_CONNECTED_NTFN_METHOD,
        &[json!(hash), json!(height), json!(time)],
    )
}

/// Marshals a blockdisconnected notification with the block hash, height and
/// timestamp.
pub fn new_block_disconnected_ntfn(
    hash: String,
    height: i32,
    time: i64,
) -> Result<Vec<u8>, serde_json::Error> {
    jsonrpc::marshal_notification(
        rpc_types::BLOCK_DISCONNECTED_NTFN_METHOD,
        &[json!(hash), json!(height), json!(time)],
    )
}

/// Marshals a txaccepted notification with the transaction hash and the
/// total output value in bitcoin.
pub fn new_tx_accepted_ntfn(tx_hash: String, amount: f64) -> Result<Vec<u8>, serde_json::Error> {
    jsonrpc::marshal_notification(
        rpc_types::TX_ACCEPTED_NTFN_METHOD,
        &[json!(tx_hash), json!(amount)],
    )
}

/// Marshals a txacceptedverbose notification with the decoded transaction.
pub fn new_tx_accepted_verbose_ntfn(
    raw_tx: &TxRawResult,
) -> Result<Vec<u8>, serde_json::Error> {
    jsonrpc::marshal_notification(
        rpc_types::TX_ACCEPTED_VERBOSE_NTFN_METHOD,
        &[serde_json::to_value(raw_tx)?],
    )
}

/// Marshals a recvtx notification with the serialized transaction and the
/// block details when mined.
pub fn new_recv_tx_ntfn(
    tx_hex: &str,
    block: Option<&BlockDetails>,
) -> Result<Vec<u8>, serde_json::Error> {
    jsonrpc::marshal_notification(
        rpc_types::RECV_TX_NTFN_METHOD,
        &[json!(tx_hex), serde_json::to_value(block)?],
    )
}

/// Marshals a redeemingtx notification with the serialized transaction and
/// the block details when mined.
pub fn new_redeeming_tx_ntfn(
    tx_hex: &str,
    block: Option<&BlockDetails>,
) -> Result<Vec<u8>, serde_json::Error> {
    jsonrpc::marshal_notification(
        rpc_types::REDEEMING_TX_NTFN_METHOD,
        &[json!(tx_hex), serde_json::to_value(block)?],
    )
}

/// Marshals a rescanprogress notification with the hash, height and time of
/// the last processed block.
pub fn new_rescan_progress_ntfn(
    hash: String,
    height: i32,
    time: i64,
) -> Result<Vec<u8>, serde_json::Error> {
    jsonrpc::marshal_notification(
        rpc_types::RESCAN_PROGRESS_NTFN_METHOD,
        &[json!(hash), json!(height), json!(time)],
    )
}

/// Marshals a rescanfinished notification with the hash, height and time of
/// the last processed block.
pub fn new_rescan_finished_ntfn(
    hash: String,
    height: i32,
    time: i64,
) -> Result<Vec<u8>, serde_json::Error> {
    jsonrpc::marshal_notification(
        rpc_types::RESCAN_FINISHED_NTFN_METHOD,
        &[json!(hash), json!(height), json!(time)],
    )
}

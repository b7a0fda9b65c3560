//! End-to-end and unit tests for the websocket server: the queue relay, the
//! notification manager indices, the client pipeline (authentication,
//! authorization, dispatch) and the rescan engine, driven over in-memory
//! frame channels standing in for the websocket split halves.

use {
    super::{
        client::WsClient,
        collaborators::{
            BlockManager, ChainDb, DbError, PauseGuard, ScriptParser, StandardRpcDispatcher,
        },
        config::Config,
        queue,
        rescan,
        server::RpcServer,
    },
    crate::{
        btcjson::{self, RescanCmd, RpcError, ERR_RPC_INVALID_PARAMETER, ERR_RPC_METHOD_NOT_FOUND},
        btcutil::{hash160, Address, Block, Tx},
        chaincfg::{chainhash::Hash, Params, MAIN_NET_PARAMS},
        wire::{BlockHeader, MsgBlock, MsgTx, OutPoint, TxIn, TxOut},
    },
    async_trait::async_trait,
    futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
    futures::StreamExt,
    serde_json::{json, Value},
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::{Arc, Mutex},
    },
    tokio::time::{sleep, timeout, Duration},
    tokio_tungstenite::tungstenite::{Error as WsError, Message},
    tokio_util::sync::CancellationToken,
};

const TEST_USER: &str = "rpcuser";
const TEST_PASS: &str = "rpcpass";
const LIMIT_USER: &str = "limituser";
const LIMIT_PASS: &str = "limitpass";

// ---------------------------------------------------------------------------
// Fake collaborators.

struct FakeChainDb {
    blocks: Mutex<HashMap<Hash, Block>>,
    by_height: Mutex<BTreeMap<i32, Hash>>,

    // Hashes that fail their next block fetch with BlockShaMissing, used to
    // simulate a reorg window.
    missing_once: Mutex<HashSet<Hash>>,
}

impl FakeChainDb {
    fn new() -> FakeChainDb {
        FakeChainDb {
            blocks: Mutex::new(HashMap::new()),
            by_height: Mutex::new(BTreeMap::new()),
            missing_once: Mutex::new(HashSet::new()),
        }
    }

    fn add_block(&self, block: Block) {
        self.by_height
            .lock()
            .unwrap()
            .insert(block.height(), *block.hash());
        self.blocks.lock().unwrap().insert(*block.hash(), block);
    }

    fn fail_next_fetch(&self, hash: Hash) {
        self.missing_once.lock().unwrap().insert(hash);
    }
}

#[async_trait]
impl ChainDb for FakeChainDb {
    async fn fetch_block_height_by_sha(&self, sha: &Hash) -> Result<i32, DbError> {
        match self.blocks.lock().unwrap().get(sha) {
            Some(block) => Ok(block.height()),
            None => Err(DbError::Other("block not found".into())),
        }
    }

    async fn fetch_height_range(&self, start: i32, end: i32) -> Result<Vec<Hash>, DbError> {
        Ok(self
            .by_height
            .lock()
            .unwrap()
            .range(start..end)
            .map(|(_, hash)| *hash)
            .collect())
    }

    async fn fetch_block_by_sha(&self, sha: &Hash) -> Result<Block, DbError> {
        if self.missing_once.lock().unwrap().remove(sha) {
            return Err(DbError::BlockShaMissing);
        }

        match self.blocks.lock().unwrap().get(sha) {
            Some(block) => Ok(block.clone()),
            None => Err(DbError::BlockShaMissing),
        }
    }

    async fn newest_sha(&self) -> Result<(Hash, i32), DbError> {
        match self.by_height.lock().unwrap().iter().next_back() {
            Some((height, hash)) => Ok((*hash, *height)),
            None => Err(DbError::Other("empty chain".into())),
        }
    }
}

struct FakeBlockManager;

#[async_trait]
impl BlockManager for FakeBlockManager {
    async fn pause(&self) -> PauseGuard {
        PauseGuard::new(None)
    }
}

/// Interprets a pk script as the utf8 encoding of a payment address, the
/// narrow contract the router and rescan need from script parsing.
struct FakeScriptParser;

impl ScriptParser for FakeScriptParser {
    fn extract_pk_script_addrs(&self, pk_script: &[u8], params: &Params) -> Vec<Address> {
        let encoded = match std::str::from_utf8(pk_script) {
            Ok(encoded) if !encoded.is_empty() => encoded,
            _ => return Vec::new(),
        };

        match Address::decode(encoded, params) {
            Ok(addr) => vec![addr],
            Err(_) => Vec::new(),
        }
    }
}

struct FakeDispatcher;

#[async_trait]
impl StandardRpcDispatcher for FakeDispatcher {
    async fn standard_cmd_result(
        &self,
        method: &str,
        _params: &[Value],
    ) -> (Option<Value>, Option<RpcError>) {
        match method {
            "getblockcount" => (Some(json!(123)), None),
            _ => (
                None,
                Some(RpcError::new(
                    ERR_RPC_METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                )),
            ),
        }
    }

    fn has_method(&self, method: &str) -> bool {
        matches!(method, "getblockcount" | "getbestblockhash" | "stop")
    }

    fn rpc_usage(&self, _include_websockets: bool) -> Result<String, RpcError> {
        Ok("usage overview".into())
    }

    fn rpc_method_help(&self, method: &str) -> Result<String, RpcError> {
        Ok(format!("help for {}", method))
    }
}

// ---------------------------------------------------------------------------
// Harness.

fn test_config() -> Config {
    Config {
        rpc_max_websockets: 25,
        auth_sha: Config::auth_digest(TEST_USER, TEST_PASS),
        limit_auth_sha: Config::auth_digest(LIMIT_USER, LIMIT_PASS),
        chain_params: MAIN_NET_PARAMS,
        send_buffer_size: 50,
    }
}

fn new_test_server(db: Arc<FakeChainDb>, config: Config) -> Arc<RpcServer> {
    let server = RpcServer::new(
        config,
        db,
        Arc::new(FakeBlockManager),
        Arc::new(FakeScriptParser),
        Arc::new(FakeDispatcher),
    );
    server.start();
    server
}

/// The test side of an in-memory frame channel pair.
struct TestConn {
    to_server: UnboundedSender<Result<Message, WsError>>,
    from_server: UnboundedReceiver<Message>,
}

impl TestConn {
    fn send_request(&self, id: Value, method: &str, params: Value) {
        let raw = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.to_server
            .unbounded_send(Ok(Message::Text(raw.to_string())))
            .expect("connection closed");
    }

    fn send_raw(&self, raw: &str) {
        self.to_server
            .unbounded_send(Ok(Message::Text(raw.to_string())))
            .expect("connection closed");
    }

    async fn next_json(&mut self) -> Value {
        let msg = timeout(Duration::from_secs(5), self.from_server.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed");

        match msg {
            Message::Text(text) => serde_json::from_str(&text).expect("invalid json frame"),
            other => panic!("unexpected frame type: {:?}", other),
        }
    }

    /// Waits for the server to close the connection, discarding any frames
    /// still in flight.
    async fn wait_closed(&mut self) {
        loop {
            match timeout(Duration::from_secs(5), self.from_server.next())
                .await
                .expect("timed out waiting for close")
            {
                Some(_) => continue,
                None => return,
            }
        }
    }

    /// Asserts that no frame arrives within a short window.
    async fn assert_no_frame(&mut self) {
        if let Ok(frame) = timeout(Duration::from_millis(100), self.from_server.next()).await {
            panic!("unexpected frame: {:?}", frame);
        }
    }
}

/// Spawns a full connection lifecycle through the server glue.
fn connect(server: &Arc<RpcServer>, authenticated: bool, is_admin: bool) -> TestConn {
    let (to_server_tx, to_server_rx) = unbounded::<Result<Message, WsError>>();
    let (from_server_tx, from_server_rx) = unbounded::<Message>();

    let server = server.clone();
    tokio::spawn(async move {
        server
            .websocket_handler(
                to_server_rx,
                from_server_tx,
                "127.0.0.1:18334".into(),
                authenticated,
                is_admin,
            )
            .await;
    });

    TestConn {
        to_server: to_server_tx,
        from_server: from_server_rx,
    }
}

/// A directly-constructed client whose pipeline is running but which skips
/// the server glue, for driving the router and rescan engine.
struct DirectClient {
    client: Arc<WsClient>,
    conn: TestConn,
}

fn direct_client(server: &Arc<RpcServer>) -> DirectClient {
    let (to_server_tx, to_server_rx) = unbounded::<Result<Message, WsError>>();
    let (from_server_tx, from_server_rx) = unbounded::<Message>();

    let client = WsClient::new(server.clone(), "127.0.0.1:18335".into(), true, true);
    client.start(to_server_rx, from_server_tx);

    DirectClient {
        client,
        conn: TestConn {
            to_server: to_server_tx,
            from_server: from_server_rx,
        },
    }
}

async fn wait_for_num_clients(server: &Arc<RpcServer>, want: usize) {
    for _ in 0..500 {
        if server.notification_manager().num_clients().await == want {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {} clients", want);
}

fn make_block(height: i32, prev: &Hash, txs: Vec<MsgTx>, time: i64) -> Block {
    let header = BlockHeader {
        version: 1,
        prev_block: *prev,
        merkle_root: Hash::default(),
        timestamp: time,
        bits: 0x1d00ffff,
        nonce: height as u32,
    };

    let mut msg_block = MsgBlock::new(header);
    for tx in txs {
        msg_block.add_transaction(tx);
    }

    Block::new(msg_block, height)
}

fn pay_to(addr: &str, value: i64) -> TxOut {
    TxOut::new(value, addr.as_bytes().to_vec())
}

fn spend(op: OutPoint) -> TxIn {
    TxIn::new(op, vec![0x00])
}

fn test_address(seed: &[u8]) -> String {
    Address::new_pub_key_hash(hash160(seed), &MAIN_NET_PARAMS).encode_address()
}

/// Builds a linear chain of empty blocks starting at the genesis-like height
/// zero and registers every block with the store.
fn build_chain(db: &FakeChainDb, len: i32) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut prev = Hash::default();

    for height in 0..len {
        let block = make_block(height, &prev, vec![MsgTx::new()], 1_700_000_000 + height as i64);
        prev = *block.hash();
        db.add_block(block.clone());
        blocks.push(block);
    }

    blocks
}

// ---------------------------------------------------------------------------
// Queue relay.

#[tokio::test]
async fn queue_relay_preserves_fifo_without_blocking_publisher() {
    let (in_tx, in_rx) = tokio::sync::mpsc::channel::<u32>(1);
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<u32>(1);
    let quit = CancellationToken::new();

    tokio::spawn(queue::queue_handler(in_rx, out_tx, quit.clone()));

    // The consumer is not reading yet; all sends must still complete
    // promptly because the relay buffers internally.
    for i in 0..100u32 {
        timeout(Duration::from_secs(1), in_tx.send(i))
            .await
            .expect("publisher blocked on relay")
            .expect("relay gone");
    }

    for want in 0..100u32 {
        let got = timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .expect("timed out draining relay")
            .expect("relay closed early");
        assert_eq!(got, want, "relay broke FIFO ordering");
    }

    // Quit drops the output and discards whatever is left queued.
    in_tx.send(1000).await.expect("relay gone");
    quit.cancel();
    loop {
        match timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .expect("timed out waiting for relay shutdown")
        {
            Some(_) => continue,
            None => break,
        }
    }
}

#[tokio::test]
async fn queue_relay_closes_output_when_input_closes() {
    let (in_tx, in_rx) = tokio::sync::mpsc::channel::<u32>(1);
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<u32>(1);

    tokio::spawn(queue::queue_handler(in_rx, out_tx, CancellationToken::new()));

    in_tx.send(7).await.expect("relay gone");
    drop(in_tx);

    assert_eq!(out_rx.recv().await, Some(7));
    assert_eq!(out_rx.recv().await, None);
}

// ---------------------------------------------------------------------------
// Notification routing.

#[tokio::test]
async fn block_fanout_to_all_subscribers() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut c1 = direct_client(&server);
    let mut c2 = direct_client(&server);

    let mgr = server.notification_manager();
    mgr.register_block_updates(c1.client.clone()).await;
    mgr.register_block_updates(c2.client.clone()).await;

    let block = make_block(100, &Hash::default(), vec![MsgTx::new()], 1_700_000_000);
    mgr.notify_block_connected(block.clone()).await;

    for conn in [&mut c1.conn, &mut c2.conn] {
        let ntfn = conn.next_json().await;
        assert_eq!(ntfn["method"], json!("blockconnected"));
        assert_eq!(ntfn["params"][0], json!(block.hash().string()));
        assert_eq!(ntfn["params"][1], json!(100));
        assert_eq!(ntfn["params"][2], json!(1_700_000_000i64));
        assert_eq!(ntfn["id"], Value::Null);
    }

    // A follow-up event arrives next, proving exactly one blockconnected
    // frame was queued per client.
    mgr.notify_block_disconnected(block).await;
    for conn in [&mut c1.conn, &mut c2.conn] {
        let ntfn = conn.next_json().await;
        assert_eq!(ntfn["method"], json!("blockdisconnected"));
    }
}

#[tokio::test]
async fn address_receive_registers_auto_spent_watch() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut c = direct_client(&server);
    let addr = test_address(b"scenario two key");

    let mgr = server.notification_manager();
    mgr.register_tx_out_address_requests(c.client.clone(), vec![addr.clone()])
        .await;

    // A mempool transaction pays the watched address at output index 0.
    let mut msg_t1 = MsgTx::new();
    msg_t1.add_tx_out(pay_to(&addr, 5_000));
    let t1 = Tx::new(msg_t1);
    mgr.notify_mempool_tx(t1.clone(), true).await;

    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("recvtx"));
    assert_eq!(ntfn["params"][0], json!(t1.hex()));
    // Unmined: no block details.
    assert_eq!(ntfn["params"][1], Value::Null);

    // The router auto-registered a spent watch on the new outpoint.
    let watched = OutPoint::new(*t1.hash(), 0);
    assert!(c.client.spent_requests.lock().unwrap().contains(&watched));

    // A later block spends the watched outpoint.
    let mut msg_t2 = MsgTx::new();
    msg_t2.add_tx_in(spend(watched));
    msg_t2.add_tx_out(pay_to(&test_address(b"elsewhere"), 4_000));
    let block = make_block(101, &Hash::default(), vec![msg_t2.clone()], 1_700_000_600);
    let t2 = Tx::new(msg_t2);
    mgr.notify_block_connected(block.clone()).await;

    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("redeemingtx"));
    assert_eq!(ntfn["params"][0], json!(t2.hex()));
    assert_eq!(ntfn["params"][1]["height"], json!(101));
    assert_eq!(ntfn["params"][1]["hash"], json!(block.hash().string()));

    // The confirmed spend consumed the one-shot watch.
    assert!(c.client.spent_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn mempool_spend_keeps_spent_watch_alive() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut c = direct_client(&server);
    let mgr = server.notification_manager();

    let watched = OutPoint::new(*Tx::new(MsgTx::new()).hash(), 3);
    mgr.register_spent_requests(c.client.clone(), vec![watched])
        .await;

    // Spend observed in the mempool: notify but keep the watch.
    let mut msg_tx = MsgTx::new();
    msg_tx.add_tx_in(spend(watched));
    mgr.notify_mempool_tx(Tx::new(msg_tx), true).await;

    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("redeemingtx"));
    assert_eq!(ntfn["params"][1], Value::Null);

    assert!(c.client.spent_requests.lock().unwrap().contains(&watched));
}

#[tokio::test]
async fn verbose_and_compact_mempool_notifications() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut compact = direct_client(&server);
    let mut verbose = direct_client(&server);
    verbose.client.set_verbose_tx_updates(true);

    let mgr = server.notification_manager();
    mgr.register_new_mempool_txs_updates(compact.client.clone())
        .await;
    mgr.register_new_mempool_txs_updates(verbose.client.clone())
        .await;

    let mut msg_tx = MsgTx::new();
    msg_tx.add_tx_out(pay_to(&test_address(b"verbose test"), 100));
    msg_tx.add_tx_out(pay_to(&test_address(b"verbose test 2"), 200));
    let tx = Tx::new(msg_tx);
    mgr.notify_mempool_tx(tx.clone(), true).await;

    let ntfn = compact.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("txaccepted"));
    assert_eq!(ntfn["params"][0], json!(tx.hash().string()));
    assert_eq!(ntfn["params"][1], json!(300f64 / 1e8));

    let ntfn = verbose.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("txacceptedverbose"));
    assert_eq!(ntfn["params"][0]["txid"], json!(tx.hash().string()));
    assert_eq!(ntfn["params"][0]["vout"][1]["value"], json!(200f64 / 1e8));
}

#[tokio::test]
async fn transactions_added_during_reorg_are_not_announced() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut c = direct_client(&server);
    let mgr = server.notification_manager();
    mgr.register_new_mempool_txs_updates(c.client.clone()).await;

    // is_new false: the transaction re-entered the mempool during a reorg.
    let mut msg_tx = MsgTx::new();
    msg_tx.add_tx_out(pay_to(&test_address(b"reorg readd"), 900));
    mgr.notify_mempool_tx(Tx::new(msg_tx), false).await;

    c.conn.assert_no_frame().await;
}

#[tokio::test]
async fn one_notification_per_transaction_despite_multiple_matches() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut c = direct_client(&server);
    let addr = test_address(b"dedup key");

    let mgr = server.notification_manager();
    mgr.register_tx_out_address_requests(c.client.clone(), vec![addr.clone()])
        .await;
    mgr.register_block_updates(c.client.clone()).await;

    // Two outputs of the same transaction pay the same watched address.
    let mut msg_tx = MsgTx::new();
    msg_tx.add_tx_out(pay_to(&addr, 1_000));
    msg_tx.add_tx_out(pay_to(&addr, 2_000));
    mgr.notify_mempool_tx(Tx::new(msg_tx), false).await;

    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("recvtx"));

    // The next frame is the marker block, not a duplicate recvtx.
    let block = make_block(5, &Hash::default(), vec![MsgTx::new()], 1_700_000_100);
    mgr.notify_block_connected(block).await;
    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("blockconnected"));
}

#[tokio::test]
async fn register_unregister_round_trips_and_duplicate_unregister() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut c = direct_client(&server);
    let addr = test_address(b"round trip");
    let op = OutPoint::new(*Tx::new(MsgTx::new()).hash(), 0);

    let mgr = server.notification_manager();
    mgr.register_spent_requests(c.client.clone(), vec![op]).await;
    mgr.register_tx_out_address_requests(c.client.clone(), vec![addr.clone()])
        .await;
    mgr.unregister_spent_request(c.client.clone(), op).await;
    mgr.unregister_tx_out_address_request(c.client.clone(), addr.clone())
        .await;

    // Duplicate unregistrations log a warning but must not disturb anything.
    mgr.unregister_spent_request(c.client.clone(), op).await;
    mgr.unregister_tx_out_address_request(c.client.clone(), addr.clone())
        .await;

    // Neither a spend of the outpoint nor a payment to the address notifies.
    let mut msg_tx = MsgTx::new();
    msg_tx.add_tx_in(spend(op));
    msg_tx.add_tx_out(pay_to(&addr, 77));
    mgr.notify_mempool_tx(Tx::new(msg_tx), false).await;

    c.conn.assert_no_frame().await;
    assert!(c.client.spent_requests.lock().unwrap().is_empty());
    assert!(c.client.addr_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unregister_client_drops_every_subscription() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut c = direct_client(&server);
    let mut witness = direct_client(&server);

    let addr = test_address(b"cleanup");
    let op = OutPoint::new(*Tx::new(MsgTx::new()).hash(), 9);

    let mgr = server.notification_manager();
    mgr.add_client(c.client.clone()).await;
    mgr.register_block_updates(c.client.clone()).await;
    mgr.register_new_mempool_txs_updates(c.client.clone()).await;
    mgr.register_spent_requests(c.client.clone(), vec![op]).await;
    mgr.register_tx_out_address_requests(c.client.clone(), vec![addr.clone()])
        .await;
    mgr.register_block_updates(witness.client.clone()).await;

    mgr.remove_client(c.client.clone()).await;

    // After removal the mirror sets are empty and no event reaches the
    // removed client, while the witness still sees block events.
    let mut msg_tx = MsgTx::new();
    msg_tx.add_tx_in(spend(op));
    msg_tx.add_tx_out(pay_to(&addr, 50));
    let block = make_block(7, &Hash::default(), vec![msg_tx], 1_700_000_200);
    mgr.notify_block_connected(block).await;

    let ntfn = witness.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("blockconnected"));

    c.conn.assert_no_frame().await;
    assert!(c.client.spent_requests.lock().unwrap().is_empty());
    assert!(c.client.addr_requests.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Client pipeline: authentication and authorization.

#[tokio::test]
async fn first_message_must_be_authenticate() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, false, false);
    conn.send_request(json!(1), "notifyblocks", json!([]));

    // The server closes the socket without replying.
    conn.wait_closed().await;
}

#[tokio::test]
async fn authentication_bad_credentials_disconnects() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, false, false);
    conn.send_request(json!(1), "authenticate", json!([TEST_USER, "wrong"]));
    conn.wait_closed().await;
}

#[tokio::test]
async fn authentication_garbage_disconnects() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, false, false);
    conn.send_raw("{not json");
    conn.wait_closed().await;
}

#[tokio::test]
async fn authentication_success_then_second_authenticate_disconnects() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, false, false);
    conn.send_request(json!(1), "authenticate", json!([TEST_USER, TEST_PASS]));

    let reply = conn.next_json().await;
    assert_eq!(reply["id"], json!(1));
    assert_eq!(reply["result"], Value::Null);
    assert_eq!(reply["error"], Value::Null);

    conn.send_request(json!(2), "authenticate", json!([TEST_USER, TEST_PASS]));
    conn.wait_closed().await;
}

#[tokio::test]
async fn limited_user_is_restricted_to_allow_list() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, false, false);
    conn.send_request(json!(1), "authenticate", json!([LIMIT_USER, LIMIT_PASS]));
    let reply = conn.next_json().await;
    assert_eq!(reply["error"], Value::Null);

    // A method outside the allow-list is rejected without being dispatched.
    conn.send_request(json!(2), "stop", json!([]));
    let reply = conn.next_json().await;
    assert_eq!(reply["id"], json!(2));
    assert_eq!(
        reply["error"]["message"],
        json!("limited user not authorized for this method")
    );

    // Allowed methods still work.
    conn.send_request(json!(3), "getblockcount", json!([]));
    let reply = conn.next_json().await;
    assert_eq!(reply["result"], json!(123));
    assert_eq!(reply["error"], Value::Null);
}

#[tokio::test]
async fn requests_without_id_get_no_reply() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, true, true);
    conn.send_request(Value::Null, "getblockcount", json!([]));
    conn.assert_no_frame().await;

    // A regular request still round-trips afterwards.
    conn.send_request(json!(5), "getblockcount", json!([]));
    let reply = conn.next_json().await;
    assert_eq!(reply["id"], json!(5));
    assert_eq!(reply["result"], json!(123));
}

#[tokio::test]
async fn malformed_json_after_auth_keeps_connection() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, true, true);
    conn.send_raw("{not json");

    let reply = conn.next_json().await;
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["error"]["code"], json!(btcjson::ERR_RPC_PARSE));

    conn.send_request(json!(1), "getblockcount", json!([]));
    let reply = conn.next_json().await;
    assert_eq!(reply["result"], json!(123));
}

// ---------------------------------------------------------------------------
// Client pipeline: command dispatch.

#[tokio::test]
async fn session_returns_random_session_id() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, true, true);
    conn.send_request(json!(1), "session", json!([]));
    let reply = conn.next_json().await;

    assert_eq!(reply["error"], Value::Null);
    assert!(reply["result"]["sessionid"].is_u64());
}

#[tokio::test]
async fn help_overview_named_and_unknown() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, true, true);

    conn.send_request(json!(1), "help", json!([]));
    let reply = conn.next_json().await;
    assert_eq!(reply["result"], json!("usage overview"));

    conn.send_request(json!(2), "help", json!(["getblockcount"]));
    let reply = conn.next_json().await;
    assert_eq!(reply["result"], json!("help for getblockcount"));

    conn.send_request(json!(3), "help", json!(["rescan"]));
    let reply = conn.next_json().await;
    assert_eq!(reply["result"], json!("help for rescan"));

    conn.send_request(json!(4), "help", json!(["nosuchcommand"]));
    let reply = conn.next_json().await;
    assert_eq!(reply["error"]["code"], json!(ERR_RPC_INVALID_PARAMETER));
}

#[tokio::test]
async fn unknown_method_yields_method_not_found() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, true, true);
    conn.send_request(json!(1), "nosuchmethod", json!([]));
    let reply = conn.next_json().await;
    assert_eq!(reply["error"]["code"], json!(ERR_RPC_METHOD_NOT_FOUND));
}

#[tokio::test]
async fn notifyreceived_rejects_invalid_address() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, true, true);
    conn.send_request(json!(1), "notifyreceived", json!([["definitely not an address"]]));
    let reply = conn.next_json().await;
    assert_eq!(
        reply["error"]["code"],
        json!(btcjson::ERR_RPC_INVALID_ADDRESS_OR_KEY)
    );
}

#[tokio::test]
async fn notifyspent_rejects_bad_hash() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, true, true);
    conn.send_request(
        json!(1),
        "notifyspent",
        json!([[{"hash": "zz", "index": 0}]]),
    );
    let reply = conn.next_json().await;
    assert_eq!(
        reply["error"]["code"],
        json!(btcjson::ERR_RPC_DECODE_HEX_STRING)
    );
}

#[tokio::test]
async fn notifyblocks_subscribes_over_the_wire() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, true, true);
    conn.send_request(json!(1), "notifyblocks", json!([]));
    let reply = conn.next_json().await;
    assert_eq!(reply["result"], Value::Null);
    assert_eq!(reply["error"], Value::Null);

    let block = make_block(55, &Hash::default(), vec![MsgTx::new()], 1_700_001_000);
    server
        .notification_manager()
        .notify_block_connected(block.clone())
        .await;

    let ntfn = conn.next_json().await;
    assert_eq!(ntfn["method"], json!("blockconnected"));
    assert_eq!(ntfn["params"][1], json!(55));

    // stopnotifyblocks ends the stream.
    conn.send_request(json!(2), "stopnotifyblocks", json!([]));
    let reply = conn.next_json().await;
    assert_eq!(reply["error"], Value::Null);

    server
        .notification_manager()
        .notify_block_connected(block)
        .await;
    conn.assert_no_frame().await;
}

// ---------------------------------------------------------------------------
// Server glue.

#[tokio::test]
async fn connection_cap_refuses_excess_clients() {
    let db = Arc::new(FakeChainDb::new());
    let mut config = test_config();
    config.rpc_max_websockets = 1;
    let server = new_test_server(db, config);

    let _first = connect(&server, true, true);
    wait_for_num_clients(&server, 1).await;

    let mut second = connect(&server, true, true);
    // Refused without any frame: the stream just closes.
    second.wait_closed().await;
    assert_eq!(server.notification_manager().num_clients().await, 1);
}

#[tokio::test]
async fn num_clients_tracks_connect_and_disconnect() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let conn = connect(&server, true, true);
    let _conn2 = connect(&server, true, true);
    wait_for_num_clients(&server, 2).await;

    // Closing the test side of the frame channel tears the client down.
    drop(conn);
    wait_for_num_clients(&server, 1).await;
}

#[tokio::test]
async fn shutdown_disconnects_every_client() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut conn = connect(&server, true, true);
    let mut conn2 = connect(&server, true, true);
    wait_for_num_clients(&server, 2).await;

    server.shutdown();
    server.wait_for_shutdown().await;

    conn.wait_closed().await;
    conn2.wait_closed().await;
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let c = direct_client(&server);
    assert!(!c.client.disconnected());

    c.client.disconnect();
    assert!(c.client.disconnected());
    c.client.disconnect();
    assert!(c.client.disconnected());

    c.client.wait_for_shutdown().await;
}

// ---------------------------------------------------------------------------
// Rescan engine.

fn rescan_cmd(begin: &Hash, end: Option<&Hash>, addresses: Vec<String>) -> RescanCmd {
    RescanCmd {
        begin_block: begin.string(),
        addresses,
        out_points: Vec::new(),
        end_block: end.map(|h| h.string()),
    }
}

#[tokio::test]
async fn rescan_finds_received_and_spent_outputs() {
    let db = Arc::new(FakeChainDb::new());
    let addr = test_address(b"rescan target");

    // Height 1 pays the address; height 2 spends that output.  The walk
    // covers [begin, end), so the end block at height 3 is a marker only.
    let b0 = make_block(0, &Hash::default(), vec![MsgTx::new()], 1_700_000_000);

    let mut pay = MsgTx::new();
    pay.add_tx_out(pay_to(&addr, 10_000));
    let pay_tx = Tx::new(pay.clone());
    let b1 = make_block(1, b0.hash(), vec![pay.clone()], 1_700_000_060);

    let mut redeem = MsgTx::new();
    redeem.add_tx_in(spend(OutPoint::new(*pay_tx.hash(), 0)));
    let redeem_tx = Tx::new(redeem.clone());
    let b2 = make_block(2, b1.hash(), vec![redeem.clone()], 1_700_000_120);

    let b3 = make_block(3, b2.hash(), vec![MsgTx::new()], 1_700_000_180);

    for b in [&b0, &b1, &b2, &b3] {
        db.add_block(b.clone());
    }

    let server = new_test_server(db, test_config());
    let mut c = direct_client(&server);

    let cmd = rescan_cmd(b0.hash(), Some(b3.hash()), vec![addr]);
    let result = rescan::handle_rescan(&c.client, &cmd)
        .await
        .expect("rescan failed");
    assert!(result.is_none());

    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("recvtx"));
    assert_eq!(ntfn["params"][0], json!(pay_tx.hex()));
    assert_eq!(ntfn["params"][1]["height"], json!(1));

    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("redeemingtx"));
    assert_eq!(ntfn["params"][0], json!(redeem_tx.hex()));
    assert_eq!(ntfn["params"][1]["height"], json!(2));

    // The walk stops before the end block, so the last scanned block is b2.
    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("rescanfinished"));
    assert_eq!(ntfn["params"][0], json!(b2.hash().string()));
}

#[tokio::test]
async fn rescan_same_begin_and_end_reports_that_block() {
    let db = Arc::new(FakeChainDb::new());
    let blocks = build_chain(&db, 4);
    let target = &blocks[2];

    let server = new_test_server(db, test_config());
    let mut c = direct_client(&server);

    let cmd = rescan_cmd(target.hash(), Some(target.hash()), vec![]);
    rescan::handle_rescan(&c.client, &cmd)
        .await
        .expect("rescan failed");

    // Zero per-block notifications, then rescanfinished naming the block.
    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("rescanfinished"));
    assert_eq!(ntfn["params"][0], json!(target.hash().string()));
    assert_eq!(ntfn["params"][1], json!(2));
}

#[tokio::test]
async fn open_ended_rescan_upgrades_to_live_subscription() {
    let db = Arc::new(FakeChainDb::new());
    let addr = test_address(b"live upgrade");

    let b0 = make_block(0, &Hash::default(), vec![MsgTx::new()], 1_700_000_000);
    let mut pay = MsgTx::new();
    pay.add_tx_out(pay_to(&addr, 42));
    let pay_tx = Tx::new(pay.clone());
    let b1 = make_block(1, b0.hash(), vec![pay], 1_700_000_060);
    db.add_block(b0.clone());
    db.add_block(b1.clone());

    let server = new_test_server(db, test_config());
    let mut c = direct_client(&server);

    let cmd = rescan_cmd(b0.hash(), None, vec![addr.clone()]);
    rescan::handle_rescan(&c.client, &cmd)
        .await
        .expect("rescan failed");

    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("recvtx"));
    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("rescanfinished"));
    assert_eq!(ntfn["params"][0], json!(b1.hash().string()));

    // The rescan registered the discovered unspent output and the address
    // for continuous notifications.
    let watched = OutPoint::new(*pay_tx.hash(), 0);
    for _ in 0..500 {
        if c.client.spent_requests.lock().unwrap().contains(&watched)
            && c.client.addr_requests.lock().unwrap().contains(&addr)
        {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(c.client.spent_requests.lock().unwrap().contains(&watched));
    assert!(c.client.addr_requests.lock().unwrap().contains(&addr));
}

#[tokio::test]
async fn rescan_recovers_from_transient_reorg_window() {
    let db = Arc::new(FakeChainDb::new());
    let blocks = build_chain(&db, 6);

    // The block at index 3 fails its first fetch, simulating a hash list
    // that went stale mid-walk.  The refetched window starts at the same
    // height and remains on the same fork, so the walk continues.
    db.fail_next_fetch(*blocks[3].hash());

    let server = new_test_server(db, test_config());
    let mut c = direct_client(&server);

    let cmd = rescan_cmd(blocks[0].hash(), None, vec![]);
    rescan::handle_rescan(&c.client, &cmd)
        .await
        .expect("recovery should succeed");

    let ntfn = c.conn.next_json().await;
    assert_eq!(ntfn["method"], json!("rescanfinished"));
    assert_eq!(ntfn["params"][0], json!(blocks[5].hash().string()));
}

#[tokio::test]
async fn rescan_with_fixed_end_fails_on_reorg() {
    let db = Arc::new(FakeChainDb::new());
    let blocks = build_chain(&db, 6);
    db.fail_next_fetch(*blocks[3].hash());

    let server = new_test_server(db, test_config());
    let c = direct_client(&server);

    let cmd = rescan_cmd(blocks[0].hash(), Some(blocks[5].hash()), vec![]);
    let err = rescan::handle_rescan(&c.client, &cmd)
        .await
        .expect_err("fixed-end rescan must not attempt recovery");

    assert_eq!(err.code, btcjson::ERR_RPC_DATABASE);
    assert_eq!(err.message, "Reorganize");
}

#[tokio::test]
async fn rescan_unknown_begin_block_errors() {
    let db = Arc::new(FakeChainDb::new());
    build_chain(&db, 2);

    let server = new_test_server(db, test_config());
    let c = direct_client(&server);

    let unknown = crate::wire::double_sha256(b"not in the chain");
    let cmd = rescan_cmd(&unknown, None, vec![]);
    let err = rescan::handle_rescan(&c.client, &cmd)
        .await
        .expect_err("unknown begin block must error");
    assert_eq!(err.code, btcjson::ERR_RPC_BLOCK_NOT_FOUND);
}

#[tokio::test]
async fn rescan_stops_silently_for_disconnected_client() {
    let db = Arc::new(FakeChainDb::new());
    let blocks = build_chain(&db, 4);

    let server = new_test_server(db, test_config());
    let c = direct_client(&server);

    c.client.disconnect();

    let cmd = rescan_cmd(blocks[0].hash(), None, vec![]);
    let result = rescan::handle_rescan(&c.client, &cmd)
        .await
        .expect("disconnect is not an error");
    assert!(result.is_none());

    // Disconnect is idempotent on the already-closed client.
    c.client.disconnect();
    c.client.wait_for_shutdown().await;
}

#[tokio::test]
async fn rescan_over_the_wire_runs_on_async_worker() {
    let db = Arc::new(FakeChainDb::new());
    let addr = test_address(b"wire rescan");

    let b0 = make_block(0, &Hash::default(), vec![MsgTx::new()], 1_700_000_000);
    let mut pay = MsgTx::new();
    pay.add_tx_out(pay_to(&addr, 8_000));
    let b1 = make_block(1, b0.hash(), vec![pay], 1_700_000_060);
    let b2 = make_block(2, b1.hash(), vec![MsgTx::new()], 1_700_000_120);
    for b in [&b0, &b1, &b2] {
        db.add_block(b.clone());
    }

    let server = new_test_server(db, test_config());
    let mut conn = connect(&server, true, true);

    conn.send_request(
        json!(9),
        "rescan",
        json!([b0.hash().string(), [addr], [], b2.hash().string()]),
    );

    // The recvtx notification and the null reply both arrive; their relative
    // order across the two outbound streams is not guaranteed.
    let mut saw_reply = false;
    let mut saw_recv = false;
    let mut saw_finished = false;
    for _ in 0..3 {
        let frame = conn.next_json().await;
        if frame["id"] == json!(9) {
            assert_eq!(frame["error"], Value::Null);
            saw_reply = true;
        } else if frame["method"] == json!("recvtx") {
            saw_recv = true;
        } else if frame["method"] == json!("rescanfinished") {
            saw_finished = true;
        }
    }
    assert!(saw_reply && saw_recv && saw_finished);
}

// ---------------------------------------------------------------------------
// Client internals.

#[tokio::test]
async fn queue_notification_returns_client_quit_after_disconnect() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let c = direct_client(&server);
    c.client.disconnect();

    let err = c
        .client
        .queue_notification(b"{}".to_vec())
        .await
        .expect_err("disconnected client must refuse notifications");
    assert_eq!(err, super::RpcServerError::ClientQuit);
}

#[tokio::test]
async fn notifications_drain_in_order_through_queue_handler() {
    let db = Arc::new(FakeChainDb::new());
    let server = new_test_server(db, test_config());

    let mut c = direct_client(&server);

    // Queue a burst of notifications; the 1-slot channel plus the queue
    // handler handshake must deliver all of them in order.
    for i in 0..20 {
        let ntfn = btcjson::marshal_notification("blockconnected", &[json!(i)]).unwrap();
        c.client
            .queue_notification(ntfn)
            .await
            .expect("client alive");
    }

    for want in 0..20 {
        let ntfn = c.conn.next_json().await;
        assert_eq!(ntfn["params"][0], json!(want));
    }
}

#[test]
fn auth_digest_matches_basic_header_form() {
    // "rpcuser:rpcpass" base64-encodes to cnBjdXNlcjpycGNwYXNz.
    let digest = Config::auth_digest(TEST_USER, TEST_PASS);
    let manual = ring::digest::digest(
        &ring::digest::SHA256,
        b"Basic cnBjdXNlcjpycGNwYXNz",
    );
    assert_eq!(digest.as_slice(), manual.as_ref());

    assert_ne!(
        Config::auth_digest(TEST_USER, TEST_PASS),
        Config::auth_digest(TEST_USER, "other")
    );
}

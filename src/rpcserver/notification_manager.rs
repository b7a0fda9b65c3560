use {
    super::{
        client::WsClient,
        collaborators::ScriptParser,
        queue,
    },
    crate::{
        btcjson::{
            block_details, create_tx_raw_result, new_block_connected_ntfn,
            new_block_disconnected_ntfn, new_recv_tx_ntfn, new_redeeming_tx_ntfn,
            new_tx_accepted_ntfn, new_tx_accepted_verbose_ntfn,
        },
        btcutil::{Amount, Block, Tx},
        chaincfg::Params,
        helper::waitgroup,
        wire::OutPoint,
    },
    log::{error, warn},
    std::{
        collections::{HashMap, HashSet},
        sync::{Arc, Mutex},
    },
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::CancellationToken,
};

/// The tagged union of chain events and subscription control messages
/// consumed by the notification manager.
pub enum Notification {
    BlockConnected(Block),
    BlockDisconnected(Block),
    TxAcceptedByMempool { tx: Tx, is_new: bool },
    RegisterClient(Arc<WsClient>),
    UnregisterClient(Arc<WsClient>),
    RegisterBlocks(Arc<WsClient>),
    UnregisterBlocks(Arc<WsClient>),
    RegisterNewMempoolTxs(Arc<WsClient>),
    UnregisterNewMempoolTxs(Arc<WsClient>),
    RegisterSpent {
        client: Arc<WsClient>,
        ops: Vec<OutPoint>,
    },
    UnregisterSpent {
        client: Arc<WsClient>,
        op: OutPoint,
    },
    RegisterAddr {
        client: Arc<WsClient>,
        addrs: Vec<String>,
    },
    UnregisterAddr {
        client: Arc<WsClient>,
        addr: String,
    },
}

/// A connection and notification manager used for websockets.  It allows
/// websocket clients to register for notifications they are interested in.
/// When an event happens elsewhere in the code such as transactions being
/// added to the memory pool or block connects/disconnects, the notification
/// manager is provided with the relevant details needed to figure out which
/// websocket clients need to be notified based on what they have registered
/// for and notifies them accordingly.  It is also used to keep track of all
/// connected websocket clients.
pub struct NotificationManager {
    /// Queues a notification for handling.  The queue relay behind it
    /// guarantees publishers are never blocked by router latency.
    queue_notification: mpsc::Sender<Notification>,

    /// Access channel for the current number of connected clients; each
    /// query carries its own reply channel and is served by the router task.
    num_clients: mpsc::Sender<oneshot::Sender<usize>>,

    // Shutdown handling.
    quit: CancellationToken,
    wg: waitgroup::WaitGroup,

    // Receivers parked here until start.
    queue_rx: Mutex<Option<mpsc::Receiver<Notification>>>,
    num_clients_rx: Mutex<Option<mpsc::Receiver<oneshot::Sender<usize>>>>,

    chain_params: Params,
    script_parser: Arc<dyn ScriptParser>,
}

impl NotificationManager {
    /// Returns a new notification manager ready for use.
    pub fn new(chain_params: Params, script_parser: Arc<dyn ScriptParser>) -> NotificationManager {
        let (queue_tx, queue_rx) = mpsc::channel(1);
        let (num_clients_tx, num_clients_rx) = mpsc::channel(1);

        NotificationManager {
            queue_notification: queue_tx,
            num_clients: num_clients_tx,
            quit: CancellationToken::new(),
            wg: waitgroup::new(),
            queue_rx: Mutex::new(Some(queue_rx)),
            num_clients_rx: Mutex::new(Some(num_clients_rx)),
            chain_params,
            script_parser,
        }
    }

    /// Starts the tasks required for the manager to queue and process
    /// websocket client notifications.
    pub fn start(&self) {
        let queue_rx = self.queue_rx.lock().unwrap().take();
        let num_clients_rx = self.num_clients_rx.lock().unwrap().take();
        let (queue_rx, num_clients_rx) = match (queue_rx, num_clients_rx) {
            (Some(q), Some(n)) => (q, n),

            _ => {
                warn!("Notification manager started more than once");
                return;
            }
        };

        self.wg.add(2);

        // The relay feeds the router with notifications and client
        // (un)registration requests from an unbounded FIFO so publishers
        // such as the block manager and mempool never block.
        let (notification_msgs_tx, notification_msgs_rx) = mpsc::channel(1);

        let quit = self.quit.clone();
        let wg = self.wg.clone();
        tokio::spawn(async move {
            queue::queue_handler(queue_rx, notification_msgs_tx, quit).await;
            wg.done();
        });

        let router = Router {
            chain_params: self.chain_params,
            script_parser: self.script_parser.clone(),
            clients: HashMap::new(),
            block_notifications: HashMap::new(),
            tx_notifications: HashMap::new(),
            watched_out_points: HashMap::new(),
            watched_addrs: HashMap::new(),
        };

        let quit = self.quit.clone();
        let wg = self.wg.clone();
        tokio::spawn(async move {
            router.run(notification_msgs_rx, num_clients_rx, quit).await;
            wg.done();
        });
    }

    /// Passes a block newly-connected to the best chain to the notification
    /// manager for block and transaction notification processing.  As this
    /// is called by the block manager and the RPC server may no longer be
    /// running, the send races the quit signal so publishers unblock once
    /// the server has begun shutting down.
    pub async fn notify_block_connected(&self, block: Block) {
        tokio::select! {
            _ = self.queue_notification.send(Notification::BlockConnected(block)) => {}
            _ = self.quit.cancelled() => {}
        }
    }

    /// Passes a block disconnected from the best chain to the notification
    /// manager for block notification processing.
    pub async fn notify_block_disconnected(&self, block: Block) {
        tokio::select! {
            _ = self.queue_notification.send(Notification::BlockDisconnected(block)) => {}
            _ = self.quit.cancelled() => {}
        }
    }

    /// Passes a transaction accepted by the mempool to the notification
    /// manager for transaction notification processing.  If is_new is true,
    /// the tx is a new transaction, rather than one added to the mempool
    /// during a reorg.
    pub async fn notify_mempool_tx(&self, tx: Tx, is_new: bool) {
        tokio::select! {
            _ = self.queue_notification.send(Notification::TxAcceptedByMempool { tx, is_new }) => {}
            _ = self.quit.cancelled() => {}
        }
    }

    /// Returns the number of clients actively being served.
    pub async fn num_clients(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();

        tokio::select! {
            res = self.num_clients.send(reply_tx) => {
                if res.is_err() {
                    return 0;
                }
            }

            // Use the default 0 if the server has shut down.
            _ = self.quit.cancelled() => return 0,
        }

        reply_rx.await.unwrap_or(0)
    }

    /// Adds the passed websocket client to the notification manager.
    pub(crate) async fn add_client(&self, wsc: Arc<WsClient>) {
        self.queue(Notification::RegisterClient(wsc)).await;
    }

    /// Removes the passed websocket client and all notifications registered
    /// for it.
    pub(crate) async fn remove_client(&self, wsc: Arc<WsClient>) {
        tokio::select! {
            _ = self.queue_notification.send(Notification::UnregisterClient(wsc)) => {}
            _ = self.quit.cancelled() => {}
        }
    }

    /// Requests block update notifications to the passed websocket client.
    pub(crate) async fn register_block_updates(&self, wsc: Arc<WsClient>) {
        self.queue(Notification::RegisterBlocks(wsc)).await;
    }

    /// Removes block update notifications for the passed websocket client.
    pub(crate) async fn unregister_block_updates(&self, wsc: Arc<WsClient>) {
        self.queue(Notification::UnregisterBlocks(wsc)).await;
    }

    /// Requests notifications to the passed websocket client when new
    /// transactions are added to the memory pool.
    pub(crate) async fn register_new_mempool_txs_updates(&self, wsc: Arc<WsClient>) {
        self.queue(Notification::RegisterNewMempoolTxs(wsc)).await;
    }

    /// Removes notifications to the passed websocket client when new
    /// transactions are added to the memory pool.
    pub(crate) async fn unregister_new_mempool_txs_updates(&self, wsc: Arc<WsClient>) {
        self.queue(Notification::UnregisterNewMempoolTxs(wsc)).await;
    }

    /// Requests a notification when each of the passed outpoints is
    /// confirmed spent (contained in a block connected to the main chain)
    /// for the passed websocket client.  The request is automatically
    /// removed once the notification has been sent.
    pub(crate) async fn register_spent_requests(&self, wsc: Arc<WsClient>, ops: Vec<OutPoint>) {
        self.queue(Notification::RegisterSpent { client: wsc, ops }).await;
    }

    /// Removes a request from the passed websocket client to be notified
    /// when the passed outpoint is confirmed spent.
    pub(crate) async fn unregister_spent_request(&self, wsc: Arc<WsClient>, op: OutPoint) {
        self.queue(Notification::UnregisterSpent { client: wsc, op }).await;
    }

    /// Requests notifications to the passed websocket client when a
    /// transaction output spends to the passed addresses.
    pub(crate) async fn register_tx_out_address_requests(
        &self,
        wsc: Arc<WsClient>,
        addrs: Vec<String>,
    ) {
        self.queue(Notification::RegisterAddr { client: wsc, addrs }).await;
    }

    /// Removes a request from the passed websocket client to be notified
    /// when a transaction spends to the passed address.
    pub(crate) async fn unregister_tx_out_address_request(&self, wsc: Arc<WsClient>, addr: String) {
        self.queue(Notification::UnregisterAddr { client: wsc, addr }).await;
    }

    async fn queue(&self, notification: Notification) {
        if self.queue_notification.send(notification).await.is_err() {
            warn!("Notification manager queue closed, dropping message");
        }
    }

    /// Shuts down the manager, stopping the notification queue and router
    /// tasks.
    pub fn shutdown(&self) {
        self.quit.cancel();
    }

    /// Blocks until all notification manager tasks have finished.
    pub async fn wait_for_shutdown(&self) {
        self.wg.wait().await;
    }
}

/// The router task state: every subscription index, owned by exactly one
/// task so no locks are needed.  Clients are keyed by their process-unique
/// id, which is cheaper to hash than the client record and remains valid for
/// the client's lifetime.  Each websocket client also keeps mirror sets for
/// the events which have multiple triggers to make removal from these
/// indices on connection close less horrendously expensive.
struct Router {
    chain_params: Params,
    script_parser: Arc<dyn ScriptParser>,

    /// All currently connected websocket clients.
    clients: HashMap<u64, Arc<WsClient>>,

    block_notifications: HashMap<u64, Arc<WsClient>>,
    tx_notifications: HashMap<u64, Arc<WsClient>>,
    watched_out_points: HashMap<OutPoint, HashMap<u64, Arc<WsClient>>>,
    watched_addrs: HashMap<String, HashMap<u64, Arc<WsClient>>>,
}

impl Router {
    /// Reads notifications and control messages from the queue relay and
    /// processes one at a time.  On quit the router drains: every connected
    /// client is disconnected and the task returns.
    async fn run(
        mut self,
        mut notification_msgs: mpsc::Receiver<Notification>,
        mut num_clients: mpsc::Receiver<oneshot::Sender<usize>>,
        quit: CancellationToken,
    ) {
        'out: loop {
            tokio::select! {
                n = notification_msgs.recv() => {
                    match n {
                        Some(n) => self.process(n).await,

                        // The queue relay quit.
                        None => break 'out,
                    }
                }

                req = num_clients.recv() => {
                    match req {
                        Some(reply) => {
                            let _ = reply.send(self.clients.len());
                        }

                        // The manager was dropped.
                        None => break 'out,
                    }
                }

                // RPC server shutting down.
                _ = quit.cancelled() => break 'out,
            }
        }

        for (_, client) in self.clients.drain() {
            client.disconnect();
        }
    }

    async fn process(&mut self, notification: Notification) {
        match notification {
            Notification::BlockConnected(block) => {
                // Skip iterating through all txs if no tx notification
                // requests exist.
                if !self.watched_out_points.is_empty() || !self.watched_addrs.is_empty() {
                    for tx in block.transactions() {
                        self.notify_for_tx(&tx, Some(&block)).await;
                    }
                }

                if !self.block_notifications.is_empty() {
                    self.notify_block_connected(&block).await;
                }
            }

            Notification::BlockDisconnected(block) => {
                self.notify_block_disconnected(&block).await;
            }

            Notification::TxAcceptedByMempool { tx, is_new } => {
                if is_new && !self.tx_notifications.is_empty() {
                    self.notify_for_new_tx(&tx).await;
                }
                self.notify_for_tx(&tx, None).await;
            }

            Notification::RegisterClient(wsc) => {
                self.clients.insert(wsc.id(), wsc);
            }

            Notification::UnregisterClient(wsc) => {
                // Remove any requests made by the client as well as the
                // client itself.
                self.block_notifications.remove(&wsc.id());
                self.tx_notifications.remove(&wsc.id());

                let spent: Vec<OutPoint> =
                    wsc.spent_requests.lock().unwrap().iter().copied().collect();
                for op in spent {
                    self.remove_spent_request(&wsc, &op);
                }

                let addrs: Vec<String> =
                    wsc.addr_requests.lock().unwrap().iter().cloned().collect();
                for addr in addrs {
                    self.remove_addr_request(&wsc, &addr);
                }

                self.clients.remove(&wsc.id());
            }

            Notification::RegisterBlocks(wsc) => {
                self.block_notifications.insert(wsc.id(), wsc);
            }

            Notification::UnregisterBlocks(wsc) => {
                self.block_notifications.remove(&wsc.id());
            }

            Notification::RegisterNewMempoolTxs(wsc) => {
                self.tx_notifications.insert(wsc.id(), wsc);
            }

            Notification::UnregisterNewMempoolTxs(wsc) => {
                self.tx_notifications.remove(&wsc.id());
            }

            Notification::RegisterSpent { client, ops } => {
                self.add_spent_requests(&client, &ops);
            }

            Notification::UnregisterSpent { client, op } => {
                self.remove_spent_request(&client, &op);
            }

            Notification::RegisterAddr { client, addrs } => {
                self.add_addr_requests(&client, &addrs);
            }

            Notification::UnregisterAddr { client, addr } => {
                self.remove_addr_request(&client, &addr);
            }
        }
    }

    /// Notifies websocket clients that have registered for block updates
    /// when a block is connected to the main chain.
    async fn notify_block_connected(&self, block: &Block) {
        let ntfn = match new_block_connected_ntfn(
            block.hash().string(),
            block.height(),
            block.timestamp(),
        ) {
            Ok(ntfn) => ntfn,

            Err(e) => {
                error!("Failed to marshal block connected notification: {}", e);
                return;
            }
        };

        for wsc in self.block_notifications.values() {
            let _ = wsc.queue_notification(ntfn.clone()).await;
        }
    }

    /// Notifies websocket clients that have registered for block updates
    /// when a block is disconnected from the main chain (due to a
    /// reorganize).
    async fn notify_block_disconnected(&self, block: &Block) {
        // Skip notification creation if no clients have requested block
        // connected/disconnected notifications.
        if self.block_notifications.is_empty() {
            return;
        }

        let ntfn = match new_block_disconnected_ntfn(
            block.hash().string(),
            block.height(),
            block.timestamp(),
        ) {
            Ok(ntfn) => ntfn,

            Err(e) => {
                error!("Failed to marshal block disconnected notification: {}", e);
                return;
            }
        };

        for wsc in self.block_notifications.values() {
            let _ = wsc.queue_notification(ntfn.clone()).await;
        }
    }

    /// Notifies websocket clients that have registered for updates when a
    /// new transaction is added to the memory pool.  The verbose form is
    /// marshalled once on the first verbose subscriber and reused.
    async fn notify_for_new_tx(&self, tx: &Tx) {
        let tx_sha_str = tx.hash().string();

        let amount: i64 = tx.msg_tx().tx_out.iter().map(|txout| txout.value).sum();

        let marshalled = match new_tx_accepted_ntfn(tx_sha_str, Amount(amount).to_btc()) {
            Ok(marshalled) => marshalled,

            Err(e) => {
                error!("Failed to marshal tx notification: {}", e);
                return;
            }
        };

        let mut marshalled_verbose: Option<Vec<u8>> = None;
        for wsc in self.tx_notifications.values() {
            if wsc.verbose_tx_updates() {
                if let Some(ref verbose) = marshalled_verbose {
                    let _ = wsc.queue_notification(verbose.clone()).await;
                    continue;
                }

                let raw_tx = create_tx_raw_result(&self.chain_params, tx);
                match new_tx_accepted_verbose_ntfn(&raw_tx) {
                    Ok(verbose) => {
                        let _ = wsc.queue_notification(verbose.clone()).await;
                        marshalled_verbose = Some(verbose);
                    }

                    Err(e) => {
                        error!("Failed to marshal verbose tx notification: {}", e);
                        return;
                    }
                }
            } else {
                let _ = wsc.queue_notification(marshalled.clone()).await;
            }
        }
    }

    /// Examines the inputs and outputs of the passed transaction, notifying
    /// websocket clients of outputs spending to a watched address and inputs
    /// spending a watched outpoint.
    async fn notify_for_tx(&mut self, tx: &Tx, block: Option<&Block>) {
        if !self.watched_out_points.is_empty() {
            self.notify_for_tx_ins(tx, block).await;
        }
        if !self.watched_addrs.is_empty() {
            self.notify_for_tx_outs(tx, block).await;
        }
    }

    /// Examines the inputs of the passed transaction and sends interested
    /// websocket clients a redeemingtx notification if any inputs spend a
    /// watched output.  If block is present, any matching spent requests are
    /// removed: confirmed spends are one-shot, while spends observed in the
    /// mempool keep the watch alive.
    async fn notify_for_tx_ins(&mut self, tx: &Tx, block: Option<&Block>) {
        let mut tx_hex = String::new();
        let mut wsc_notified: HashSet<u64> = HashSet::new();

        for txin in tx.msg_tx().tx_in.iter() {
            let prev_out = txin.previous_out_point;

            let cmap = match self.watched_out_points.get(&prev_out) {
                Some(cmap) => cmap,

                None => continue,
            };
            let interested: Vec<Arc<WsClient>> = cmap.values().cloned().collect();

            if tx_hex.is_empty() {
                tx_hex = tx.hex();
            }
            let marshalled = match new_redeeming_tx_ntfn(
                &tx_hex,
                block_details(block, tx.index()).as_ref(),
            ) {
                Ok(marshalled) => marshalled,

                Err(e) => {
                    warn!("Failed to marshal redeemingtx notification: {}", e);
                    continue;
                }
            };

            for wsc in interested {
                if block.is_some() {
                    self.remove_spent_request(&wsc, &prev_out);
                }

                if wsc_notified.insert(wsc.id()) {
                    let _ = wsc.queue_notification(marshalled.clone()).await;
                }
            }
        }
    }

    /// Examines each transaction output, notifying interested websocket
    /// clients of the transaction if an output spends to a watched address.
    /// A spent notification request is automatically registered for the
    /// client for each matching output.
    async fn notify_for_tx_outs(&mut self, tx: &Tx, block: Option<&Block>) {
        let mut tx_hex = String::new();
        let mut wsc_notified: HashSet<u64> = HashSet::new();

        for (i, txout) in tx.msg_tx().tx_out.iter().enumerate() {
            let tx_addrs = self
                .script_parser
                .extract_pk_script_addrs(&txout.pk_script, &self.chain_params);

            for tx_addr in tx_addrs {
                let cmap = match self.watched_addrs.get(&tx_addr.encode_address()) {
                    Some(cmap) => cmap,

                    None => continue,
                };
                let interested: Vec<Arc<WsClient>> = cmap.values().cloned().collect();

                if tx_hex.is_empty() {
                    tx_hex = tx.hex();
                }
                let marshalled = match new_recv_tx_ntfn(
                    &tx_hex,
                    block_details(block, tx.index()).as_ref(),
                ) {
                    Ok(marshalled) => marshalled,

                    Err(e) => {
                        error!("Failed to marshal processedtx notification: {}", e);
                        continue;
                    }
                };

                let op = [OutPoint::new(*tx.hash(), i as u32)];
                for wsc in interested {
                    self.add_spent_requests(&wsc, &op);

                    if wsc_notified.insert(wsc.id()) {
                        let _ = wsc.queue_notification(marshalled.clone()).await;
                    }
                }
            }
        }
    }

    /// Adds a request to watch all of the outpoints in ops and create and
    /// send a notification when spent to the websocket client wsc.
    fn add_spent_requests(&mut self, wsc: &Arc<WsClient>, ops: &[OutPoint]) {
        for op in ops {
            // Track the request in the client as well so it can quickly be
            // removed on disconnect.
            wsc.spent_requests.lock().unwrap().insert(*op);

            // Add the client to the list to notify when the outpoint is
            // seen.  Create the list as needed.
            self.watched_out_points
                .entry(*op)
                .or_insert_with(HashMap::new)
                .insert(wsc.id(), wsc.clone());
        }
    }

    /// Removes the websocket client wsc from the set of clients to be
    /// notified when a watched outpoint is spent.  If wsc is the last
    /// client, the outpoint key is removed from the index.
    fn remove_spent_request(&mut self, wsc: &Arc<WsClient>, op: &OutPoint) {
        // Remove the request tracking from the client.
        wsc.spent_requests.lock().unwrap().remove(op);

        // Remove the client from the list to notify.
        let notify_map = match self.watched_out_points.get_mut(op) {
            Some(notify_map) => notify_map,

            None => {
                warn!(
                    "Attempt to remove nonexistent spent request for websocket client {}",
                    wsc.addr()
                );
                return;
            }
        };
        notify_map.remove(&wsc.id());

        // Remove the map entry altogether if there are no more clients
        // interested in it.
        if notify_map.is_empty() {
            self.watched_out_points.remove(op);
        }
    }

    /// Adds the websocket client wsc to the address index so wsc will be
    /// notified for any mempool or block transaction outputs spending to any
    /// of the addresses in addrs.
    fn add_addr_requests(&mut self, wsc: &Arc<WsClient>, addrs: &[String]) {
        for addr in addrs {
            // Track the request in the client as well so it can quickly be
            // removed on disconnect.
            wsc.addr_requests.lock().unwrap().insert(addr.clone());

            // Add the client to the set of clients to notify when the
            // address is seen.  Create the map as needed.
            self.watched_addrs
                .entry(addr.clone())
                .or_insert_with(HashMap::new)
                .insert(wsc.id(), wsc.clone());
        }
    }

    /// Removes the websocket client wsc from the address index so it will no
    /// longer receive notification updates for any transaction outputs sent
    /// to addr.
    fn remove_addr_request(&mut self, wsc: &Arc<WsClient>, addr: &str) {
        // Remove the request tracking from the client.
        wsc.addr_requests.lock().unwrap().remove(addr);

        // Remove the client from the list to notify.
        let cmap = match self.watched_addrs.get_mut(addr) {
            Some(cmap) => cmap,

            None => {
                warn!(
                    "Attempt to remove nonexistent addr request <{}> for websocket client {}",
                    addr,
                    wsc.addr()
                );
                return;
            }
        };
        cmap.remove(&wsc.id());

        // Remove the map entry altogether if there are no more clients
        // interested in it.
        if cmap.is_empty() {
            self.watched_addrs.remove(addr);
        }
    }
}

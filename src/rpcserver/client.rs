use {
    super::{
        commands::{self, ParsedRpcCmd},
        config::Config,
        server::RpcServer,
        RpcServerError,
    },
    crate::{
        btcjson::{
            self, ChainCommand, RpcError, ERR_RPC_INVALID_PARAMS, ERR_RPC_PARSE,
        },
        helper::waitgroup,
        wire,
    },
    futures::{Sink, SinkExt, Stream, StreamExt},
    log::{debug, error, trace, warn},
    ring::constant_time,
    std::{
        collections::{HashSet, VecDeque},
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            Arc, Mutex,
        },
    },
    tokio::sync::mpsc,
    tokio_tungstenite::tungstenite::{Error as WsError, Message},
    tokio_util::sync::CancellationToken,
};

/// Source of the process-unique client ids used to key the notification
/// manager indices.  An id is cheaper to hash than the client record and
/// remains valid for the client's lifetime.
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Houses a message to send to a connected websocket client as well as a
/// channel to reply on when the message is sent.
pub(crate) struct WsResponse {
    msg: Vec<u8>,
    done: Option<mpsc::Sender<bool>>,
}

/// Provides an abstraction for handling a websocket client.  The overall
/// data flow is split into 3 main tasks, a possible 4th task for
/// long-running operations (only started if a request is made), and the
/// notification manager which is used for things such as broadcasting
/// requested notifications to all connected websocket clients.  Inbound
/// messages are read via the input handler and generally dispatched to their
/// own handler.  However, certain potentially long-running operations such
/// as rescans are sent to the async handler and are limited to one at a
/// time.  There are two outbound message types - one for responding to
/// client requests and another for async notifications.  Responses to client
/// requests use `send_message` which employs a buffered channel thereby
/// limiting the number of outstanding requests that can be made.
/// Notifications are sent via `queue_notification` which implements a queue
/// via the notification queue handler to ensure sending notifications from
/// other subsystems can't block.  Ultimately, all messages are sent via the
/// output handler.
pub struct WsClient {
    /// The RPC server servicing the client.
    pub(crate) server: Arc<RpcServer>,

    /// Unique id keying the notification manager indices.
    id: u64,

    /// Remote address of the client.
    addr: String,

    /// Whether the client has passed authentication and is therefore allowed
    /// to communicate over the websocket.
    authenticated: AtomicBool,

    /// Whether the client may change the state of the server; false limits
    /// access to the restricted set of RPC calls.
    is_admin: AtomicBool,

    /// A random id generated for each client when connected.  These ids may
    /// be queried by a client using the session RPC.  A change to the
    /// session id indicates that the client reconnected.
    session_id: u64,

    /// Whether the client has requested verbose information about all new
    /// transactions.
    verbose_tx_updates: AtomicBool,

    /// Whether the websocket client is disconnected.  Guarded by a mutex as
    /// it is the only cross-task shared mutable state inside a client.
    disconnected: Mutex<bool>,

    /// Addresses the client has requested to be notified about.  Maintained
    /// here so all requests can be removed when the client disconnects.
    /// Owned by the notification manager.
    pub(crate) addr_requests: Mutex<HashSet<String>>,

    /// Unspent outpoints the client has requested notifications for when
    /// they are spent by a processed transaction.  Owned by the notification
    /// manager.
    pub(crate) spent_requests: Mutex<HashSet<wire::OutPoint>>,

    // Networking infrastructure.
    async_started: AtomicBool,
    async_tx: mpsc::Sender<ParsedRpcCmd>,
    async_rx: Mutex<Option<mpsc::Receiver<ParsedRpcCmd>>>,
    ntfn_tx: mpsc::Sender<Vec<u8>>,
    ntfn_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    send_tx: mpsc::Sender<WsResponse>,
    send_rx: Mutex<Option<mpsc::Receiver<WsResponse>>>,
    quit: CancellationToken,
    wg: waitgroup::WaitGroup,
}

impl WsClient {
    /// Returns a new websocket client ready to start given the server, the
    /// remote address, and whether or not the client has already been
    /// authenticated (via HTTP basic access authentication).
    pub(crate) fn new(
        server: Arc<RpcServer>,
        addr: String,
        authenticated: bool,
        is_admin: bool,
    ) -> Arc<WsClient> {
        let (async_tx, async_rx) = mpsc::channel(1); // nonblocking sync
        let (ntfn_tx, ntfn_rx) = mpsc::channel(1); // nonblocking sync
        let (send_tx, send_rx) = mpsc::channel(server.config.send_buffer_size);

        Arc::new(WsClient {
            server,
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst),
            addr,
            authenticated: AtomicBool::new(authenticated),
            is_admin: AtomicBool::new(is_admin),
            session_id: wire::random_uint64(),
            verbose_tx_updates: AtomicBool::new(false),
            disconnected: Mutex::new(false),
            addr_requests: Mutex::new(HashSet::new()),
            spent_requests: Mutex::new(HashSet::new()),
            async_started: AtomicBool::new(false),
            async_tx,
            async_rx: Mutex::new(Some(async_rx)),
            ntfn_tx,
            ntfn_rx: Mutex::new(Some(ntfn_rx)),
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            quit: CancellationToken::new(),
            wg: waitgroup::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub(crate) fn quit(&self) -> &CancellationToken {
        &self.quit
    }

    pub(crate) fn verbose_tx_updates(&self) -> bool {
        self.verbose_tx_updates.load(Ordering::SeqCst)
    }

    pub(crate) fn set_verbose_tx_updates(&self, verbose: bool) {
        self.verbose_tx_updates.store(verbose, Ordering::SeqCst);
    }

    /// Begins processing input and output messages on the passed split
    /// halves of the frame channel.
    pub fn start<R, W>(self: &Arc<Self>, reader: R, writer: W)
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: std::fmt::Display + Send,
    {
        trace!("Starting websocket client {}", self.addr);

        let ntfn_rx = self.ntfn_rx.lock().unwrap().take();
        let send_rx = self.send_rx.lock().unwrap().take();
        let (ntfn_rx, send_rx) = match (ntfn_rx, send_rx) {
            (Some(n), Some(s)) => (n, s),

            _ => {
                warn!("Websocket client {} started more than once", self.addr);
                return;
            }
        };

        // Start processing input and output.
        self.wg.add(3);

        let client = self.clone();
        tokio::spawn(async move { client.in_handler(reader).await });

        let client = self.clone();
        tokio::spawn(async move { client.notification_queue_handler(ntfn_rx).await });

        let client = self.clone();
        tokio::spawn(async move { client.out_handler(writer, send_rx).await });
    }

    /// Blocks until the websocket client tasks are stopped and the
    /// connection is closed.
    pub async fn wait_for_shutdown(&self) {
        self.wg.wait().await;
    }

    /// Returns whether or not the websocket client is disconnected.
    pub fn disconnected(&self) -> bool {
        *self.disconnected.lock().unwrap()
    }

    /// Disconnects the websocket client.  It is idempotent: only the first
    /// call cancels the quit signal, which every task of the client observes
    /// to tear down, closing the underlying socket on the way out.
    pub fn disconnect(&self) {
        let mut disconnected = self.disconnected.lock().unwrap();

        // Nothing to do if already disconnected.
        if *disconnected {
            return;
        }

        trace!("Disconnecting websocket client {}", self.addr);
        self.quit.cancel();
        *disconnected = true;
    }

    /// Sends the passed json to the websocket client.  It is backed by a
    /// buffered channel, so it will not block until the send channel is
    /// full.  Note however that `queue_notification` must be used for
    /// sending async notifications instead of this function.  This approach
    /// allows a limit to the number of outstanding requests a client can
    /// make without preventing or blocking on async notifications.
    pub(crate) async fn send_message(&self, marshalled_json: Vec<u8>, done: Option<mpsc::Sender<bool>>) {
        // Don't send the message if disconnected.
        if self.disconnected() {
            if let Some(done) = done {
                let _ = done.send(false).await;
            }
            return;
        }

        let _ = self
            .send_tx
            .send(WsResponse {
                msg: marshalled_json,
                done,
            })
            .await;
    }

    /// Queues the passed notification to be sent to the websocket client.
    /// This function, as the name implies, is only intended for
    /// notifications since it has additional logic to prevent other
    /// subsystems, such as the memory pool and block manager, from blocking
    /// even when the send channel is full.
    ///
    /// If the client is in the process of shutting down, this function
    /// returns `RpcServerError::ClientQuit`.  This is intended to be checked
    /// by long-running notification handlers to stop processing if there is
    /// no more work needed to be done.
    pub async fn queue_notification(&self, marshalled_json: Vec<u8>) -> Result<(), RpcServerError> {
        // Don't queue the message if disconnected.
        if self.disconnected() {
            return Err(RpcServerError::ClientQuit);
        }

        tokio::select! {
            res = self.ntfn_tx.send(marshalled_json) => match res {
                Ok(_) => Ok(()),
                Err(_) => Err(RpcServerError::ClientQuit),
            },

            _ = self.quit.cancelled() => Err(RpcServerError::ClientQuit),
        }
    }

    /// Handles all incoming messages for the websocket connection.
    async fn in_handler<R>(self: Arc<Self>, mut reader: R)
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
    {
        'out: loop {
            tokio::select! {
                // Break out of the loop once the quit signal has been
                // cancelled.
                _ = self.quit.cancelled() => break 'out,

                frame = reader.next() => {
                    let frame = match frame {
                        Some(frame) => frame,

                        None => break 'out,
                    };

                    let msg = match frame {
                        Ok(msg) => msg,

                        Err(e) => {
                            // Log the error if it's not due to disconnecting.
                            match e {
                                WsError::ConnectionClosed | WsError::AlreadyClosed => {}

                                _ => error!(
                                    "Websocket receive error from {}: {}",
                                    self.addr, e
                                ),
                            }

                            break 'out;
                        }
                    };

                    match msg {
                        Message::Text(text) => self.handle_message(text.as_bytes()).await,
                        Message::Binary(data) => self.handle_message(&data).await,
                        Message::Close(_) => break 'out,
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                    }
                }
            }
        }

        // Ensure the connection is closed.
        self.disconnect();
        self.wg.done();
        trace!("Websocket client input handler done for {}", self.addr);
    }

    /// The main handler for incoming requests.  It enforces authentication,
    /// parses the incoming json, looks up and executes handlers (including
    /// pass through for standard RPC commands), and sends the appropriate
    /// response.  It also detects commands which are marked as long-running
    /// and sends them off to the async handler for processing.
    pub(crate) async fn handle_message(self: &Arc<Self>, msg: &[u8]) {
        if !self.authenticated.load(Ordering::SeqCst) {
            // Disconnect immediately if the provided command fails to parse
            // when the client is not already authenticated.
            let request: btcjson::Request = match serde_json::from_slice(msg) {
                Ok(request) => request,

                Err(_) => {
                    self.disconnect();
                    return;
                }
            };

            let parsed = match commands::parse_cmd(&request, &*self.server.standard_dispatcher) {
                Ok(parsed) => parsed,

                Err(_) => {
                    self.disconnect();
                    return;
                }
            };

            // Disconnect immediately if the first command is not
            // authenticate when not already authenticated.
            let auth_cmd = match parsed.cmd {
                Some(ChainCommand::Authenticate(ref cmd)) => cmd,

                _ => {
                    warn!("Unauthenticated websocket message received");
                    self.disconnect();
                    return;
                }
            };

            // Check credentials.
            let auth_sha = Config::auth_digest(&auth_cmd.username, &auth_cmd.passphrase);
            let cmp =
                constant_time::verify_slices_are_equal(&auth_sha, &self.server.config.auth_sha)
                    .is_ok();
            let limit_cmp = constant_time::verify_slices_are_equal(
                &auth_sha,
                &self.server.config.limit_auth_sha,
            )
            .is_ok();
            if !cmp && !limit_cmp {
                warn!("Auth failure.");
                self.disconnect();
                return;
            }
            self.authenticated.store(true, Ordering::SeqCst);
            self.is_admin.store(cmp, Ordering::SeqCst);

            // Marshal and send response.
            let reply = match btcjson::create_marshalled_reply(&parsed.id, None, None) {
                Ok(reply) => reply,

                Err(e) => {
                    error!("Failed to marshal authenticate reply: {}", e);
                    return;
                }
            };
            self.send_message(reply, None).await;
            return;
        }

        // Attempt to parse the raw message into a JSON-RPC request.
        let request: btcjson::Request = match serde_json::from_slice(msg) {
            Ok(request) => request,

            Err(e) => {
                let json_err = RpcError::new(
                    ERR_RPC_PARSE,
                    format!("Failed to parse request: {}", e),
                );

                // Marshal and send response.
                let reply = match btcjson::create_marshalled_reply(
                    &serde_json::Value::Null,
                    None,
                    Some(json_err),
                ) {
                    Ok(reply) => reply,

                    Err(e) => {
                        error!("Failed to marshal parse failure reply: {}", e);
                        return;
                    }
                };
                self.send_message(reply, None).await;
                return;
            }
        };

        // Requests with no ID (notifications) must not have a response per
        // the JSON-RPC spec.
        if request.id.is_null() {
            return;
        }

        // Check if the user is limited and reject the request if
        // unauthorized.
        if !self.is_admin.load(Ordering::SeqCst)
            && !commands::RPC_LIMITED.contains(&request.method.as_str())
        {
            let json_err = RpcError::new(
                ERR_RPC_INVALID_PARAMS,
                "limited user not authorized for this method".into(),
            );

            // Marshal and send response.
            let reply =
                match btcjson::create_marshalled_reply(&request.id, None, Some(json_err)) {
                    Ok(reply) => reply,

                    Err(e) => {
                        error!("Failed to marshal parse failure reply: {}", e);
                        return;
                    }
                };
            self.send_message(reply, None).await;
            return;
        }

        // Attempt to parse the JSON-RPC request into a known concrete
        // command.
        let parsed = match commands::parse_cmd(&request, &*self.server.standard_dispatcher) {
            Ok(parsed) => parsed,

            Err(json_err) => {
                // Marshal and send response.
                let reply =
                    match btcjson::create_marshalled_reply(&request.id, None, Some(json_err)) {
                        Ok(reply) => reply,

                        Err(e) => {
                            error!("Failed to marshal parse failure reply: {}", e);
                            return;
                        }
                    };
                self.send_message(reply, None).await;
                return;
            }
        };
        debug!("Received command <{}> from {}", parsed.method, self.addr);

        // Disconnect if already authenticated and another authenticate
        // command is received.
        if let Some(ChainCommand::Authenticate(_)) = parsed.cmd {
            warn!("Websocket client {} is already authenticated", self.addr);
            self.disconnect();
            return;
        }

        // When the command is marked as a long-running command, send it off
        // to the async handler for processing.
        if commands::is_async_command(&parsed.method) {
            // Start up the async task for handling long-running requests
            // asynchronously if needed.
            if !self.async_started.swap(true, Ordering::SeqCst) {
                trace!("Starting async handler for {}", self.addr);
                self.start_async_handler();
            }
            let _ = self.async_tx.send(parsed).await;
            return;
        }

        // Websocket extension commands run inline; anything else falls back
        // to the standard command dispatcher.
        let (result, json_err) = match parsed.cmd {
            None => {
                self.server
                    .standard_dispatcher
                    .standard_cmd_result(&parsed.method, &parsed.params)
                    .await
            }

            Some(_) => match commands::execute_ws_handler(self, &parsed).await {
                Ok(result) => (result, None),
                Err(e) => (None, Some(e)),
            },
        };

        let reply = match btcjson::create_marshalled_reply(&parsed.id, result, json_err) {
            Ok(reply) => reply,

            Err(e) => {
                error!(
                    "Failed to marshal reply for <{}> command: {}",
                    parsed.method, e
                );
                return;
            }
        };
        self.send_message(reply, None).await;
    }

    /// Handles the queueing of outgoing notifications for the websocket
    /// client.  This runs as a muxer for various sources of input to ensure
    /// that queueing up notifications to be sent will not block.  Otherwise,
    /// slow clients could bog down the other systems (such as the mempool or
    /// block manager) which are queueing the data.  The data is passed on to
    /// the output handler to actually be written.
    async fn notification_queue_handler(self: Arc<Self>, mut ntfn_rx: mpsc::Receiver<Vec<u8>>) {
        let (ntfn_sent_tx, mut ntfn_sent_rx) = mpsc::channel::<bool>(1); // nonblocking sync

        // pending_ntfns is used as a queue for notifications that are ready
        // to be sent once there are no outstanding notifications currently
        // being sent.  The waiting flag is used over simply checking for
        // items in the pending queue to ensure cleanup knows what has and
        // hasn't been sent to the output handler.
        let mut pending_ntfns: VecDeque<Vec<u8>> = VecDeque::new();
        let mut waiting = false;

        'out: loop {
            tokio::select! {
                // This channel is notified when a message is being queued to
                // be sent across the network socket.  It will either send
                // the message immediately if a send is not already in
                // progress, or queue the message to be sent once the other
                // pending messages are sent.
                msg = ntfn_rx.recv() => {
                    let msg = match msg {
                        Some(msg) => msg,

                        None => break 'out,
                    };

                    if !waiting {
                        self.send_message(msg, Some(ntfn_sent_tx.clone())).await;
                    } else {
                        pending_ntfns.push_back(msg);
                    }
                    waiting = true;
                }

                // This channel is notified when a notification has been sent
                // across the network socket.
                _ = ntfn_sent_rx.recv() => {
                    // No longer waiting if there are no more messages in the
                    // pending messages queue.
                    match pending_ntfns.pop_front() {
                        None => waiting = false,

                        // Notify the output handler about the next item to
                        // asynchronously send.
                        Some(msg) => self.send_message(msg, Some(ntfn_sent_tx.clone())).await,
                    }
                }

                _ = self.quit.cancelled() => break 'out,
            }
        }

        // Drain any wait channels before exiting so nothing is left waiting
        // around to send.
        while ntfn_rx.try_recv().is_ok() {}
        while ntfn_sent_rx.try_recv().is_ok() {}

        self.wg.done();
        trace!(
            "Websocket client notification queue handler done for {}",
            self.addr
        );
    }

    /// Handles all outgoing messages for the websocket connection.  It uses
    /// a buffered channel to serialize output messages while allowing the
    /// sender to continue running asynchronously.
    async fn out_handler<W>(self: Arc<Self>, mut writer: W, mut send_rx: mpsc::Receiver<WsResponse>)
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: std::fmt::Display + Send,
    {
        'out: loop {
            // Send any messages ready for send until the quit signal is
            // cancelled.
            tokio::select! {
                r = send_rx.recv() => {
                    let r = match r {
                        Some(r) => r,

                        None => break 'out,
                    };

                    let text = match String::from_utf8(r.msg) {
                        Ok(text) => text,

                        Err(e) => {
                            // Drop the malformed message but keep the
                            // connection; acknowledge so the notification
                            // queue keeps moving.
                            error!("Failed to utf8 encode outgoing message: {}", e);
                            if let Some(done) = r.done {
                                let _ = done.send(true).await;
                            }
                            continue;
                        }
                    };

                    match writer.send(Message::Text(text)).await {
                        Ok(_) => {
                            if let Some(done) = r.done {
                                let _ = done.send(true).await;
                            }
                        }

                        Err(e) => {
                            warn!("Websocket send error to {}: {}", self.addr, e);
                            self.disconnect();
                            break 'out;
                        }
                    }
                }

                _ = self.quit.cancelled() => break 'out,
            }
        }

        // Drain any wait channels before exiting so nothing is left waiting
        // around to send.
        while let Ok(r) = send_rx.try_recv() {
            if let Some(done) = r.done {
                let _ = done.send(false).await;
            }
        }

        // Ensure the socket is closed exactly once on the way out.
        let _ = writer.close().await;

        self.wg.done();
        trace!("Websocket client output handler done for {}", self.addr);
    }

    /// Starts the async handler which executes long-running requests such as
    /// rescans.  The task is not started until the first long-running
    /// request is made.
    fn start_async_handler(self: &Arc<Self>) {
        let async_rx = match self.async_rx.lock().unwrap().take() {
            Some(async_rx) => async_rx,

            None => {
                warn!("Async handler for {} started more than once", self.addr);
                return;
            }
        };

        self.wg.add(1);
        let client = self.clone();
        tokio::spawn(async move { client.async_handler(async_rx).await });
    }

    /// Handles all long-running requests such as rescans which are not run
    /// directly in the input handler unlike most requests.  This allows
    /// normal quick requests to continue to be processed and responded to
    /// even while lengthy operations are underway.  Only one long-running
    /// operation is permitted at a time, so multiple long-running requests
    /// are queued and serialized.
    async fn async_handler(self: Arc<Self>, mut async_rx: mpsc::Receiver<ParsedRpcCmd>) {
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1); // nonblocking sync
        let mut pending_cmds: VecDeque<ParsedRpcCmd> = VecDeque::new();
        let mut waiting = false;

        'out: loop {
            tokio::select! {
                cmd = async_rx.recv() => {
                    let cmd = match cmd {
                        Some(cmd) => cmd,

                        None => break 'out,
                    };

                    if !waiting {
                        self.run_async_handler(cmd, done_tx.clone());
                    } else {
                        pending_cmds.push_back(cmd);
                    }
                    waiting = true;
                }

                _ = done_rx.recv() => {
                    // No longer waiting if there are no more commands in the
                    // pending queue.
                    match pending_cmds.pop_front() {
                        None => waiting = false,

                        Some(cmd) => self.run_async_handler(cmd, done_tx.clone()),
                    }
                }

                _ = self.quit.cancelled() => break 'out,
            }
        }

        // Drain any wait channels before exiting so nothing is left waiting
        // around to send.
        while async_rx.try_recv().is_ok() {}
        while done_rx.try_recv().is_ok() {}

        self.wg.done();
        trace!("Websocket client async handler done for {}", self.addr);
    }

    /// Runs the handler for the passed long-running command on a child task
    /// and sends the reply.  The done channel is signalled when the handler
    /// finishes, regardless of outcome.
    fn run_async_handler(self: &Arc<Self>, cmd: ParsedRpcCmd, done_tx: mpsc::Sender<()>) {
        self.wg.add(1);
        let client = self.clone();

        tokio::spawn(async move {
            let (result, json_err) = match commands::execute_ws_handler(&client, &cmd).await {
                Ok(result) => (result, None),
                Err(e) => (None, Some(e)),
            };

            match btcjson::create_marshalled_reply(&cmd.id, result, json_err) {
                Ok(reply) => client.send_message(reply, None).await,

                Err(e) => {
                    error!("Failed to marshal reply for <{}> command: {}", cmd.method, e);
                }
            }

            let _ = done_tx.send(()).await;
            client.wg.done();
        });
    }
}

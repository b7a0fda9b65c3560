use {
    super::{
        client::WsClient,
        collaborators::{BlockManager, ChainDb, ScriptParser, StandardRpcDispatcher},
        config::Config,
        notification_manager::NotificationManager,
    },
    futures::{Sink, SinkExt, Stream},
    log::{error, info},
    std::sync::Arc,
    tokio_tungstenite::tungstenite::{Error as WsError, Message},
};

/// The websocket portion of the RPC server.  It tracks connected clients
/// through the notification manager and hands each new connection its own
/// processing pipeline.
pub struct RpcServer {
    pub(crate) config: Config,
    pub(crate) ntfn_mgr: NotificationManager,
    pub(crate) db: Arc<dyn ChainDb>,
    pub(crate) block_manager: Arc<dyn BlockManager>,
    pub(crate) script_parser: Arc<dyn ScriptParser>,
    pub(crate) standard_dispatcher: Arc<dyn StandardRpcDispatcher>,
}

impl RpcServer {
    /// Returns a new websocket RPC server wired to its collaborators.  The
    /// notification manager must be started with [`RpcServer::start`] before
    /// clients are served.
    pub fn new(
        config: Config,
        db: Arc<dyn ChainDb>,
        block_manager: Arc<dyn BlockManager>,
        script_parser: Arc<dyn ScriptParser>,
        standard_dispatcher: Arc<dyn StandardRpcDispatcher>,
    ) -> Arc<RpcServer> {
        let ntfn_mgr = NotificationManager::new(config.chain_params, script_parser.clone());

        Arc::new(RpcServer {
            config,
            ntfn_mgr,
            db,
            block_manager,
            script_parser,
            standard_dispatcher,
        })
    }

    /// Starts the notification manager tasks.
    pub fn start(&self) {
        self.ntfn_mgr.start();
    }

    /// The notification manager, through which the block manager and the
    /// mempool publish chain events.
    pub fn notification_manager(&self) -> &NotificationManager {
        &self.ntfn_mgr
    }

    /// Handles a new websocket client over the already-hijacked frame
    /// channel by creating a new client, starting it, and blocking until the
    /// connection closes.  Since it blocks, it must be run on its own task.
    /// Any read deadline set before the connection was hijacked must have
    /// been cleared by the HTTP layer handing over the split halves.
    pub async fn websocket_handler<R, W>(
        self: &Arc<Self>,
        reader: R,
        mut writer: W,
        remote_addr: String,
        authenticated: bool,
        is_admin: bool,
    ) where
        R: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: std::fmt::Display + Send,
    {
        // Limit the max number of websocket clients.
        info!("New websocket client {}", remote_addr);
        if self.ntfn_mgr.num_clients().await + 1 > self.config.rpc_max_websockets {
            info!(
                "Max websocket clients exceeded [{}] - disconnecting client {}",
                self.config.rpc_max_websockets, remote_addr
            );
            if let Err(e) = writer.close().await {
                error!("Failed to close refused client {}: {}", remote_addr, e);
            }
            return;
        }

        // Create a new websocket client to handle the new websocket
        // connection and wait for it to shutdown.  Once it has shutdown (and
        // hence disconnected), remove it and any notifications it registered
        // for.
        let client = WsClient::new(self.clone(), remote_addr.clone(), authenticated, is_admin);
        self.ntfn_mgr.add_client(client.clone()).await;
        client.start(reader, writer);
        client.wait_for_shutdown().await;
        self.ntfn_mgr.remove_client(client).await;
        info!("Disconnected websocket client {}", remote_addr);
    }

    /// Shuts down the websocket server, disconnecting every client.
    pub fn shutdown(&self) {
        self.ntfn_mgr.shutdown();
    }

    /// Blocks until the notification manager tasks have finished.
    pub async fn wait_for_shutdown(&self) {
        self.ntfn_mgr.wait_for_shutdown().await;
    }
}

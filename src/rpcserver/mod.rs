//! Package rpcserver implements the websocket portion of the RPC server:
//! per-connection client pipelines, command dispatch, the notification
//! manager routing chain events to subscribers, and the historical rescan.

pub mod collaborators;
mod client;
mod commands;
mod config;
pub(crate) mod constants;
mod errors;
mod notification_manager;
mod queue;
mod rescan;
mod server;
#[cfg(test)]
pub mod tests;

pub use client::WsClient;
pub use commands::ParsedRpcCmd;
pub use config::Config;
pub use errors::RpcServerError;
pub use notification_manager::{Notification, NotificationManager};
pub use server::RpcServer;

/// The number of elements the websocket send channel can queue before
/// blocking.  Note that this only applies to requests handled directly in the
/// websocket client input handler or the async handler since notifications
/// have their own queueing mechanism independent of the send channel buffer.
pub(crate) const WEBSOCKET_SEND_BUFFER_SIZE: usize = 50;

/// Minimum number of seconds between rescan progress notifications.
pub(crate) const RESCAN_PROGRESS_INTERVAL_SECS: u64 = 10;

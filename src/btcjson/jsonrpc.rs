use super::RpcError;

/// A raw JSON-RPC request as read off the wire.  Requests with a null id are
/// notifications per the JSON-RPC spec and must not receive a reply.
#[derive(serde::Deserialize, Default, Debug)]
#[serde(default)]
pub struct Request {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    pub params: Vec<serde_json::Value>,
}

/// A JSON-RPC reply sent for a single request.
#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct Reply {
    pub result: serde_json::Value,
    pub error: Option<RpcError>,
    pub id: serde_json::Value,
}

/// A server-initiated JSON-RPC notification: a request with a null id.
#[derive(serde::Serialize)]
struct NotificationRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a [serde_json::Value],
    id: Option<()>,
}

/// Marshals a reply for the passed id, result and error into a JSON byte
/// buffer ready to be sent to a client.
pub fn create_marshalled_reply(
    id: &serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<RpcError>,
) -> Result<Vec<u8>, serde_json::Error> {
    let reply = Reply {
        result: result.unwrap_or(serde_json::Value::Null),
        error,
        id: id.clone(),
    };

    serde_json::to_vec(&reply)
}

/// Marshals a server-initiated notification with the passed method and
/// positional parameters.
pub fn marshal_notification(
    method: &str,
    params: &[serde_json::Value],
) -> Result<Vec<u8>, serde_json::Error> {
    let request = NotificationRequest {
        jsonrpc: "1.0",
        method,
        params,
        id: None,
    };

    serde_json::to_vec(&request)
}

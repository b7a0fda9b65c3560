use {
    super::constants,
    crate::chaincfg::{Params, MAIN_NET_PARAMS},
    base64::{engine::general_purpose, Engine},
    ring::digest,
};

/// Holds the runtime options of the websocket server.
#[derive(Clone)]
pub struct Config {
    /// Maximum number of concurrently connected websocket clients.  The
    /// connection that would exceed the limit is refused.
    pub rpc_max_websockets: usize,

    /// SHA-256 digest of the HTTP basic authorization header value of the
    /// full-access credentials.
    pub auth_sha: [u8; 32],

    /// SHA-256 digest of the HTTP basic authorization header value of the
    /// limited-access credentials.
    pub limit_auth_sha: [u8; 32],

    /// Parameters of the active network, used to decode payment addresses.
    pub chain_params: Params,

    /// Capacity of the per-client send channel for command replies.
    pub send_buffer_size: usize,
}

impl Config {
    /// Computes the authentication digest for a username and passphrase:
    /// the SHA-256 of the HTTP basic authorization header value.
    pub fn auth_digest(username: &str, passphrase: &str) -> [u8; 32] {
        let login = format!("{}:{}", username, passphrase);
        let auth = format!("Basic {}", general_purpose::STANDARD.encode(login));

        let sha = digest::digest(&digest::SHA256, auth.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(sha.as_ref());
        out
    }

    /// Builds a configuration from the process environment.  Unset values
    /// keep their defaults; credentials are read from RPC_USER/RPC_PASS and
    /// RPC_LIMIT_USER/RPC_LIMIT_PASS.
    pub fn from_env() -> Config {
        let mut config = Config::default();

        if let Ok(max) = std::env::var("RPC_MAX_WEBSOCKETS") {
            if let Ok(max) = max.parse() {
                config.rpc_max_websockets = max;
            }
        }

        if let Ok(size) = std::env::var("RPC_SEND_BUFFER_SIZE") {
            if let Ok(size) = size.parse() {
                config.send_buffer_size = size;
            }
        }

        let user = std::env::var("RPC_USER").unwrap_or_default();
        let pass = std::env::var("RPC_PASS").unwrap_or_default();
        if !user.is_empty() {
            config.auth_sha = Config::auth_digest(&user, &pass);
        }

        let limit_user = std::env::var("RPC_LIMIT_USER").unwrap_or_default();
        let limit_pass = std::env::var("RPC_LIMIT_PASS").unwrap_or_default();
        if !limit_user.is_empty() {
            config.limit_auth_sha = Config::auth_digest(&limit_user, &limit_pass);
        }

        config
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            rpc_max_websockets: 25,
            auth_sha: [0; 32],
            limit_auth_sha: [0; 32],
            chain_params: MAIN_NET_PARAMS,
            send_buffer_size: constants::WEBSOCKET_SEND_BUFFER_SIZE,
        }
    }
}

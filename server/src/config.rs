use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Realtime relay server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "relay-server", version, about = "Presence and realtime relay server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RELAY_PORT", default_value = "3000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RELAY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// HS256 secret shared with the auth service. Without it WebSocket
    /// connections are accepted unauthenticated.
    #[arg(long, env = "RELAY_JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Bearer token required on /internal hooks. Open when unset.
    #[arg(long, env = "RELAY_INTERNAL_TOKEN")]
    pub internal_token: Option<String>,

    /// Typing indicator auto-expiry in milliseconds
    #[arg(long, env = "RELAY_TYPING_TIMEOUT_MS", default_value = "3000")]
    pub typing_timeout_ms: u64,

    /// Interval between server pings
    #[arg(long, env = "RELAY_PING_INTERVAL_SECS", default_value = "25")]
    pub ping_interval_secs: u64,

    /// Close the connection if no pong arrives within this many seconds
    #[arg(long, env = "RELAY_PONG_TIMEOUT_SECS", default_value = "60")]
    pub pong_timeout_secs: u64,

    /// Unanswered calls fail after this many seconds of ringing
    #[arg(long, env = "RELAY_RING_TIMEOUT_SECS", default_value = "30")]
    pub ring_timeout_secs: u64,

    /// How long per-message relay state (status ledger, participants,
    /// reactions) is kept after its last update
    #[arg(long, env = "RELAY_MESSAGE_RETENTION_SECS", default_value = "86400")]
    pub message_retention_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            config: "./relay.toml".to_string(),
            json_logs: false,
            generate_config: false,
            jwt_secret: None,
            internal_token: None,
            typing_timeout_ms: 3000,
            ping_interval_secs: 25,
            pong_timeout_secs: 60,
            ring_timeout_secs: 30,
            message_retention_secs: 86400,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs.max(1))
    }

    pub fn message_retention(&self) -> Duration {
        Duration::from_secs(self.message_retention_secs)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# HS256 secret shared with the auth service that issues access tokens.
# Clients present the token as ?token=... or Authorization: Bearer ...
# When unset, WebSocket connections are not authenticated.
# jwt_secret = ""

# Bearer token required by the /internal hooks used by the HTTP API.
# internal_token = ""

# ---- Realtime ----

# Typing indicator auto-expiry in milliseconds (default: 3000)
# typing_timeout_ms = 3000

# WebSocket heartbeat (defaults: ping every 25s, drop after 60s without pong)
# ping_interval_secs = 25
# pong_timeout_secs = 60

# Seconds an unanswered call keeps ringing before it fails (default: 30)
# ring_timeout_secs = 30

# Seconds per-message relay state is kept after its last update (default: 86400)
# message_retention_secs = 86400
"#
    .to_string()
}

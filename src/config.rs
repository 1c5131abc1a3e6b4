use anyhow::Context;
use serde::Deserialize;

/// Environment variable naming an optional YAML config file.
pub const CONFIG_ENV: &str = "SWITCHBOARD_CONFIG";

/// Environment variable overriding `server.host` and `server.port` (`host:port`).
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub reactor: ReactorConfig,
    pub connection: ConnectionConfig,
}

/// Socket setup for the listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Pending-connection queue depth handed to `listen(2)`.
    pub backlog: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Upper bound on a single poll, in milliseconds.
    pub poll_timeout_ms: u64,
    /// How long the default idle action sleeps, in milliseconds.
    pub idle_sleep_ms: u64,
    /// Byte on the control channel that stops the loop.
    pub quit_char: char,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum bytes taken from the socket per readable event.
    pub read_size: usize,
    /// Maximum bytes handed to the socket per writable event.
    pub send_chunk: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            backlog: 16,
        }
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 10_000,
            idle_sleep_ms: 100,
            quit_char: 'q',
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_size: 1024,
            send_chunk: 4096,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Builds the effective configuration: defaults, then the YAML file named
    /// by `SWITCHBOARD_CONFIG`, then the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                Self::from_yaml(&raw).with_context(|| format!("parsing config file {path}"))?
            }
            Err(_) => Self::default(),
        };

        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            cfg.apply_listen(&listen)?;
        }

        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(raw)?;
        Ok(cfg)
    }

    /// Splits `host:port` into the server section. The port is taken after the
    /// last colon so bracketed IPv6 hosts survive.
    pub fn apply_listen(&mut self, listen: &str) -> anyhow::Result<()> {
        let (host, port) = listen
            .rsplit_once(':')
            .with_context(|| format!("{LISTEN_ENV} must be host:port, got {listen:?}"))?;

        self.server.port = port
            .parse()
            .with_context(|| format!("invalid port in {LISTEN_ENV}: {port:?}"))?;
        self.server.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        Ok(())
    }
}

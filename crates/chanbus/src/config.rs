//! Bus configuration. Defaults suit tests and single-process setups; deployments
//! override through `CHANBUS_*` environment variables.

use std::time::Duration;

pub const ENV_NODE_ID: &str = "CHANBUS_NODE_ID";
pub const ENV_REPLY_TIMEOUT_MS: &str = "CHANBUS_REPLY_TIMEOUT_MS";
pub const ENV_DISCOVERY_TIMEOUT_MS: &str = "CHANBUS_DISCOVERY_TIMEOUT_MS";
pub const ENV_MAX_FRAME_LEN: &str = "CHANBUS_MAX_FRAME_LEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidValue { key: &'static str, value: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "Invalid value for {}: {:?}", key, value),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// High bits of every channel this node generates.
    pub node_id: u32,
    /// How long a client call waits for its reply.
    pub reply_timeout: Duration,
    /// How long discovery waits for the first owner to answer.
    pub discovery_timeout: Duration,
    /// Frames larger than this are dropped by peer links.
    pub max_frame_len: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            reply_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(2),
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

impl BusConfig {
    pub fn with_node_id(mut self, node_id: u32) -> Self {
        self.node_id = node_id;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Defaults overridden by any `CHANBUS_*` variables that are set.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like `from_env`, reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_NODE_ID) {
            config.node_id = parse(ENV_NODE_ID, &v)?;
        }
        if let Some(v) = lookup(ENV_REPLY_TIMEOUT_MS) {
            config.reply_timeout = Duration::from_millis(parse(ENV_REPLY_TIMEOUT_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_DISCOVERY_TIMEOUT_MS) {
            config.discovery_timeout = Duration::from_millis(parse(ENV_DISCOVERY_TIMEOUT_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_MAX_FRAME_LEN) {
            config.max_frame_len = parse(ENV_MAX_FRAME_LEN, &v)?;
        }
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidValue { key, value: value.to_string() })
}

use alloy::primitives::Address;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub chain: ChainConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC HTTP endpoint of the node.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Chain id every signed transaction is bound to. Checked against the node at startup.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// DataMarketplace contract address (0x-prefixed).
    pub contract_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Sleep between poll iterations.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Blocks to look back on a fresh start (no state file).
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
    /// Transactions are skipped while the network gas price is above this.
    #[serde(default = "default_gas_price_ceiling_wei")]
    pub gas_price_ceiling_wei: u128,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Send attempts per transaction when the node rejects nonce or price.
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    /// Upper bound on one full iteration, RPC calls included.
    #[serde(default = "default_iteration_deadline_secs")]
    pub iteration_deadline_secs: u64,
    /// Watermark + dedupe set file.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Publish the responder's content through `updateDataNeeded` when it changes.
    #[serde(default)]
    pub publish_data_needed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderMode {
    Http,
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponderConfig {
    #[serde(default = "default_responder_mode")]
    pub mode: ResponderMode,
    /// Endpoint of the off-chain response service (http mode).
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_responder_timeout_secs")]
    pub timeout_secs: u64,
    /// Verdict returned for every request in fixed mode.
    #[serde(default = "default_true")]
    pub fixed_is_valid: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_rpc_url() -> String {
    "https://api.calibration.node.glif.io/rpc/v1".to_string()
}
fn default_chain_id() -> u64 {
    314159
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_lookback_blocks() -> u64 {
    1000
}
fn default_gas_price_ceiling_wei() -> u128 {
    50_000_000_000
}
fn default_gas_limit() -> u64 {
    200_000
}
fn default_max_send_attempts() -> u32 {
    3
}
fn default_receipt_timeout_secs() -> u64 {
    120
}
fn default_receipt_poll_interval_ms() -> u64 {
    2000
}
fn default_iteration_deadline_secs() -> u64 {
    300
}
fn default_state_path() -> PathBuf {
    PathBuf::from("agent_state.json")
}
fn default_responder_mode() -> ResponderMode {
    ResponderMode::Http
}
fn default_responder_timeout_secs() -> u64 {
    120
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            lookback_blocks: default_lookback_blocks(),
            gas_price_ceiling_wei: default_gas_price_ceiling_wei(),
            gas_limit: default_gas_limit(),
            max_send_attempts: default_max_send_attempts(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            iteration_deadline_secs: default_iteration_deadline_secs(),
            state_path: default_state_path(),
            publish_data_needed: false,
        }
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            mode: default_responder_mode(),
            url: String::new(),
            timeout_secs: default_responder_timeout_secs(),
            fixed_is_valid: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn iteration_deadline(&self) -> Duration {
        Duration::from_secs(self.iteration_deadline_secs)
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(contents)?;

        if let Ok(url) = std::env::var("AGENT_RPC_URL") {
            config.chain.rpc_url = url;
        }
        if let Ok(addr) = std::env::var("AGENT_CONTRACT_ADDRESS") {
            config.chain.contract_address = addr;
        }
        if let Ok(url) = std::env::var("AGENT_RESPONDER_URL") {
            config.responder.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Build a config from `AGENT_*` environment variables only (no file needed).
    pub fn from_env() -> Result<Self, ConfigError> {
        let contract_address = std::env::var("AGENT_CONTRACT_ADDRESS")
            .map_err(|_| ConfigError::MissingEnv("AGENT_CONTRACT_ADDRESS".to_string()))?;

        let mut agent = AgentConfig::default();
        if let Some(v) = env_parse("AGENT_POLL_INTERVAL_SECS")? {
            agent.poll_interval_secs = v;
        }
        if let Some(v) = env_parse("AGENT_LOOKBACK_BLOCKS")? {
            agent.lookback_blocks = v;
        }
        if let Some(v) = env_parse("AGENT_GAS_PRICE_CEILING_WEI")? {
            agent.gas_price_ceiling_wei = v;
        }
        if let Ok(path) = std::env::var("AGENT_STATE_PATH") {
            agent.state_path = PathBuf::from(path);
        }

        let mut responder = ResponderConfig::default();
        responder.url = std::env::var("AGENT_RESPONDER_URL").unwrap_or_default();
        if responder.url.is_empty() {
            responder.mode = ResponderMode::Fixed;
        }

        let config = Config {
            chain: ChainConfig {
                rpc_url: std::env::var("AGENT_RPC_URL").unwrap_or_else(|_| default_rpc_url()),
                chain_id: env_parse("AGENT_CHAIN_ID")?.unwrap_or_else(default_chain_id),
                contract_address,
            },
            agent,
            responder,
            logging: LoggingConfig {
                level: std::env::var("AGENT_LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
                json: std::env::var("AGENT_LOG_JSON").map(|v| v == "1" || v == "true").unwrap_or(false),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Parsed contract address. Always succeeds after `validate`.
    pub fn contract_address(&self) -> Result<Address, ConfigError> {
        Address::from_str(self.chain.contract_address.trim()).map_err(|e| ConfigError::Invalid {
            field: "chain.contract_address",
            reason: e.to_string(),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.contract_address()?;

        if self.agent.max_send_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "agent.max_send_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.agent.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "agent.poll_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.responder.mode == ResponderMode::Http && self.responder.url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "responder.url",
                reason: "required when responder.mode = \"http\"".to_string(),
            });
        }
        Ok(())
    }
}

/// Private key hex for the agent signer. Never stored in the config file.
pub fn private_key_from_env() -> Result<String, ConfigError> {
    std::env::var("AGENT_PRIVATE_KEY")
        .or_else(|_| std::env::var("PRIVATE_KEY"))
        .map_err(|_| ConfigError::MissingEnv("AGENT_PRIVATE_KEY".to_string()))
}

fn env_parse<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                field: name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

//! Relay configuration
//!
//! Read once at startup from the environment (after loading `.env` if
//! present) and the contract metadata file, then passed into the relay as an
//! immutable [`RelaySetup`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;

use crate::bounded_cache::{DEFAULT_EVENT_CACHE_SIZE, DEFAULT_EVENT_CACHE_TTL_SECS};
use crate::chain::rpc_fallback::{parse_rpc_url, parse_rpc_urls, redact_url};
use crate::contracts::verify_abi;
use crate::relay::{RelayConfig, RelaySetup};
use crate::types::{ChainEndpoint, ChainSide};
use crate::writers::{RetryPolicy, Signer, SubmitterConfig};

// ============================================================================
// Contract metadata
// ============================================================================

/// One side of the contract metadata file
#[derive(Debug, Clone, Deserialize)]
pub struct ContractEntry {
    pub address: Address,
    pub abi: JsonAbi,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
}

/// Contract metadata keyed by chain name
#[derive(Debug, Clone, Deserialize)]
pub struct ContractInfo {
    pub source: ContractEntry,
    pub destination: ContractEntry,
}

impl ContractInfo {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read contract info {}", path.display()))?;
        Self::from_json(&raw)
            .wrap_err_with(|| format!("Malformed contract info {}", path.display()))
    }

    /// Parse and check that each ABI declares what the relay uses on that side
    pub fn from_json(raw: &str) -> Result<Self> {
        let info: ContractInfo = serde_json::from_str(raw)?;
        for side in ChainSide::ALL {
            verify_abi(side, &info.entry(side).abi).map_err(|e| eyre!(e))?;
        }
        Ok(info)
    }

    pub fn entry(&self, side: ChainSide) -> &ContractEntry {
        match side {
            ChainSide::Source => &self.source,
            ChainSide::Destination => &self.destination,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Main configuration for the relay
#[derive(Clone)]
pub struct Config {
    pub admin_address: String,
    pub private_key: String,
    /// Primary RPC URL followed by fallbacks
    pub source_rpc_urls: Vec<String>,
    pub destination_rpc_urls: Vec<String>,
    pub contract_info_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub relayer: RelayerConfig,
    pub submission: SubmissionConfig,
    /// Empty disables the health server
    pub api_bind_address: String,
}

/// Custom Debug that redacts the private key and RPC URL paths (API keys).
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact_all = |urls: &[String]| urls.iter().map(|u| redact_url(u)).collect::<Vec<_>>();
        f.debug_struct("Config")
            .field("admin_address", &self.admin_address)
            .field("private_key", &"<redacted>")
            .field("source_rpc_urls", &redact_all(&self.source_rpc_urls))
            .field("destination_rpc_urls", &redact_all(&self.destination_rpc_urls))
            .field("contract_info_path", &self.contract_info_path)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("relayer", &self.relayer)
            .field("submission", &self.submission)
            .field("api_bind_address", &self.api_bind_address)
            .finish()
    }
}

/// Loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayerConfig {
    pub poll_interval_ms: u64,
    /// 0 runs forever
    pub max_iterations: u64,
    pub max_block_range: u64,
    pub start_lookback_blocks: u64,
    pub finality_blocks: u64,
    pub reconnect_max_attempts: u32,
    pub heartbeat_cycles: u64,
    pub dry_run: bool,
    pub event_cache_size: usize,
    pub event_cache_ttl_secs: u64,
    pub rpc_timeout_ms: u64,
}

/// Transaction submission settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionConfig {
    pub retry_max_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub fee_bump_bps: u32,
    pub max_fee_multiplier_bps: u32,
    pub gas_limit: u64,
    pub confirmation_timeout_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub preflight: bool,
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_max_block_range() -> u64 {
    2000
}

fn default_start_lookback_blocks() -> u64 {
    10
}

fn default_finality_blocks() -> u64 {
    1
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_heartbeat_cycles() -> u64 {
    12
}

fn default_rpc_timeout() -> u64 {
    30_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    5000
}

fn default_retry_max_backoff() -> u64 {
    60_000
}

fn default_fee_bump_bps() -> u32 {
    2000
}

fn default_max_fee_multiplier_bps() -> u32 {
    30_000
}

fn default_gas_limit() -> u64 {
    2_000_000
}

fn default_confirmation_timeout() -> u64 {
    120_000
}

fn default_receipt_poll_interval() -> u64 {
    2000
}

/// Read an optional variable, failing on values that do not parse
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name).map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v
            .parse()
            .map_err(|e| eyre!("{} has invalid value '{}': {}", name, v, e)),
        _ => Ok(default),
    }
}

fn required_var(lookup: &impl Fn(&str) -> Option<String>, names: &[&str]) -> Result<String> {
    names
        .iter()
        .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        .map(|v| v.trim().to_string())
        .ok_or_else(|| eyre!("{} environment variable is required", names[0]))
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build and validate from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let source_rpc_urls = parse_rpc_urls(&required_var(&lookup, &["SOURCE_RPC_URL", "AVAX_RPC"])?);
        let destination_rpc_urls =
            parse_rpc_urls(&required_var(&lookup, &["DESTINATION_RPC_URL", "BSC_RPC"])?);

        let relayer = RelayerConfig {
            poll_interval_ms: parse_var(&lookup, "POLL_INTERVAL_MS", default_poll_interval())?,
            max_iterations: parse_var(&lookup, "MAX_ITERATIONS", 0)?,
            max_block_range: parse_var(&lookup, "MAX_BLOCK_RANGE", default_max_block_range())?,
            start_lookback_blocks: parse_var(
                &lookup,
                "START_LOOKBACK_BLOCKS",
                default_start_lookback_blocks(),
            )?,
            finality_blocks: parse_var(&lookup, "FINALITY_BLOCKS", default_finality_blocks())?,
            reconnect_max_attempts: parse_var(
                &lookup,
                "RECONNECT_MAX_ATTEMPTS",
                default_reconnect_attempts(),
            )?,
            heartbeat_cycles: parse_var(&lookup, "HEARTBEAT_CYCLES", default_heartbeat_cycles())?,
            dry_run: parse_var(&lookup, "DRY_RUN", false)?,
            event_cache_size: parse_var(&lookup, "EVENT_CACHE_SIZE", DEFAULT_EVENT_CACHE_SIZE)?,
            event_cache_ttl_secs: parse_var(
                &lookup,
                "EVENT_CACHE_TTL_SECS",
                DEFAULT_EVENT_CACHE_TTL_SECS,
            )?,
            rpc_timeout_ms: parse_var(&lookup, "RPC_TIMEOUT_MS", default_rpc_timeout())?,
        };

        let submission = SubmissionConfig {
            retry_max_attempts: parse_var(&lookup, "RETRY_MAX_ATTEMPTS", default_retry_attempts())?,
            retry_initial_backoff_ms: parse_var(
                &lookup,
                "RETRY_INITIAL_BACKOFF_MS",
                default_retry_backoff(),
            )?,
            retry_max_backoff_ms: parse_var(
                &lookup,
                "RETRY_MAX_BACKOFF_MS",
                default_retry_max_backoff(),
            )?,
            fee_bump_bps: parse_var(&lookup, "FEE_BUMP_BPS", default_fee_bump_bps())?,
            max_fee_multiplier_bps: parse_var(
                &lookup,
                "MAX_FEE_MULTIPLIER_BPS",
                default_max_fee_multiplier_bps(),
            )?,
            gas_limit: parse_var(&lookup, "GAS_LIMIT", default_gas_limit())?,
            confirmation_timeout_ms: parse_var(
                &lookup,
                "CONFIRMATION_TIMEOUT_MS",
                default_confirmation_timeout(),
            )?,
            receipt_poll_interval_ms: parse_var(
                &lookup,
                "RECEIPT_POLL_INTERVAL_MS",
                default_receipt_poll_interval(),
            )?,
            preflight: parse_var(&lookup, "PREFLIGHT", true)?,
        };

        let config = Config {
            admin_address: required_var(&lookup, &["ADMIN_ADDRESS"])?,
            private_key: required_var(&lookup, &["PRIVATE_KEY"])?,
            source_rpc_urls,
            destination_rpc_urls,
            contract_info_path: lookup("CONTRACT_INFO_PATH")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "contract_info.json".to_string())
                .into(),
            checkpoint_path: lookup("CHECKPOINT_PATH")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "relay_checkpoints.json".to_string())
                .into(),
            relayer,
            submission,
            api_bind_address: lookup("API_BIND_ADDRESS")
                .unwrap_or_else(|| "0.0.0.0:9090".to_string())
                .trim()
                .to_string(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let admin = Address::from_str(&self.admin_address)
            .map_err(|_| eyre!("ADMIN_ADDRESS must be a valid hex address (42 chars with 0x prefix)"))?;

        let key = self.private_key.strip_prefix("0x").unwrap_or(&self.private_key);
        match hex::decode(key) {
            Ok(bytes) if bytes.len() == 32 => {}
            _ => return Err(eyre!("PRIVATE_KEY must be 32 bytes of hex (64 chars, optional 0x)")),
        }
        let signer = Signer::from_private_key(&self.private_key)?;
        if signer.address() != admin {
            return Err(eyre!(
                "PRIVATE_KEY controls {} but ADMIN_ADDRESS is {}",
                signer.address(),
                admin
            ));
        }

        for (name, urls) in [
            ("SOURCE_RPC_URL", &self.source_rpc_urls),
            ("DESTINATION_RPC_URL", &self.destination_rpc_urls),
        ] {
            if urls.is_empty() {
                return Err(eyre!("{} cannot be empty", name));
            }
            for url in urls {
                parse_rpc_url(url).map_err(|e| eyre!("{}: {}", name, e))?;
            }
        }

        let r = &self.relayer;
        if r.max_block_range == 0 {
            return Err(eyre!("MAX_BLOCK_RANGE must be at least 1"));
        }
        if r.poll_interval_ms == 0 {
            return Err(eyre!("POLL_INTERVAL_MS must be at least 1"));
        }
        if r.reconnect_max_attempts == 0 {
            return Err(eyre!("RECONNECT_MAX_ATTEMPTS must be at least 1"));
        }
        if r.event_cache_size == 0 {
            return Err(eyre!("EVENT_CACHE_SIZE must be at least 1"));
        }

        let s = &self.submission;
        if s.retry_max_attempts == 0 {
            return Err(eyre!("RETRY_MAX_ATTEMPTS must be at least 1"));
        }
        if s.gas_limit == 0 {
            return Err(eyre!("GAS_LIMIT must be at least 1"));
        }
        if s.confirmation_timeout_ms == 0 || s.receipt_poll_interval_ms == 0 {
            return Err(eyre!(
                "CONFIRMATION_TIMEOUT_MS and RECEIPT_POLL_INTERVAL_MS must be at least 1"
            ));
        }
        if s.retry_initial_backoff_ms > s.retry_max_backoff_ms {
            return Err(eyre!(
                "RETRY_INITIAL_BACKOFF_MS cannot exceed RETRY_MAX_BACKOFF_MS"
            ));
        }
        if !self.retry_policy().escalates_every_attempt() {
            return Err(eyre!(
                "FEE_BUMP_BPS={} with MAX_FEE_MULTIPLIER_BPS={} stops raising the gas price before attempt {}",
                s.fee_bump_bps,
                s.max_fee_multiplier_bps,
                s.retry_max_attempts
            ));
        }

        if !self.api_bind_address.is_empty()
            && self.api_bind_address.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(eyre!(
                "API_BIND_ADDRESS must be host:port, got '{}'",
                self.api_bind_address
            ));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let s = &self.submission;
        RetryPolicy {
            max_attempts: s.retry_max_attempts,
            initial_backoff: Duration::from_millis(s.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(s.retry_max_backoff_ms),
            fee_bump_bps: s.fee_bump_bps,
            max_fee_multiplier_bps: s.max_fee_multiplier_bps,
        }
    }

    pub fn submitter_config(&self) -> SubmitterConfig {
        let s = &self.submission;
        SubmitterConfig {
            retry: self.retry_policy(),
            gas_limit: s.gas_limit,
            confirmation_timeout: Duration::from_millis(s.confirmation_timeout_ms),
            receipt_poll_interval: Duration::from_millis(s.receipt_poll_interval_ms),
            preflight: s.preflight,
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        let r = &self.relayer;
        RelayConfig {
            poll_interval: Duration::from_millis(r.poll_interval_ms),
            max_iterations: (r.max_iterations > 0).then_some(r.max_iterations),
            max_block_range: r.max_block_range,
            start_lookback_blocks: r.start_lookback_blocks,
            finality_blocks: r.finality_blocks,
            reconnect: RetryPolicy {
                max_attempts: r.reconnect_max_attempts,
                ..self.retry_policy()
            },
            heartbeat_cycles: r.heartbeat_cycles,
            dry_run: r.dry_run,
            event_cache_size: r.event_cache_size,
            event_cache_ttl: Duration::from_secs(r.event_cache_ttl_secs),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.relayer.rpc_timeout_ms)
    }

    /// Combine the environment with parsed contract metadata
    pub fn relay_setup(&self, info: &ContractInfo) -> Result<RelaySetup> {
        if info.source.chain_id == info.destination.chain_id {
            return Err(eyre!(
                "source and destination share chain id {}",
                info.source.chain_id
            ));
        }

        let endpoint = |side: ChainSide, urls: &[String]| {
            let entry = info.entry(side);
            ChainEndpoint {
                side,
                rpc_urls: urls.to_vec(),
                chain_id: entry.chain_id,
                contract: entry.address,
                abi: entry.abi.clone(),
            }
        };

        Ok(RelaySetup {
            source: endpoint(ChainSide::Source, &self.source_rpc_urls),
            destination: endpoint(ChainSide::Destination, &self.destination_rpc_urls),
            signer: Signer::from_private_key(&self.private_key)?,
            submitter: self.submitter_config(),
            relay: self.relay_config(),
        })
    }
}

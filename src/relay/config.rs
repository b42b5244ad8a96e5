//! Relay configuration
//!
//! Read from the `relay:` section of `config/<env>.yaml`. Endpoints, addresses,
//! the relayer key and the two main timing knobs can be overridden from the
//! environment. The key is never serialized or printed.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::abi;
use super::error::ConfigError;
use super::evm::parse_address;
use super::health::HealthConfig;
use super::processor::ProcessorConfig;
use super::relayer::RelayerConfig;
use super::scanner::ScannerConfig;
use super::signer::Signer;

pub const ENV_SOURCE_RPC_URL: &str = "SOURCE_CHAIN_RPC_URL";
pub const ENV_DEST_RPC_URL: &str = "DEST_CHAIN_RPC_URL";
pub const ENV_RELAYER_PRIVATE_KEY: &str = "RELAYER_PRIVATE_KEY";
pub const ENV_SOURCE_CONTRACT: &str = "SOURCE_BRIDGE_CONTRACT_ADDRESS";
pub const ENV_DEST_CONTRACT: &str = "DEST_BRIDGE_CONTRACT_ADDRESS";
pub const ENV_CONFIRMATION_BLOCKS: &str = "CONFIRMATION_BLOCKS";
pub const ENV_SCAN_INTERVAL: &str = "SCAN_INTERVAL_SECONDS";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    pub source_rpc_url: String,
    pub dest_rpc_url: String,
    pub source_contract: String,
    pub dest_contract: String,
    /// Hex key that signs destination mints
    #[serde(skip_serializing)]
    pub relayer_private_key: PrivateKey,

    pub confirmation_blocks: u64,
    pub scan_interval_secs: u64,
    pub scan_chunk_size: u64,
    pub event_name: String,

    pub max_relay_attempts: u32,
    pub receipt_timeout_secs: u64,
    pub gas_limit: u64,
    pub retry_backoff_secs: u64,
    pub max_retry_backoff_secs: u64,

    pub health_check_interval_secs: u64,
    pub health_probe_timeout_secs: u64,
    pub health_pause_secs: u64,
    pub error_pause_secs: u64,

    pub state_file: PathBuf,
    /// Outcome journal; in-memory only when unset
    pub ledger_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            source_rpc_url: String::new(),
            dest_rpc_url: String::new(),
            source_contract: String::new(),
            dest_contract: String::new(),
            relayer_private_key: PrivateKey::default(),
            confirmation_blocks: 12,
            scan_interval_secs: 15,
            scan_chunk_size: 100,
            event_name: abi::DEPOSIT_EVENT.to_string(),
            max_relay_attempts: 3,
            receipt_timeout_secs: 120,
            gas_limit: 200_000,
            retry_backoff_secs: 15,
            max_retry_backoff_secs: 300,
            health_check_interval_secs: 60,
            health_probe_timeout_secs: 5,
            health_pause_secs: 60,
            error_pause_secs: 60,
            state_file: PathBuf::from("scanner_state.json"),
            ledger_file: None,
        }
    }
}

impl RelayConfig {
    /// Apply environment overrides. `lookup` is `std::env::var(..).ok()` in
    /// production and a map in tests.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let strings = [
            (ENV_SOURCE_RPC_URL, &mut self.source_rpc_url),
            (ENV_DEST_RPC_URL, &mut self.dest_rpc_url),
            (ENV_SOURCE_CONTRACT, &mut self.source_contract),
            (ENV_DEST_CONTRACT, &mut self.dest_contract),
        ];
        for (name, field) in strings {
            if let Some(value) = lookup(name) {
                *field = value;
            }
        }
        if let Some(value) = lookup(ENV_RELAYER_PRIVATE_KEY) {
            self.relayer_private_key = PrivateKey(value);
        }

        if let Some(value) = lookup(ENV_CONFIRMATION_BLOCKS) {
            self.confirmation_blocks = parse_number(ENV_CONFIRMATION_BLOCKS, &value)?;
        }
        if let Some(value) = lookup(ENV_SCAN_INTERVAL) {
            self.scan_interval_secs = parse_number(ENV_SCAN_INTERVAL, &value)?;
        }
        Ok(())
    }

    /// Reject a configuration the relay cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(ENV_SOURCE_RPC_URL, &self.source_rpc_url)?;
        require(ENV_DEST_RPC_URL, &self.dest_rpc_url)?;
        self.source_contract()?;
        self.dest_contract()?;
        self.signer()?;

        let positive = [
            ("confirmation_blocks", self.confirmation_blocks),
            ("scan_interval_secs", self.scan_interval_secs),
            ("scan_chunk_size", self.scan_chunk_size),
            ("max_relay_attempts", u64::from(self.max_relay_attempts)),
            ("receipt_timeout_secs", self.receipt_timeout_secs),
            ("gas_limit", self.gas_limit),
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("health_probe_timeout_secs", self.health_probe_timeout_secs),
            ("health_pause_secs", self.health_pause_secs),
            ("error_pause_secs", self.error_pause_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be a positive integer".to_string(),
                });
            }
        }

        if abi::event_signature(&self.event_name).is_none() {
            return Err(ConfigError::Invalid {
                name: "event_name",
                reason: format!("unknown event {:?}", self.event_name),
            });
        }
        Ok(())
    }

    pub fn source_contract(&self) -> Result<Address, ConfigError> {
        address(ENV_SOURCE_CONTRACT, &self.source_contract)
    }

    pub fn dest_contract(&self) -> Result<Address, ConfigError> {
        address(ENV_DEST_CONTRACT, &self.dest_contract)
    }

    pub fn signer(&self) -> Result<Signer, ConfigError> {
        let key = &self.relayer_private_key.0;
        require(ENV_RELAYER_PRIVATE_KEY, key)?;
        Signer::from_private_key(key).map_err(|_| ConfigError::Invalid {
            name: ENV_RELAYER_PRIVATE_KEY,
            reason: "not a valid secp256k1 private key".to_string(),
        })
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            event_name: self.event_name.clone(),
            confirmation_threshold: self.confirmation_blocks,
            chunk_size: self.scan_chunk_size,
        }
    }

    pub fn relayer_config(&self) -> Result<RelayerConfig, ConfigError> {
        Ok(RelayerConfig {
            contract: self.dest_contract()?,
            signer: self.signer()?,
            receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
            gas_limit: self.gas_limit,
        })
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            poll_interval: Duration::from_secs(self.scan_interval_secs),
            health_pause: Duration::from_secs(self.health_pause_secs),
            error_pause: Duration::from_secs(self.error_pause_secs),
            max_relay_attempts: self.max_relay_attempts,
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            max_retry_backoff: Duration::from_secs(self.max_retry_backoff_secs),
            ..ProcessorConfig::default()
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            check_interval: Duration::from_secs(self.health_check_interval_secs),
            probe_timeout: Duration::from_secs(self.health_probe_timeout_secs),
            ..HealthConfig::default()
        }
    }
}

/// Relayer key as read from configuration; `Debug` never shows it
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("PrivateKey(unset)")
        } else {
            f.write_str("PrivateKey(<redacted>)")
        }
    }
}

fn require(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(())
}

fn address(name: &'static str, value: &str) -> Result<Address, ConfigError> {
    require(name, value)?;
    parse_address(value).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: format!("{:?}: {}", value, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
source_rpc_url: "http://127.0.0.1:8545"
dest_rpc_url: "http://127.0.0.1:9545"
source_contract: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
dest_contract: "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"
relayer_private_key: "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
confirmation_blocks: 6
"#;

    fn sample() -> RelayConfig {
        serde_yaml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = sample();
        assert_eq!(config.confirmation_blocks, 6);
        assert_eq!(config.scan_interval_secs, 15);
        assert_eq!(config.scan_chunk_size, 100);
        assert_eq!(config.max_relay_attempts, 3);
        assert_eq!(config.state_file, PathBuf::from("scanner_state.json"));
        assert!(config.ledger_file.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DEST_RPC_URL, "http://dest:8545"),
            (ENV_CONFIRMATION_BLOCKS, "20"),
            (ENV_SCAN_INTERVAL, " 5 "),
        ]
        .into_iter()
        .collect();

        let mut config = sample();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.dest_rpc_url, "http://dest:8545");
        assert_eq!(config.source_rpc_url, "http://127.0.0.1:8545");
        assert_eq!(config.confirmation_blocks, 20);
        assert_eq!(config.processor_config().poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_bad_numeric_override() {
        let mut config = sample();
        let err = config
            .apply_overrides(|name| (name == ENV_CONFIRMATION_BLOCKS).then(|| "twelve".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: ENV_CONFIRMATION_BLOCKS, .. }));
    }

    #[test]
    fn test_validate_rejects_missing_and_invalid() {
        let mut config = sample();
        config.source_rpc_url.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Missing(ENV_SOURCE_RPC_URL))));

        let mut config = sample();
        config.dest_contract = "0x1234".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: ENV_DEST_CONTRACT, .. })
        ));

        let mut config = sample();
        config.confirmation_blocks = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "confirmation_blocks", .. })
        ));

        let mut config = sample();
        config.scan_chunk_size = 0;
        assert!(config.validate().is_err());

        for field in ["health_pause_secs", "error_pause_secs"] {
            let mut config = sample();
            match field {
                "health_pause_secs" => config.health_pause_secs = 0,
                _ => config.error_pause_secs = 0,
            }
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid { name, .. }) if name == field
            ));
        }

        let mut config = sample();
        config.event_name = "Transfer".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "event_name", .. })
        ));
    }

    #[test]
    fn test_component_configs() {
        let config = sample();
        let relayer = config.relayer_config().unwrap();
        assert_eq!(relayer.contract, config.dest_contract().unwrap());
        assert_eq!(relayer.receipt_timeout, Duration::from_secs(120));
        assert_eq!(relayer.gas_limit, 200_000);
        let expected: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(relayer.signer.address(), expected);

        let scanner = config.scanner_config();
        assert_eq!(scanner.confirmation_threshold, 6);
        assert_eq!(scanner.event_name, "TokensDeposited");

        let health = config.health_config();
        assert_eq!(health.check_interval, Duration::from_secs(60));
        assert_eq!(health.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_relayer_key_validation_and_redaction() {
        let mut config = sample();
        config.relayer_private_key = PrivateKey::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing(ENV_RELAYER_PRIVATE_KEY))
        ));

        config.relayer_private_key = PrivateKey::new("0xnot-a-key");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: ENV_RELAYER_PRIVATE_KEY, .. })
        ));

        let config = sample();
        let printed = format!("{:?}", config);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("ac0974bec39a17e3"));
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("relayer_private_key"));
    }

    #[test]
    fn test_private_key_from_env() {
        let mut config = sample();
        config.relayer_private_key = PrivateKey::default();
        config
            .apply_overrides(|name| {
                (name == ENV_RELAYER_PRIVATE_KEY).then(|| {
                    "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d".to_string()
                })
            })
            .unwrap();
        let expected: Address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap();
        assert_eq!(config.signer().unwrap().address(), expected);
    }
}

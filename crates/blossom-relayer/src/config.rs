//! Relayer configuration, resolved once at startup.
//!
//! Missing required values fail closed at construction time, never
//! per-request. Every knob reads from a `BLOSSOM_`-prefixed environment
//! variable; tests inject a lookup instead of mutating the process
//! environment.

use std::time::Duration;

use alloy_primitives::{Address, U256};

use crate::error::{RelayerError, RelayerResult};

const DEFAULT_CHAIN: &str = "base";
const DEFAULT_NETWORK: &str = "mainnet";
const DEFAULT_VENUE: &str = "blossom";
const DEFAULT_CHAIN_ID: u64 = 8453;
const DEFAULT_SQLITE_PATH: &str = "blossom.db";
/// 1 ETH of attached native value per transaction.
const DEFAULT_MAX_VALUE_PER_TX_WEI: u128 = 1_000_000_000_000_000_000;
/// 5 ETH equivalent per decodable swap leg.
const DEFAULT_MAX_SWAP_AMOUNT_WEI: u128 = 5_000_000_000_000_000_000;
const DEFAULT_RECEIPT_POLL_MS: u64 = 2_000;
const DEFAULT_RECEIPT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_INDEXER_POLL_MS: u64 = 15_000;

/// Which ledger backend to open, chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerConfig {
    Sqlite { path: String },
    Postgres { url: String },
}

#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub rpc_url: String,
    pub chain: String,
    pub network: String,
    /// Venue label stamped onto positions this relayer writes.
    pub venue: String,
    pub chain_id: u64,
    pub router_address: Address,
    /// Hex-encoded secp256k1 secret for the relayer account.
    pub relayer_key: String,
    pub allowed_adapters: Vec<Address>,
    pub allowed_tokens: Vec<Address>,
    pub max_value_per_tx: U256,
    pub max_swap_amount: U256,
    pub receipt_poll: Duration,
    pub receipt_timeout: Duration,
    pub indexer_poll: Duration,
    /// Block before the first one the indexer reads. A fresh deployment
    /// starts at `indexer_start_block + 1` instead of replaying from
    /// genesis.
    pub indexer_start_block: u64,
    pub ledger: LedgerConfig,
}

fn config_err(message: impl Into<String>) -> RelayerError {
    RelayerError::Config(message.into())
}

fn parse_address(key: &str, raw: &str) -> RelayerResult<Address> {
    raw.parse::<Address>()
        .map_err(|e| config_err(format!("{key}: invalid address '{raw}': {e}")))
}

fn parse_address_list(key: &str, raw: &str) -> RelayerResult<Vec<Address>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_address(key, s))
        .collect()
}

fn parse_amount(key: &str, raw: &str) -> RelayerResult<U256> {
    U256::from_str_radix(raw, 10)
        .map_err(|e| config_err(format!("{key}: invalid amount '{raw}': {e}")))
}

fn parse_millis(key: &str, raw: &str) -> RelayerResult<Duration> {
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| config_err(format!("{key}: invalid duration '{raw}': {e}")))
}

impl RelayerConfig {
    pub fn from_env() -> RelayerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value lookup. `from_env` delegates here; tests
    /// pass a map.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> RelayerResult<Self> {
        let required = |key: &str| -> RelayerResult<String> {
            get(key).ok_or_else(|| config_err(format!("{key} is required")))
        };

        let rpc_url = required("BLOSSOM_RPC_URL")?;
        let router_address = parse_address("BLOSSOM_ROUTER_ADDRESS", &required("BLOSSOM_ROUTER_ADDRESS")?)?;
        let relayer_key = required("BLOSSOM_RELAYER_KEY")?;

        let chain = get("BLOSSOM_CHAIN").unwrap_or_else(|| DEFAULT_CHAIN.into());
        let network = get("BLOSSOM_NETWORK").unwrap_or_else(|| DEFAULT_NETWORK.into());
        let venue = get("BLOSSOM_VENUE").unwrap_or_else(|| DEFAULT_VENUE.into());
        let chain_id = match get("BLOSSOM_CHAIN_ID") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| config_err(format!("BLOSSOM_CHAIN_ID: '{raw}': {e}")))?,
            None => DEFAULT_CHAIN_ID,
        };

        let allowed_adapters = match get("BLOSSOM_ALLOWED_ADAPTERS") {
            Some(raw) => parse_address_list("BLOSSOM_ALLOWED_ADAPTERS", &raw)?,
            None => Vec::new(),
        };
        let allowed_tokens = match get("BLOSSOM_ALLOWED_TOKENS") {
            Some(raw) => parse_address_list("BLOSSOM_ALLOWED_TOKENS", &raw)?,
            None => Vec::new(),
        };

        let max_value_per_tx = match get("BLOSSOM_MAX_VALUE_PER_TX") {
            Some(raw) => parse_amount("BLOSSOM_MAX_VALUE_PER_TX", &raw)?,
            None => U256::from(DEFAULT_MAX_VALUE_PER_TX_WEI),
        };
        let max_swap_amount = match get("BLOSSOM_MAX_SWAP_AMOUNT") {
            Some(raw) => parse_amount("BLOSSOM_MAX_SWAP_AMOUNT", &raw)?,
            None => U256::from(DEFAULT_MAX_SWAP_AMOUNT_WEI),
        };

        let receipt_poll = match get("BLOSSOM_RECEIPT_POLL_MS") {
            Some(raw) => parse_millis("BLOSSOM_RECEIPT_POLL_MS", &raw)?,
            None => Duration::from_millis(DEFAULT_RECEIPT_POLL_MS),
        };
        let receipt_timeout = match get("BLOSSOM_RECEIPT_TIMEOUT_MS") {
            Some(raw) => parse_millis("BLOSSOM_RECEIPT_TIMEOUT_MS", &raw)?,
            None => Duration::from_millis(DEFAULT_RECEIPT_TIMEOUT_MS),
        };
        let indexer_poll = match get("BLOSSOM_INDEXER_POLL_MS") {
            Some(raw) => parse_millis("BLOSSOM_INDEXER_POLL_MS", &raw)?,
            None => Duration::from_millis(DEFAULT_INDEXER_POLL_MS),
        };
        let indexer_start_block = match get("BLOSSOM_INDEXER_START_BLOCK") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| config_err(format!("BLOSSOM_INDEXER_START_BLOCK: '{raw}': {e}")))?,
            None => 0,
        };

        // a postgres url wins over the sqlite default
        let ledger = match get("BLOSSOM_DATABASE_URL") {
            Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
                LedgerConfig::Postgres { url }
            }
            Some(url) => {
                return Err(config_err(format!(
                    "BLOSSOM_DATABASE_URL: unsupported scheme in '{url}'"
                )));
            }
            None => LedgerConfig::Sqlite {
                path: get("BLOSSOM_SQLITE_PATH").unwrap_or_else(|| DEFAULT_SQLITE_PATH.into()),
            },
        };

        Ok(Self {
            rpc_url,
            chain,
            network,
            venue,
            chain_id,
            router_address,
            relayer_key,
            allowed_adapters,
            allowed_tokens,
            max_value_per_tx,
            max_swap_amount,
            receipt_poll,
            receipt_timeout,
            indexer_poll,
            indexer_start_block,
            ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("BLOSSOM_RPC_URL", "http://localhost:8545".to_string()),
            (
                "BLOSSOM_ROUTER_ADDRESS",
                format!("{:#x}", Address::repeat_byte(0x77)),
            ),
            ("BLOSSOM_RELAYER_KEY", "11".repeat(32)),
        ])
    }

    fn build(env: &HashMap<&'static str, String>) -> RelayerResult<RelayerConfig> {
        RelayerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn minimal_env_uses_defaults() {
        let config = build(&base_env()).unwrap();
        assert_eq!(config.chain, "base");
        assert_eq!(config.chain_id, 8453);
        assert_eq!(config.receipt_poll, Duration::from_secs(2));
        assert_eq!(config.receipt_timeout, Duration::from_secs(60));
        assert_eq!(config.indexer_start_block, 0);
        assert_eq!(
            config.ledger,
            LedgerConfig::Sqlite {
                path: "blossom.db".into()
            }
        );
    }

    #[test]
    fn missing_required_values_fail_closed() {
        for key in ["BLOSSOM_RPC_URL", "BLOSSOM_ROUTER_ADDRESS", "BLOSSOM_RELAYER_KEY"] {
            let mut env = base_env();
            env.remove(key);
            let err = build(&env).unwrap_err();
            assert!(err.to_string().contains(key), "{key}: {err}");
        }
    }

    #[test]
    fn postgres_url_selects_the_networked_backend() {
        let mut env = base_env();
        env.insert(
            "BLOSSOM_DATABASE_URL",
            "postgres://blossom@db/blossom".into(),
        );
        let config = build(&env).unwrap();
        assert_eq!(
            config.ledger,
            LedgerConfig::Postgres {
                url: "postgres://blossom@db/blossom".into()
            }
        );
    }

    #[test]
    fn unsupported_database_scheme_is_rejected() {
        let mut env = base_env();
        env.insert("BLOSSOM_DATABASE_URL", "mysql://db/blossom".into());
        assert!(build(&env).is_err());
    }

    #[test]
    fn adapter_list_parses_and_trims() {
        let mut env = base_env();
        env.insert(
            "BLOSSOM_ALLOWED_ADAPTERS",
            format!(
                "{:#x}, {:#x}",
                Address::repeat_byte(0x01),
                Address::repeat_byte(0x02)
            ),
        );
        let config = build(&env).unwrap();
        assert_eq!(
            config.allowed_adapters,
            vec![Address::repeat_byte(0x01), Address::repeat_byte(0x02)]
        );
    }

    #[test]
    fn indexer_start_block_parses_and_rejects_garbage() {
        let mut env = base_env();
        env.insert("BLOSSOM_INDEXER_START_BLOCK", "19000000".into());
        let config = build(&env).unwrap();
        assert_eq!(config.indexer_start_block, 19_000_000);

        env.insert("BLOSSOM_INDEXER_START_BLOCK", "soon".into());
        assert!(build(&env).is_err());
    }

    #[test]
    fn malformed_address_is_rejected() {
        let mut env = base_env();
        env.insert("BLOSSOM_ROUTER_ADDRESS", "0xnothex".into());
        assert!(build(&env).is_err());
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::crypto::read_anchor_key;
use crate::events::{DecodeContext, EventTopics};
use anyhow::{anyhow, Result};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// File backed configuration, YAML for `.yaml`/`.yml` files and JSON otherwise.
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {:?}: {}", path, e))?;
        let config: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => serde_json::to_string_pretty(self)?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Confirmation policy of one chain's unconfirmed ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Blocks required on top of an event's block before it is processed
    pub depth: u64,
    /// Expected upper bound of blocks waiting in the ledger
    pub capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl LedgerConfig {
    /// Proof of work mainnet: 12 confirmations
    pub fn mainnet() -> Self {
        Self {
            depth: 12,
            capacity: 128,
        }
    }

    /// Local development chain with instant blocks
    pub fn local() -> Self {
        Self {
            depth: 1,
            capacity: 16,
        }
    }

    /// Builder: set confirmation depth
    pub fn with_depth(mut self, depth: u64) -> Self {
        self.depth = depth;
        self
    }

    /// Builder: set ledger capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    // Rpc url of the chain's fullnode, used for queries and relays.
    pub rpc_url: String,
    // The expected EIP-155 chain id.
    pub chain_id: u64,
    // Address of the bridge contract.
    pub contract_address: String,
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
    // First block to watch or scan.
    #[serde(default)]
    pub start_block: u64,
    // Exclusive end of a backfill scan, the chain head when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_block: Option<u64>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_confirmation_depth() -> u64 {
    LedgerConfig::mainnet().depth
}

fn default_ledger_capacity() -> usize {
    LedgerConfig::mainnet().capacity
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_relay_gas_limit() -> u64 {
    250_000
}

fn default_receipt_retry_backoff_secs() -> u64 {
    10
}

fn default_metrics_port() -> u16 {
    9184
}

fn default_channel_size() -> usize {
    1000
}

impl ChainConfig {
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig::default()
            .with_depth(self.confirmation_depth)
            .with_capacity(self.ledger_capacity)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeNodeConfig {
    // Path of the file where the anchor key (secp256k1, hex) is stored.
    pub anchor_key_path: PathBuf,
    // Expected address of the anchor key, checked at startup when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_address: Option<String>,
    // Number of distinct anchor signatures that make a record executable.
    pub threshold: usize,
    // Registered anchor addresses.
    pub anchors: Vec<String>,
    pub main: ChainConfig,
    pub sub: ChainConfig,
    #[serde(default)]
    pub topics: EventTopics,
    #[serde(default = "default_relay_gas_limit")]
    pub relay_gas_limit: u64,
    #[serde(default = "default_receipt_retry_backoff_secs")]
    pub receipt_retry_backoff_secs: u64,
    // Raft node JSON-RPC endpoint, single anchor mode when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raft_rpc_url: Option<String>,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
}

impl Config for BridgeNodeConfig {}

/// Chain section with parsed addresses
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub name: &'static str,
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract: Address,
    pub ledger: LedgerConfig,
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub poll_interval: Duration,
}

impl ChainSettings {
    pub fn decode_context(&self, topics: EventTopics) -> DecodeContext {
        DecodeContext {
            contract: self.contract,
            chain_id: U256::from(self.chain_id),
            depth: self.ledger.depth,
            topics,
        }
    }
}

/// Validated node configuration
#[derive(Debug, Clone)]
pub struct BridgeServerConfig {
    pub anchor_key: LocalWallet,
    pub anchors: Vec<Address>,
    pub threshold: usize,
    pub main: ChainSettings,
    pub sub: ChainSettings,
    pub topics: EventTopics,
    pub relay_gas_limit: u64,
    pub receipt_retry_backoff: Duration,
    pub raft_rpc_url: Option<String>,
    pub metrics_port: u16,
    pub channel_size: usize,
}

impl BridgeServerConfig {
    pub fn anchor_address(&self) -> Address {
        self.anchor_key.address()
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    Address::from_str(value).map_err(|e| anyhow!("Invalid {} {:?}: {}", field, value, e))
}

fn validate_chain(name: &'static str, config: &ChainConfig) -> Result<ChainSettings> {
    if config.confirmation_depth == 0 {
        return Err(anyhow!("[{}] confirmation-depth must be non-zero", name));
    }
    if let Some(end) = config.end_block {
        if end < config.start_block {
            return Err(anyhow!(
                "[{}] end-block {} is before start-block {}",
                name,
                end,
                config.start_block
            ));
        }
    }
    Ok(ChainSettings {
        name,
        rpc_url: config.rpc_url.clone(),
        chain_id: config.chain_id,
        contract: parse_address("contract-address", &config.contract_address)?,
        ledger: config.ledger_config(),
        start_block: config.start_block,
        end_block: config.end_block,
        poll_interval: config.poll_interval(),
    })
}

impl BridgeNodeConfig {
    pub fn validate(&self) -> Result<BridgeServerConfig> {
        info!("Starting config validation");
        let main = validate_chain("main", &self.main)?;
        let sub = validate_chain("sub", &self.sub)?;
        if main.chain_id == sub.chain_id {
            return Err(anyhow!(
                "main and sub chains share chain id {}",
                main.chain_id
            ));
        }

        let anchors = self
            .anchors
            .iter()
            .map(|a| parse_address("anchor", a))
            .collect::<Result<Vec<_>>>()?;
        let distinct: HashSet<_> = anchors.iter().collect();
        if distinct.len() != anchors.len() {
            return Err(anyhow!("anchors contain duplicated addresses"));
        }
        if self.threshold == 0 || self.threshold > anchors.len() {
            return Err(anyhow!(
                "threshold {} must be between 1 and the number of anchors {}",
                self.threshold,
                anchors.len()
            ));
        }

        let anchor_key = read_anchor_key(&self.anchor_key_path)?;
        if let Some(expected) = &self.anchor_address {
            let expected = parse_address("anchor-address", expected)?;
            if anchor_key.address() != expected {
                return Err(anyhow!(
                    "anchor key at {:?} belongs to {:?}, expected {:?}",
                    self.anchor_key_path,
                    anchor_key.address(),
                    expected
                ));
            }
        }
        info!(
            "Loaded anchor key {:?} from {:?}",
            anchor_key.address(),
            self.anchor_key_path
        );

        Ok(BridgeServerConfig {
            anchor_key,
            anchors,
            threshold: self.threshold,
            main,
            sub,
            topics: self.topics,
            relay_gas_limit: self.relay_gas_limit,
            receipt_retry_backoff: Duration::from_secs(self.receipt_retry_backoff_secs),
            raft_rpc_url: self.raft_rpc_url.clone(),
            metrics_port: self.metrics_port,
            channel_size: self.channel_size,
        })
    }
}

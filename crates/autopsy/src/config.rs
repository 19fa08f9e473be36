//! Analysis configuration, loadable from TOML or JSON.
//!
//! Everything operator-facing is plain data: allow-listed infrastructure,
//! function sets (as selectors, signatures or name globs) and numeric
//! thresholds. The engine compiles it once per run.
//!
//! ```toml
//! privilegedSelectors = ["mint", "setOwner(address)", "upgrade*"]
//! largeTransferRatio = 0.5
//! analysisTimeoutMs = 30000
//!
//! [[knownAddresses]]
//! address = "0xba12222222228d8ba445958a75a0704d566bf2c8"
//! label = "Balancer Vault"
//! kind = "vault"
//!
//! [pathRanking]
//! k = 10
//! ```

use std::path::Path;

use ethereum_types::Address;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::call_tree::DEFAULT_MAX_CALL_DEPTH;
use crate::error::AutopsyError;
use crate::selectors::SelectorSet;
use crate::types::parse_address;
use crate::value_flow::PathLimits;

/// What an allow-listed address is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InfrastructureKind {
    Token,
    WrappedNative,
    Router,
    Pair,
    Vault,
    Lending,
    #[default]
    Other,
}

impl InfrastructureKind {
    /// Kinds that quote prices.
    pub fn is_amm(&self) -> bool {
        matches!(
            self,
            InfrastructureKind::Router | InfrastructureKind::Pair | InfrastructureKind::Vault
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownAddress {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub kind: InfrastructureKind,
}

/// A `knownAddresses` entry: a bare address string or a detailed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KnownAddressEntry {
    Plain(String),
    Detailed {
        address: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        kind: InfrastructureKind,
    },
}

impl KnownAddressEntry {
    fn resolve(&self) -> Result<KnownAddress, String> {
        match self {
            KnownAddressEntry::Plain(address) => Ok(KnownAddress {
                address: parse_address(address)?,
                label: None,
                kind: InfrastructureKind::Other,
            }),
            KnownAddressEntry::Detailed {
                address,
                label,
                kind,
            } => Ok(KnownAddress {
                address: parse_address(address)?,
                label: label.clone(),
                kind: *kind,
            }),
        }
    }
}

/// Weights for the suspicious call-path ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PathRankingConfig {
    /// Number of paths reported (default: 10).
    pub k: usize,
    /// Weight of normalized path depth (default: 0.4).
    pub depth_weight: f64,
    /// Weight of normalized fan-out (default: 0.4).
    pub fanout_weight: f64,
    /// Weight of normalized signature frequency (default: 0.2).
    pub frequency_weight: f64,
}

impl Default for PathRankingConfig {
    fn default() -> Self {
        Self {
            k: 10,
            depth_weight: 0.4,
            fanout_weight: 0.4,
            frequency_weight: 0.2,
        }
    }
}

/// Top-level configuration.
///
/// Each list replaces its default when present in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutopsyConfig {
    /// Allow-listed infrastructure, never classified as attacker or victim.
    pub known_addresses: Vec<KnownAddressEntry>,
    /// Functions whose unauthorized use is access-control abuse.
    pub privileged_selectors: Vec<String>,
    /// Fee and limit mutators that strengthen an access-control hypothesis.
    pub fee_limit_selectors: Vec<String>,
    /// Case-insensitive substrings that mark a call as an AMM swap.
    pub amm_method_keywords: Vec<String>,
    /// Maximum edges in a value-flow path (default: 8).
    pub reentrancy_path_depth_limit: usize,
    /// Path prefixes visited per value-flow query (default: 10_000).
    pub max_paths_per_query: usize,
    /// Deepest accepted call nesting (default: 1024).
    pub max_call_depth: usize,
    /// Pre-order distance between a flagged call and the payout (default: 64).
    pub arithmetic_window: usize,
    /// Fraction of the largest edge of an asset that counts as large (default: 0.5).
    pub large_transfer_ratio: f64,
    /// Per-trace wall-clock budget (default: 30_000).
    pub analysis_timeout_ms: u64,
    /// Batch worker threads (default: available parallelism).
    pub concurrency: usize,
    pub path_ranking: PathRankingConfig,
}

impl Default for AutopsyConfig {
    fn default() -> Self {
        Self {
            known_addresses: default_known_addresses(),
            privileged_selectors: to_strings(DEFAULT_PRIVILEGED),
            fee_limit_selectors: to_strings(DEFAULT_FEE_LIMIT),
            amm_method_keywords: to_strings(DEFAULT_AMM_KEYWORDS),
            reentrancy_path_depth_limit: 8,
            max_paths_per_query: 10_000,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            arithmetic_window: 64,
            large_transfer_ratio: 0.5,
            analysis_timeout_ms: 30_000,
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            path_ranking: PathRankingConfig::default(),
        }
    }
}

impl AutopsyConfig {
    /// Load from a `.json` file or, for any other extension, TOML.
    pub fn load(path: &Path) -> Result<Self, AutopsyError> {
        let raw = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: AutopsyConfig = if is_json {
            serde_json::from_str(&raw)?
        } else {
            toml::from_str(&raw)?
        };
        config.validate().map_err(AutopsyError::Config)?;
        Ok(config)
    }

    /// Validate configuration values, returning an error message on failure.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.large_transfer_ratio > 0.0 && self.large_transfer_ratio <= 1.0) {
            return Err(format!(
                "largeTransferRatio must be in (0.0, 1.0], got {}",
                self.large_transfer_ratio
            ));
        }
        if self.reentrancy_path_depth_limit == 0 {
            return Err("reentrancyPathDepthLimit must be > 0".to_string());
        }
        if self.max_paths_per_query == 0 {
            return Err("maxPathsPerQuery must be > 0".to_string());
        }
        if !(1..=DEFAULT_MAX_CALL_DEPTH).contains(&self.max_call_depth) {
            return Err(format!(
                "maxCallDepth must be in [1, {DEFAULT_MAX_CALL_DEPTH}], got {}",
                self.max_call_depth
            ));
        }
        if self.analysis_timeout_ms == 0 {
            return Err("analysisTimeoutMs must be > 0".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be > 0".to_string());
        }
        let ranking = &self.path_ranking;
        for (name, weight) in [
            ("pathRanking.depthWeight", ranking.depth_weight),
            ("pathRanking.fanoutWeight", ranking.fanout_weight),
            ("pathRanking.frequencyWeight", ranking.frequency_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(format!("{name} must be in [0.0, 1.0], got {weight}"));
            }
        }
        if self.amm_method_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err("ammMethodKeywords must not contain empty entries".to_string());
        }
        self.registry()?;
        SelectorSet::parse(&self.privileged_selectors)
            .map_err(|e| format!("privilegedSelectors: {e}"))?;
        SelectorSet::parse(&self.fee_limit_selectors)
            .map_err(|e| format!("feeLimitSelectors: {e}"))?;
        Ok(())
    }

    /// Resolve `knownAddresses` into a lookup table.
    pub fn registry(&self) -> Result<AddressRegistry, String> {
        let mut entries = FxHashMap::default();
        for entry in &self.known_addresses {
            let known = entry
                .resolve()
                .map_err(|e| format!("knownAddresses: {e}"))?;
            entries.insert(known.address, known);
        }
        Ok(AddressRegistry { entries })
    }

    pub fn path_limits(&self) -> PathLimits {
        PathLimits {
            max_depth: self.reentrancy_path_depth_limit,
            max_paths: self.max_paths_per_query,
        }
    }
}

/// Compiled allow-list.
#[derive(Debug, Clone, Default)]
pub struct AddressRegistry {
    entries: FxHashMap<Address, KnownAddress>,
}

impl AddressRegistry {
    pub fn get(&self, address: Address) -> Option<&KnownAddress> {
        self.entries.get(&address)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.entries.contains_key(&address)
    }

    pub fn is_amm(&self, address: Address) -> bool {
        self.get(address).is_some_and(|k| k.kind.is_amm())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const DEFAULT_KNOWN: &[(&str, &str, InfrastructureKind)] = &[
    (
        "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
        "WETH",
        InfrastructureKind::WrappedNative,
    ),
    (
        "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        "USDC",
        InfrastructureKind::Token,
    ),
    (
        "0xdac17f958d2ee523a2206206994597c13d831ec7",
        "USDT",
        InfrastructureKind::Token,
    ),
    (
        "0x6b175474e89094c44da98b954eedeac495271d0f",
        "DAI",
        InfrastructureKind::Token,
    ),
    (
        "0x4fabb145d64652a948d72533023f6e7a623c7c53",
        "BUSD",
        InfrastructureKind::Token,
    ),
    (
        "0x853d955acef822db058eb8505911ed77f175b99e",
        "FRAX",
        InfrastructureKind::Token,
    ),
    (
        "0x7a250d5630b4cf539739df2c5dacb4c659f2488d",
        "Uniswap V2 Router",
        InfrastructureKind::Router,
    ),
    (
        "0xe592427a0aece92de3edee1f18e0157c05861564",
        "Uniswap V3 Router",
        InfrastructureKind::Router,
    ),
    (
        "0xd9e1ce17f2641f24ae83637ab66a2cca9c378b9f",
        "SushiSwap Router",
        InfrastructureKind::Router,
    ),
    (
        "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc",
        "Uniswap V2 WETH/USDC",
        InfrastructureKind::Pair,
    ),
    (
        "0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640",
        "Uniswap V3 WETH/USDC 0.05%",
        InfrastructureKind::Pair,
    ),
    (
        "0xba12222222228d8ba445958a75a0704d566bf2c8",
        "Balancer Vault",
        InfrastructureKind::Vault,
    ),
    (
        "0x1111111254fb6c44bac0bed2854e76f90643097d",
        "1inch Router",
        InfrastructureKind::Router,
    ),
    (
        "0xdef1c0ded9bec7f1a1670819833240f027b25eff",
        "0x Exchange Proxy",
        InfrastructureKind::Router,
    ),
];

const DEFAULT_PRIVILEGED: &[&str] = &[
    "mint",
    "burn(address,uint256)",
    "setOwner",
    "changeOwner",
    "transferOwnership",
    "renounceOwnership",
    "setAdmin",
    "upgradeTo*",
    "initialize",
    "pause",
    "unpause",
    "withdrawAll",
    "emergencyWithdraw",
    "sweep",
    "rescue*",
    "setFee*",
    "setTax*",
    "kill",
    "destroy",
];

const DEFAULT_FEE_LIMIT: &[&str] = &[
    "setFee*",
    "setTax*",
    "updateFee*",
    "setSwapFee*",
    "setMaxTx*",
    "setMaxWallet*",
    "excludeFromFee*",
    "setLimits",
    "removeLimits",
];

const DEFAULT_AMM_KEYWORDS: &[&str] = &[
    "swap",
    "exactInput",
    "exactOutput",
    "multicall",
    "batchSwap",
    "exchange",
    "trade",
];

fn default_known_addresses() -> Vec<KnownAddressEntry> {
    DEFAULT_KNOWN
        .iter()
        .map(|(address, label, kind)| KnownAddressEntry::Detailed {
            address: (*address).to_string(),
            label: Some((*label).to_string()),
            kind: *kind,
        })
        .collect()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = AutopsyConfig::default();
        config.validate().unwrap();
        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), DEFAULT_KNOWN.len());
        let vault = parse_address("0xba12222222228d8ba445958a75a0704d566bf2c8").unwrap();
        assert!(registry.is_amm(vault));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = AutopsyConfig {
            large_transfer_ratio: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.large_transfer_ratio = 0.5;
        config.path_ranking.depth_weight = -0.1;
        assert!(config.validate().is_err());
        config.path_ranking.depth_weight = 0.4;
        config.privileged_selectors.push("0x1234".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn known_addresses_accept_both_forms() {
        let config: AutopsyConfig = toml::from_str(
            r#"
            knownAddresses = [
                "0x00000000000000000000000000000000000000aa",
                { address = "0x00000000000000000000000000000000000000bb", label = "pool", kind = "pair" },
            ]
            largeTransferRatio = 0.25
            "#,
        )
        .unwrap();
        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 2);
        let pool = parse_address("0x00000000000000000000000000000000000000bb").unwrap();
        assert_eq!(registry.get(pool).unwrap().label.as_deref(), Some("pool"));
        assert!(registry.is_amm(pool));
        assert_eq!(config.large_transfer_ratio, 0.25);
        assert_eq!(config.reentrancy_path_depth_limit, 8);
    }
}

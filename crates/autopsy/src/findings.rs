//! Static-analysis finding feed.
//!
//! Findings come from external tools (Slither, Mythril, manual review). The
//! reader normalizes the many spellings those tools use for the same issue
//! into one category set.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ethereum_types::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AutopsyError;
use crate::selectors::{bare_name, selector_of};
use crate::types::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FindingCategory {
    Reentrancy,
    IntegerOverflow,
    IntegerUnderflow,
    UncheckedReturn,
    TimestampDependence,
    WeakPrng,
    DelegatecallToUntrusted,
    ArbitraryTransferFrom,
    MissingZeroCheck,
    SelfDestructReachable,
    AccessControl,
    Other,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::Reentrancy => "reentrancy",
            FindingCategory::IntegerOverflow => "integer-overflow",
            FindingCategory::IntegerUnderflow => "integer-underflow",
            FindingCategory::UncheckedReturn => "unchecked-return",
            FindingCategory::TimestampDependence => "timestamp-dependence",
            FindingCategory::WeakPrng => "weak-prng",
            FindingCategory::DelegatecallToUntrusted => "delegatecall-to-untrusted",
            FindingCategory::ArbitraryTransferFrom => "arbitrary-transferFrom",
            FindingCategory::MissingZeroCheck => "missing-zero-check",
            FindingCategory::SelfDestructReachable => "self-destruct-reachable",
            FindingCategory::AccessControl => "access-control",
            FindingCategory::Other => "other",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            FindingCategory::IntegerOverflow | FindingCategory::IntegerUnderflow
        )
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindingCategory {
    type Err = String;

    /// Unrecognized detector names map to `Other`; this never fails.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('_', "-");
        let category = match key.as_str() {
            "reentrancy" | "reentrancy-eth" | "reentrancy-no-eth" | "reentrancy-benign"
            | "reentrancy-events" | "reentrancy-unlimited-gas" | "swc-107" => {
                FindingCategory::Reentrancy
            }
            "integer-overflow" | "overflow" | "integer-overflow-and-underflow" | "swc-101" => {
                FindingCategory::IntegerOverflow
            }
            "integer-underflow" | "underflow" => FindingCategory::IntegerUnderflow,
            "unchecked-return" | "unchecked-lowlevel" | "unchecked-send"
            | "unchecked-transfer" | "unused-return" | "swc-104" => {
                FindingCategory::UncheckedReturn
            }
            "timestamp-dependence" | "timestamp" | "block-timestamp" | "swc-116" => {
                FindingCategory::TimestampDependence
            }
            "weak-prng" | "weak-randomness" | "swc-120" => FindingCategory::WeakPrng,
            "delegatecall-to-untrusted" | "controlled-delegatecall" | "delegatecall-loop"
            | "swc-112" => FindingCategory::DelegatecallToUntrusted,
            "arbitrary-transferfrom" | "arbitrary-send-erc20" | "arbitrary-send-erc20-permit" => {
                FindingCategory::ArbitraryTransferFrom
            }
            "missing-zero-check" => FindingCategory::MissingZeroCheck,
            "self-destruct-reachable" | "suicidal" | "unprotected-selfdestruct" | "swc-106" => {
                FindingCategory::SelfDestructReachable
            }
            "access-control" | "missing-access-control" | "unprotected-upgrade"
            | "arbitrary-send-eth" | "protected-vars" | "tx-origin" | "swc-105" | "swc-115" => {
                FindingCategory::AccessControl
            }
            _ => FindingCategory::Other,
        };
        Ok(category)
    }
}

impl Serialize for FindingCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FindingCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Low,
    Medium,
    High,
}

impl FindingSeverity {
    /// High and medium findings count as role evidence.
    pub fn is_actionable(&self) -> bool {
        matches!(self, FindingSeverity::High | FindingSeverity::Medium)
    }
}

impl FromStr for FindingSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" => Ok(FindingSeverity::High),
            "medium" | "warning" => Ok(FindingSeverity::Medium),
            "low" | "informational" | "info" | "optimization" | "note" => {
                Ok(FindingSeverity::Low)
            }
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for FindingSeverity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which function of the contract a finding refers to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FunctionRef {
    /// Whole-contract advisory.
    #[default]
    Contract,
    Selector(Selector),
    /// Canonical signature, matched by its selector.
    Signature { selector: Selector, text: String },
    /// Bare function name. Matches are low-confidence.
    Name(String),
}

impl FunctionRef {
    pub fn selector(&self) -> Option<Selector> {
        match self {
            FunctionRef::Selector(selector) | FunctionRef::Signature { selector, .. } => {
                Some(*selector)
            }
            FunctionRef::Contract | FunctionRef::Name(_) => None,
        }
    }
}

impl FromStr for FunctionRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(FunctionRef::Contract);
        }
        if s.starts_with("0x") || s.starts_with("0X") {
            return s.parse().map(FunctionRef::Selector);
        }
        if s.contains('(') {
            if !s.ends_with(')') {
                return Err(format!("signature '{s}' is missing a closing parenthesis"));
            }
            let text: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            return Ok(FunctionRef::Signature {
                selector: selector_of(&text),
                text,
            });
        }
        Ok(FunctionRef::Name(bare_name(s).to_string()))
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionRef::Contract => Ok(()),
            FunctionRef::Selector(selector) => write!(f, "{selector}"),
            FunctionRef::Signature { text, .. } => f.write_str(text),
            FunctionRef::Name(name) => f.write_str(name),
        }
    }
}

impl Serialize for FunctionRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FunctionRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One vulnerability report, keyed to a contract and (optionally) a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    #[serde(alias = "contract", alias = "address")]
    pub contract_address: Address,
    #[serde(
        default,
        alias = "function",
        alias = "selector",
        rename = "functionSelectorOrName"
    )]
    pub function: FunctionRef,
    #[serde(alias = "check", alias = "swcId")]
    pub category: FindingCategory,
    #[serde(alias = "impact")]
    pub severity: FindingSeverity,
    #[serde(default, alias = "tool")]
    pub source_tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Finding {
    pub fn is_actionable(&self) -> bool {
        self.severity.is_actionable()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FindingFeed {
    List(Vec<Finding>),
    Wrapped { findings: Vec<Finding> },
}

/// Parse a finding feed: a JSON array, or an object with a `findings` array.
pub fn parse_findings(json: &str) -> Result<Vec<Finding>, AutopsyError> {
    let feed: FindingFeed =
        serde_json::from_str(json).map_err(|e| AutopsyError::Finding(e.to_string()))?;
    Ok(match feed {
        FindingFeed::List(findings) | FindingFeed::Wrapped { findings } => findings,
    })
}

pub fn load_findings(path: &Path) -> Result<Vec<Finding>, AutopsyError> {
    let raw = std::fs::read_to_string(path)?;
    parse_findings(&raw)
        .map_err(|e| AutopsyError::Finding(format!("{}: {e}", path.display())))
}

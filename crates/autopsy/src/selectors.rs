//! Function selector catalog.
//!
//! Computes 4-byte selectors from canonical signatures, names call nodes that
//! arrive without a function name, and matches configurable function sets
//! (privileged mutators, fee/limit setters, AMM entry points) against calls.

use std::sync::LazyLock;

use ethereum_types::H256;
use rustc_hash::FxHashMap;
use sha3::{Digest, Keccak256};

use crate::call_tree::CallNode;
use crate::types::Selector;

/// keccak256("Transfer(address,address,uint256)")
pub static TRANSFER_TOPIC: LazyLock<H256> =
    LazyLock::new(|| H256::from_slice(&keccak256(b"Transfer(address,address,uint256)")));

/// Well-known signatures used to name calls when the trace carries no names.
const KNOWN_SIGNATURES: &[&str] = &[
    "transfer(address,uint256)",
    "transferFrom(address,address,uint256)",
    "approve(address,uint256)",
    "balanceOf(address)",
    "totalSupply()",
    "mint(address,uint256)",
    "mint(uint256)",
    "burn(uint256)",
    "burn(address,uint256)",
    "deposit()",
    "deposit(uint256)",
    "withdraw()",
    "withdraw(uint256)",
    "withdrawAll()",
    "emergencyWithdraw()",
    "sweep(address)",
    "sweep(address,address)",
    "skim(address)",
    "sync()",
    "setFee(uint256)",
    "setFees(uint256,uint256)",
    "setTaxFee(uint256)",
    "setMaxTxAmount(uint256)",
    "setMaxWalletSize(uint256)",
    "excludeFromFee(address)",
    "owner()",
    "renounceOwnership()",
    "transferOwnership(address)",
    "upgradeTo(address)",
    "upgradeToAndCall(address,bytes)",
    "initialize()",
    "selfdestruct()",
    "kill()",
    "flashLoan(address,address[],uint256[],uint256[],address,bytes,uint16)",
    "flashLoan(address,address,uint256,bytes)",
    "swap(uint256,uint256,address,bytes)",
    "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)",
    "swapTokensForExactTokens(uint256,uint256,address[],address,uint256)",
    "swapExactETHForTokens(uint256,address[],address,uint256)",
    "swapExactTokensForETH(uint256,uint256,address[],address,uint256)",
    "swapExactTokensForTokensSupportingFeeOnTransferTokens(uint256,uint256,address[],address,uint256)",
    "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))",
    "exactInput((bytes,address,uint256,uint256,uint256))",
    "getReserves()",
    "multicall(bytes[])",
    "execute(address,bytes)",
];

static KNOWN_BY_SELECTOR: LazyLock<FxHashMap<Selector, &'static str>> = LazyLock::new(|| {
    KNOWN_SIGNATURES
        .iter()
        .map(|sig| (selector_of(sig), *sig))
        .collect()
});

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Selector of a canonical signature such as `withdraw(uint256)`.
pub fn selector_of(signature: &str) -> Selector {
    let hash = keccak256(signature.trim().as_bytes());
    Selector([hash[0], hash[1], hash[2], hash[3]])
}

/// Name of a well-known function, without its argument list.
pub fn known_name(selector: Selector) -> Option<&'static str> {
    KNOWN_BY_SELECTOR
        .get(&selector)
        .map(|sig| sig.split('(').next().unwrap_or(sig))
}

/// Strip an argument list: `withdraw(uint256)` -> `withdraw`.
pub fn bare_name(name: &str) -> &str {
    name.split('(').next().unwrap_or(name).trim()
}

/// One entry of a configurable function set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorPattern {
    /// Exact 4-byte selector, given as hex or derived from a signature.
    Exact { selector: Selector, label: String },
    /// Case-insensitive function name, optionally with a trailing `*` wildcard.
    Name { name: String, prefix: bool },
}

impl SelectorPattern {
    /// Parse `0x12345678`, `withdraw(uint256)`, `setFee` or `upgrade*`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty selector pattern".to_string());
        }
        if raw.starts_with("0x") || raw.starts_with("0X") {
            let selector: Selector = raw.parse()?;
            return Ok(SelectorPattern::Exact {
                selector,
                label: raw.to_lowercase(),
            });
        }
        if raw.contains('(') {
            if !raw.ends_with(')') {
                return Err(format!("signature '{raw}' is missing a closing parenthesis"));
            }
            return Ok(SelectorPattern::Exact {
                selector: selector_of(raw),
                label: raw.to_string(),
            });
        }
        match raw.strip_suffix('*') {
            Some(prefix) if prefix.is_empty() => Err("bare '*' would match everything".into()),
            Some(prefix) => Ok(SelectorPattern::Name {
                name: prefix.to_lowercase(),
                prefix: true,
            }),
            None => Ok(SelectorPattern::Name {
                name: raw.to_lowercase(),
                prefix: false,
            }),
        }
    }

    fn matches(&self, selector: Option<Selector>, name: Option<&str>) -> bool {
        match self {
            SelectorPattern::Exact { selector: want, .. } => selector == Some(*want),
            SelectorPattern::Name { name: want, prefix } => {
                let Some(name) = name else {
                    return false;
                };
                let name = bare_name(name).to_lowercase();
                if *prefix {
                    name.starts_with(want.as_str())
                } else {
                    name == *want
                }
            }
        }
    }

    fn label(&self) -> String {
        match self {
            SelectorPattern::Exact { label, .. } => label.clone(),
            SelectorPattern::Name { name, prefix } if *prefix => format!("{name}*"),
            SelectorPattern::Name { name, .. } => name.clone(),
        }
    }
}

/// A compiled function set.
#[derive(Debug, Clone, Default)]
pub struct SelectorSet {
    patterns: Vec<SelectorPattern>,
}

impl SelectorSet {
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, String> {
        let patterns = entries
            .iter()
            .map(|e| SelectorPattern::parse(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Label of the first pattern matching this call, if any.
    pub fn match_call(&self, call: &CallNode) -> Option<String> {
        self.patterns
            .iter()
            .find(|p| p.matches(call.input_selector, call.function_name.as_deref()))
            .map(SelectorPattern::label)
    }

    pub fn matches_call(&self, call: &CallNode) -> bool {
        self.match_call(call).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_selectors() {
        assert_eq!(selector_of("transfer(address,uint256)").to_string(), "0xa9059cbb");
        assert_eq!(selector_of("withdraw(uint256)").to_string(), "0x2e1a7d4d");
        assert_eq!(selector_of("renounceOwnership()").to_string(), "0x715018a6");
        assert_eq!(selector_of("mint(address,uint256)").to_string(), "0x40c10f19");
    }

    #[test]
    fn transfer_topic_prefix() {
        assert_eq!(&TRANSFER_TOPIC.as_bytes()[..4], &[0xdd, 0xf2, 0x52, 0xad]);
    }

    #[test]
    fn known_names_resolve() {
        assert_eq!(known_name(selector_of("withdraw(uint256)")), Some("withdraw"));
        assert_eq!(known_name(Selector([0xde, 0xad, 0xbe, 0xef])), None);
    }

    #[test]
    fn pattern_forms() {
        assert!(matches!(
            SelectorPattern::parse("upgrade*").unwrap(),
            SelectorPattern::Name { prefix: true, .. }
        ));
        assert!(matches!(
            SelectorPattern::parse("0x40c10f19").unwrap(),
            SelectorPattern::Exact { .. }
        ));
        assert!(matches!(
            SelectorPattern::parse("setFee(uint256)").unwrap(),
            SelectorPattern::Exact { .. }
        ));
        assert!(SelectorPattern::parse("*").is_err());
        assert!(SelectorPattern::parse("setFee(uint256").is_err());
    }

    #[test]
    fn name_patterns_ignore_case_and_arguments() {
        let pattern = SelectorPattern::parse("upgrade*").unwrap();
        assert!(pattern.matches(None, Some("upgradeToAndCall(address,bytes)")));
        assert!(pattern.matches(None, Some("UpgradeTo")));
        assert!(!pattern.matches(None, Some("downgrade")));
        assert!(!pattern.matches(None, None));
    }
}

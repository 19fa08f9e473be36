//! Exploit pattern classifier.
//!
//! Independent rule-based matchers over the call tree, value-flow graph, role
//! assignment and correlated findings. Every matcher that fires contributes
//! hypotheses; competing hypotheses coexist and are ranked by confidence.

mod access_control;
mod arithmetic;
mod confidence;
mod delegatecall;
mod price;
mod reentrancy;
mod rugpull;

use std::fmt;

use ethereum_types::Address;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use crate::call_tree::{CallNode, TransactionTrace};
use crate::config::{AddressRegistry, AutopsyConfig};
use crate::correlator::CorrelationSet;
use crate::error::AutopsyError;
use crate::findings::{Finding, FindingCategory};
use crate::pipeline::AnalysisContext;
use crate::roles::{AddressProfile, Role};
use crate::selectors::{SelectorSet, bare_name};
use crate::types::CallId;
use crate::value_flow::{ValueFlowEdge, ValueFlowGraph};

pub use confidence::HypothesisBuilder;

/// Exploit mechanism. Declaration order breaks confidence ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExploitCategory {
    Reentrancy,
    Arithmetic,
    AccessControl,
    DelegatecallHijack,
    Rugpull,
    PriceManipulation,
}

impl fmt::Display for ExploitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExploitCategory::Reentrancy => "reentrancy",
            ExploitCategory::Arithmetic => "arithmetic",
            ExploitCategory::AccessControl => "access-control",
            ExploitCategory::DelegatecallHijack => "delegatecall-hijack",
            ExploitCategory::Rugpull => "rugpull",
            ExploitCategory::PriceManipulation => "price-manipulation",
        };
        f.write_str(name)
    }
}

/// What a piece of evidence points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EvidenceRef {
    CallNode { id: CallId },
    Finding { index: usize },
    ValueFlowEdge { seq: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evidence {
    #[serde(flatten)]
    pub reference: EvidenceRef,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploitHypothesis {
    pub category: ExploitCategory,
    pub confidence_score: f64,
    pub evidence: Vec<Evidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_victim: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_attacker: Option<Address>,
}

impl ExploitHypothesis {
    pub fn cites_call(&self, id: CallId) -> bool {
        self.evidence
            .iter()
            .any(|e| e.reference == EvidenceRef::CallNode { id })
    }
}

/// Compiled matcher settings.
#[derive(Debug, Clone)]
pub struct PatternSettings {
    pub registry: AddressRegistry,
    pub privileged: SelectorSet,
    pub fee_limit: SelectorSet,
    /// Lowercased.
    pub amm_keywords: Vec<String>,
    pub arithmetic_window: usize,
    pub large_transfer_ratio: f64,
}

impl PatternSettings {
    pub fn from_config(config: &AutopsyConfig) -> Result<Self, AutopsyError> {
        Ok(Self {
            registry: config.registry().map_err(AutopsyError::Config)?,
            privileged: SelectorSet::parse(&config.privileged_selectors)
                .map_err(|e| AutopsyError::Config(format!("privilegedSelectors: {e}")))?,
            fee_limit: SelectorSet::parse(&config.fee_limit_selectors)
                .map_err(|e| AutopsyError::Config(format!("feeLimitSelectors: {e}")))?,
            amm_keywords: config
                .amm_method_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
            arithmetic_window: config.arithmetic_window,
            large_transfer_ratio: config.large_transfer_ratio,
        })
    }

    /// Whether the call's function name contains an AMM keyword.
    pub fn is_swap_named(&self, call: &CallNode) -> bool {
        let Some(name) = call.function_name.as_deref() else {
            return false;
        };
        let name = bare_name(name).to_lowercase();
        self.amm_keywords.iter().any(|k| name.contains(k.as_str()))
    }
}

/// Everything a matcher may look at. Read-only.
pub struct PatternInput<'a> {
    pub trace: &'a TransactionTrace,
    pub graph: &'a ValueFlowGraph,
    pub findings: &'a [Finding],
    pub correlations: &'a CorrelationSet,
    pub profiles: &'a [AddressProfile],
    pub settings: &'a PatternSettings,
    roles: FxHashMap<Address, Role>,
}

impl<'a> PatternInput<'a> {
    pub fn new(
        trace: &'a TransactionTrace,
        graph: &'a ValueFlowGraph,
        findings: &'a [Finding],
        correlations: &'a CorrelationSet,
        profiles: &'a [AddressProfile],
        settings: &'a PatternSettings,
    ) -> Self {
        let roles = profiles.iter().map(|p| (p.address, p.role)).collect();
        Self {
            trace,
            graph,
            findings,
            correlations,
            profiles,
            settings,
            roles,
        }
    }

    pub fn role(&self, address: Address) -> Role {
        self.roles.get(&address).copied().unwrap_or(Role::Unknown)
    }

    pub fn is_attacker_side(&self, address: Address) -> bool {
        self.role(address).is_attacker_side()
    }

    pub fn addresses_with(&self, role: Role) -> impl Iterator<Item = Address> + '_ {
        self.profiles
            .iter()
            .filter(move |p| p.role == role)
            .map(|p| p.address)
    }

    /// Whether the edge pays a Victim's holdings out to an Attacker.
    pub fn is_payout(&self, edge: &ValueFlowEdge) -> bool {
        self.role(edge.source_party()) == Role::Victim && self.role(edge.to) == Role::Attacker
    }

    /// Attacker closest to `victim` in the value-flow graph, else the origin.
    pub fn attacker_for(&self, victim: Address) -> Option<Address> {
        let mut best: Option<(usize, Address)> = None;
        for attacker in self.addresses_with(Role::Attacker) {
            if let Some(hops) = self.graph.shortest_hops(victim, attacker) {
                if best.is_none_or(|(h, _)| hops < h) {
                    best = Some((hops, attacker));
                }
            }
        }
        best.map(|(_, a)| a).or_else(|| {
            (self.role(self.trace.origin) == Role::Attacker).then_some(self.trace.origin)
        })
    }

    /// Correlated findings of one category on a contract: `(finding index, low confidence)`.
    pub fn findings_on(
        &self,
        contract: Address,
        category: impl Fn(FindingCategory) -> bool,
    ) -> Vec<(usize, bool)> {
        self.correlations
            .for_contract(contract)
            .filter(|c| {
                self.findings
                    .get(c.finding)
                    .is_some_and(|f| category(f.category))
            })
            .map(|c| (c.finding, c.low_confidence()))
            .collect()
    }

    pub fn call(&self, id: CallId) -> Option<&'a CallNode> {
        self.trace.call(id)
    }
}

/// Result of one classifier run.
#[derive(Debug, Clone, Default)]
pub struct PatternOutcome {
    pub hypotheses: Vec<ExploitHypothesis>,
    /// The deadline passed before every matcher ran.
    pub interrupted: bool,
}

type Matcher = fn(&PatternInput<'_>) -> Vec<ExploitHypothesis>;

const MATCHERS: &[(ExploitCategory, Matcher)] = &[
    (ExploitCategory::Reentrancy, reentrancy::detect),
    (ExploitCategory::Arithmetic, arithmetic::detect),
    (ExploitCategory::AccessControl, access_control::detect),
    (ExploitCategory::DelegatecallHijack, delegatecall::detect),
    (ExploitCategory::Rugpull, rugpull::detect),
    (ExploitCategory::PriceManipulation, price::detect),
];

/// Stateless pattern classifier.
pub struct PatternClassifier;

impl PatternClassifier {
    /// Run every matcher, stopping early if the deadline passes.
    ///
    /// A deadline hit keeps the hypotheses already produced. Cancellation is an
    /// error.
    pub fn classify(
        input: &PatternInput<'_>,
        ctx: &AnalysisContext,
    ) -> Result<PatternOutcome, AutopsyError> {
        let mut outcome = PatternOutcome::default();
        for (category, matcher) in MATCHERS {
            match ctx.check("patterns") {
                Ok(()) => {}
                Err(AutopsyError::TimeoutExceeded { .. }) => {
                    outcome.interrupted = true;
                    break;
                }
                Err(e) => return Err(e),
            }
            let found = matcher(input);
            debug!(pattern = %category, hypotheses = found.len(), "matcher finished");
            outcome.hypotheses.extend(found);
        }
        rank(&mut outcome.hypotheses);
        Ok(outcome)
    }
}

/// Confidence descending, ties by category order.
pub fn rank(hypotheses: &mut [ExploitHypothesis]) {
    hypotheses.sort_by(|a, b| {
        b.confidence_score
            .total_cmp(&a.confidence_score)
            .then(a.category.cmp(&b.category))
    });
}

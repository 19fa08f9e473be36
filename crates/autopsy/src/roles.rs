//! Address role attribution.
//!
//! Roles come from an ordered decision list. The first rule that matches an
//! address wins, and the profile records which rule that was:
//!
//! 1. allow-listed infrastructure
//! 2. attacker: transaction origin, net gain without being deployed in the
//!    trace, or the final recipient of value drained from a flagged contract
//! 3. helper: deployed by this transaction and moves value
//! 4. victim: flagged contract that lost value, or the contract an attacker
//!    called to trigger a large payout
//! 5. unknown
//!
//! Function names never feed a rule; a contract calling its method
//! `harmlessDeposit` is judged by what its calls did.

use std::collections::BTreeMap;

use ethereum_types::Address;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::debug;

use crate::call_tree::TransactionTrace;
use crate::config::AddressRegistry;
use crate::correlator::CorrelationSet;
use crate::error::AutopsyError;
use crate::findings::Finding;
use crate::types::{Asset, CallId, SignedAmount};
use crate::value_flow::ValueFlowGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Attacker,
    Victim,
    Helper,
    Infrastructure,
    Unknown,
}

impl Role {
    /// Attackers and the contracts they deploy.
    pub fn is_attacker_side(&self) -> bool {
        matches!(self, Role::Attacker | Role::Helper)
    }
}

/// The rule that assigned a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoleRule {
    AllowList,
    Origin,
    PositiveNetDelta,
    FinalRecipient,
    CreatedInTrace,
    FindingWithLoss,
    DrainedTarget,
    Default,
}

impl RoleRule {
    pub fn role(&self) -> Role {
        match self {
            RoleRule::AllowList => Role::Infrastructure,
            RoleRule::Origin | RoleRule::PositiveNetDelta | RoleRule::FinalRecipient => {
                Role::Attacker
            }
            RoleRule::CreatedInTrace => Role::Helper,
            RoleRule::FindingWithLoss | RoleRule::DrainedTarget => Role::Victim,
            RoleRule::Default => Role::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressProfile {
    pub address: Address,
    pub role: Role,
    pub rule: RoleRule,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Mints are charged to the token contract.
    pub net_value_delta_by_asset: BTreeMap<Asset, SignedAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Address>,
    pub created_addresses: Vec<Address>,
    /// Findings tied to this address, in feed order.
    pub correlated_findings: Vec<Finding>,
    pub first_seen_call: CallId,
}

impl AddressProfile {
    pub fn gained(&self) -> bool {
        self.net_value_delta_by_asset
            .values()
            .any(SignedAmount::is_positive)
    }

    pub fn lost(&self) -> bool {
        self.net_value_delta_by_asset
            .values()
            .any(SignedAmount::is_negative)
    }
}

/// Addresses that need a profile: call endpoints, edge endpoints and the
/// origin. The zero address is the mint/burn sentinel and is skipped.
pub fn participants(trace: &TransactionTrace, graph: &ValueFlowGraph) -> IndexSet<Address> {
    let mut out = trace.addresses();
    out.extend(graph.participants());
    out.shift_remove(&Address::zero());
    out
}

/// Findings-independent half of profiling. Every profile starts `Unknown`.
pub fn build_profiles(trace: &TransactionTrace, graph: &ValueFlowGraph) -> Vec<AddressProfile> {
    let mut first_seen: IndexMap<Address, CallId> = IndexMap::new();
    first_seen.insert(trace.origin, CallId(0));
    let mut created: IndexMap<Address, Vec<Address>> = IndexMap::new();
    for call in trace.calls() {
        first_seen.entry(call.from).or_insert(call.id);
        if let Some(to) = call.to {
            first_seen.entry(to).or_insert(call.id);
        }
        if let Some(address) = call.created_address {
            if trace.is_effective(call.id) {
                created.entry(call.from).or_default().push(address);
            }
        }
    }
    for edge in graph.edges() {
        first_seen.entry(edge.from).or_insert(edge.causing_call);
        first_seen.entry(edge.to).or_insert(edge.causing_call);
    }

    participants(trace, graph)
        .into_iter()
        .map(|address| AddressProfile {
            address,
            role: Role::Unknown,
            rule: RoleRule::Default,
            label: None,
            net_value_delta_by_asset: graph.attributed_deltas(address),
            created_by: trace.created_by(address).map(|(creator, _)| creator),
            created_addresses: created.get(&address).cloned().unwrap_or_default(),
            correlated_findings: Vec::new(),
            first_seen_call: first_seen.get(&address).copied().unwrap_or_default(),
        })
        .collect()
}

pub struct RoleClassifier<'a> {
    registry: &'a AddressRegistry,
    large_transfer_ratio: f64,
}

impl<'a> RoleClassifier<'a> {
    pub fn new(registry: &'a AddressRegistry, large_transfer_ratio: f64) -> Self {
        Self {
            registry,
            large_transfer_ratio,
        }
    }

    /// Attach correlations to `profiles` and run the rule list.
    pub fn classify(
        &self,
        trace: &TransactionTrace,
        graph: &ValueFlowGraph,
        findings: &[Finding],
        correlations: &CorrelationSet,
        mut profiles: Vec<AddressProfile>,
    ) -> Result<Vec<AddressProfile>, AutopsyError> {
        for profile in &mut profiles {
            let mut indices: Vec<usize> = correlations
                .for_contract(profile.address)
                .map(|c| c.finding)
                .collect();
            indices.sort_unstable();
            indices.dedup();
            profile.correlated_findings = indices
                .into_iter()
                .filter_map(|i| findings.get(i).cloned())
                .collect();
            profile.label = self
                .registry
                .get(profile.address)
                .and_then(|k| k.label.clone());
        }

        let known = |address: Address| self.registry.contains(address);
        let created: FxHashSet<Address> = profiles
            .iter()
            .filter(|p| p.created_by.is_some())
            .map(|p| p.address)
            .collect();

        // Computed up front: the final-recipient clause starts from these.
        let flagged_losers: IndexSet<Address> = profiles
            .iter()
            .filter(|p| !known(p.address) && p.lost())
            .filter(|p| p.correlated_findings.iter().any(Finding::is_actionable))
            .map(|p| p.address)
            .collect();

        let mut final_recipients: FxHashSet<Address> = FxHashSet::default();
        for &victim in &flagged_losers {
            let accept = |a: Address| {
                a != victim
                    && !a.is_zero()
                    && !known(a)
                    && !created.contains(&a)
                    && !flagged_losers.contains(&a)
            };
            if let Some(path) = graph.longest_path_from(victim, accept) {
                if let Some(last) = path.last() {
                    final_recipients.insert(last.to);
                }
            }
        }

        let mut attackers: FxHashSet<Address> = FxHashSet::default();
        let mut helpers: FxHashSet<Address> = FxHashSet::default();
        for profile in &mut profiles {
            let address = profile.address;
            let rule = if known(address) {
                RoleRule::AllowList
            } else if address == trace.origin {
                RoleRule::Origin
            } else if profile.gained() && profile.created_by.is_none() {
                RoleRule::PositiveNetDelta
            } else if final_recipients.contains(&address) {
                RoleRule::FinalRecipient
            } else if profile.created_by.is_some() && graph.participates(address) {
                RoleRule::CreatedInTrace
            } else if flagged_losers.contains(&address) {
                RoleRule::FindingWithLoss
            } else {
                continue;
            };
            match rule.role() {
                Role::Attacker => {
                    attackers.insert(address);
                }
                Role::Helper => {
                    helpers.insert(address);
                }
                _ => {}
            }
            profile.rule = rule;
            profile.role = rule.role();
        }

        // Drained targets depend on the final attacker and helper sets.
        let attacker_side = |a: Option<Address>| {
            a.is_some_and(|a| attackers.contains(&a) || helpers.contains(&a))
        };
        let mut drained: FxHashSet<Address> = FxHashSet::default();
        for edge in graph.edges() {
            if !attackers.contains(&edge.to) || !graph.is_large(edge, self.large_transfer_ratio) {
                continue;
            }
            let Some(causing) = trace.call(edge.causing_call) else {
                continue;
            };
            let chain = std::iter::once(causing).chain(trace.ancestors(edge.causing_call));
            for call in chain {
                if attacker_side(Some(call.from)) && !attacker_side(call.to) {
                    if let Some(target) = call.to {
                        drained.insert(target);
                    }
                    break;
                }
            }
        }
        for profile in profiles.iter_mut().filter(|p| p.rule == RoleRule::Default) {
            if drained.contains(&profile.address) {
                profile.rule = RoleRule::DrainedTarget;
                profile.role = Role::Victim;
            }
        }

        self.verify(trace, graph, &profiles)?;

        debug!(
            profiles = profiles.len(),
            attackers = attackers.len(),
            helpers = helpers.len(),
            victims = profiles.iter().filter(|p| p.role == Role::Victim).count(),
            "roles assigned"
        );
        Ok(profiles)
    }

    fn verify(
        &self,
        trace: &TransactionTrace,
        graph: &ValueFlowGraph,
        profiles: &[AddressProfile],
    ) -> Result<(), AutopsyError> {
        let violation = |reason: String| AutopsyError::ClassifierInvariantViolation { reason };

        let mut seen: FxHashSet<Address> = FxHashSet::default();
        for profile in profiles {
            if !seen.insert(profile.address) {
                return Err(violation(format!(
                    "{:#x} has more than one profile",
                    profile.address
                )));
            }
            if profile.role != profile.rule.role() {
                return Err(violation(format!(
                    "{:#x} has role {:?} but cites rule {:?}",
                    profile.address, profile.role, profile.rule
                )));
            }
            if profile.role == Role::Attacker && profile.created_by.is_some() {
                return Err(violation(format!(
                    "attacker {:#x} was deployed inside the trace",
                    profile.address
                )));
            }
            if profile.role == Role::Infrastructure && !self.registry.contains(profile.address) {
                return Err(violation(format!(
                    "{:#x} is infrastructure but not allow-listed",
                    profile.address
                )));
            }
        }
        if let Some(missing) = participants(trace, graph)
            .into_iter()
            .find(|a| !seen.contains(a))
        {
            return Err(violation(format!("{missing:#x} has no profile")));
        }
        Ok(())
    }
}


//! Attach findings to the call nodes they describe.

use ethereum_types::Address;
use serde::Serialize;
use tracing::warn;

use crate::call_tree::{CallNode, TransactionTrace};
use crate::findings::{Finding, FunctionRef};
use crate::selectors::bare_name;
use crate::types::CallId;

/// How a finding was tied to its calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    /// Exact 4-byte selector compare.
    Selector,
    /// Whole-contract advisory: every call into the contract.
    Contract,
    /// Function-name compare; low confidence.
    Name,
}

/// A finding together with the call nodes it correlates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    /// Index into the finding feed.
    pub finding: usize,
    pub contract: Address,
    /// Ascending pre-order ids.
    pub calls: Vec<CallId>,
    pub kind: MatchKind,
}

impl Correlation {
    pub fn low_confidence(&self) -> bool {
        self.kind == MatchKind::Name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationSet {
    correlations: Vec<Correlation>,
    uncorrelated: Vec<usize>,
}

impl CorrelationSet {
    /// Correlations in finding order.
    pub fn iter(&self) -> impl Iterator<Item = &Correlation> {
        self.correlations.iter()
    }

    pub fn for_contract(&self, contract: Address) -> impl Iterator<Item = &Correlation> {
        self.correlations
            .iter()
            .filter(move |c| c.contract == contract)
    }

    pub fn for_call(&self, call: CallId) -> impl Iterator<Item = &Correlation> {
        self.correlations
            .iter()
            .filter(move |c| c.calls.binary_search(&call).is_ok())
    }

    /// Indices of findings that matched no call node.
    pub fn uncorrelated(&self) -> &[usize] {
        &self.uncorrelated
    }

    pub fn len(&self) -> usize {
        self.correlations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.correlations.is_empty()
    }
}

pub struct FindingCorrelator<'a> {
    findings: &'a [Finding],
}

impl<'a> FindingCorrelator<'a> {
    pub fn new(findings: &'a [Finding]) -> Self {
        Self { findings }
    }

    /// Correlate every finding against the trace. Pure: the same inputs always
    /// produce the same set.
    pub fn correlate(&self, trace: &TransactionTrace) -> CorrelationSet {
        let mut set = CorrelationSet::default();
        for (index, finding) in self.findings.iter().enumerate() {
            let kind = match finding.function {
                FunctionRef::Contract => MatchKind::Contract,
                FunctionRef::Selector(_) | FunctionRef::Signature { .. } => MatchKind::Selector,
                FunctionRef::Name(_) => MatchKind::Name,
            };
            let calls: Vec<CallId> = trace
                .calls()
                .filter(|call| matches(finding, call))
                .map(|call| call.id)
                .collect();

            if calls.is_empty() {
                warn!(
                    contract = %format!("{:#x}", finding.contract_address),
                    function = %finding.function,
                    category = %finding.category,
                    "finding matched no call in the trace"
                );
                set.uncorrelated.push(index);
                continue;
            }
            set.correlations.push(Correlation {
                finding: index,
                contract: finding.contract_address,
                calls,
                kind,
            });
        }
        set
    }
}

fn matches(finding: &Finding, call: &CallNode) -> bool {
    if call.to != Some(finding.contract_address) {
        return false;
    }
    match &finding.function {
        FunctionRef::Contract => true,
        FunctionRef::Selector(selector) | FunctionRef::Signature { selector, .. } => {
            call.input_selector == Some(*selector)
        }
        FunctionRef::Name(name) => call
            .function_name
            .as_deref()
            .is_some_and(|called| bare_name(called) == name),
    }
}

//! Structured analysis result.

use ethereum_types::{Address, H256};
use serde::Serialize;

use crate::call_tree::TransactionTrace;
use crate::findings::Finding;
use crate::paths::SuspiciousPath;
use crate::patterns::{EvidenceRef, ExploitHypothesis};
use crate::roles::{AddressProfile, Role};
use crate::value_flow::{DiscardedEdge, ValueFlowEdge, ValueFlowGraph};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AnalysisStatus {
    Complete,
    /// Stopped at a deadline; the result holds what earlier stages produced.
    Incomplete { stage: String },
}

/// Complete analysis of a single transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub tx_hash: H256,
    pub block_number: u64,
    pub origin: Address,
    pub status: AnalysisStatus,
    pub summary: String,
    pub address_profiles: Vec<AddressProfile>,
    pub value_flow_edges: Vec<ValueFlowEdge>,
    pub discarded_edges: Vec<DiscardedEdge>,
    pub exploit_hypotheses: Vec<ExploitHypothesis>,
    /// The finding feed in input order; `finding` evidence indexes into it.
    pub findings: Vec<Finding>,
    pub uncorrelated_findings: Vec<Finding>,
    pub suspicious_call_paths: Vec<SuspiciousPath>,
}

impl AnalysisResult {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        trace: &TransactionTrace,
        status: AnalysisStatus,
        address_profiles: Vec<AddressProfile>,
        graph: &ValueFlowGraph,
        exploit_hypotheses: Vec<ExploitHypothesis>,
        findings: Vec<Finding>,
        uncorrelated_findings: Vec<Finding>,
        suspicious_call_paths: Vec<SuspiciousPath>,
    ) -> Self {
        let summary = Self::generate_summary(&address_profiles, &exploit_hypotheses, graph);
        Self {
            tx_hash: trace.hash,
            block_number: trace.block_number,
            origin: trace.origin,
            status,
            summary,
            address_profiles,
            value_flow_edges: graph.edges().to_vec(),
            discarded_edges: graph.discarded().to_vec(),
            exploit_hypotheses,
            findings,
            uncorrelated_findings,
            suspicious_call_paths,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn is_complete(&self) -> bool {
        self.status == AnalysisStatus::Complete
    }

    pub fn profile(&self, address: Address) -> Option<&AddressProfile> {
        self.address_profiles.iter().find(|p| p.address == address)
    }

    pub fn role_of(&self, address: Address) -> Option<Role> {
        self.profile(address).map(|p| p.role)
    }

    pub fn top_hypothesis(&self) -> Option<&ExploitHypothesis> {
        self.exploit_hypotheses.first()
    }

    /// Findings cited by a hypothesis, in evidence order.
    pub fn cited_findings<'a>(
        &'a self,
        hypothesis: &'a ExploitHypothesis,
    ) -> impl Iterator<Item = &'a Finding> + 'a {
        hypothesis.evidence.iter().filter_map(|e| match e.reference {
            EvidenceRef::Finding { index } => self.findings.get(index),
            _ => None,
        })
    }

    fn generate_summary(
        profiles: &[AddressProfile],
        hypotheses: &[ExploitHypothesis],
        graph: &ValueFlowGraph,
    ) -> String {
        let count = |role: Role| profiles.iter().filter(|p| p.role == role).count();
        let mut summary = format!(
            "{} attacker(s), {} victim(s), {} helper(s); {} value transfer(s)",
            count(Role::Attacker),
            count(Role::Victim),
            count(Role::Helper),
            graph.edges().len()
        );
        match hypotheses.first() {
            Some(top) => summary.push_str(&format!(
                "; most likely {} ({:.2})",
                top.category, top.confidence_score
            )),
            None => summary.push_str("; no exploit pattern matched"),
        }
        summary
    }
}

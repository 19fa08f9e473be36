//! Deterministic confidence scoring.
//!
//! `base(category) + min(0.30, 0.15 * exact findings + 0.075 * low-confidence
//! findings) + 0.35 / hops(victim -> attacker) + boosts`, clamped to `[0, 1]`.

use ethereum_types::Address;

use super::{Evidence, EvidenceRef, ExploitCategory, ExploitHypothesis, PatternInput};
use crate::types::CallId;

const FINDING_WEIGHT: f64 = 0.15;
const LOW_CONFIDENCE_FINDING_WEIGHT: f64 = 0.075;
const FINDING_CAP: f64 = 0.30;
const HOP_WEIGHT: f64 = 0.35;

fn base(category: ExploitCategory) -> f64 {
    match category {
        ExploitCategory::Reentrancy => 0.35,
        ExploitCategory::Arithmetic
        | ExploitCategory::AccessControl
        | ExploitCategory::DelegatecallHijack
        | ExploitCategory::Rugpull => 0.30,
        ExploitCategory::PriceManipulation => 0.25,
    }
}

/// Collects evidence for one hypothesis and scores it on `finish`.
pub struct HypothesisBuilder {
    category: ExploitCategory,
    evidence: Vec<Evidence>,
    victim: Option<Address>,
    attacker: Option<Address>,
    exact_findings: usize,
    low_confidence_findings: usize,
    boost: f64,
}

impl HypothesisBuilder {
    pub fn new(category: ExploitCategory) -> Self {
        Self {
            category,
            evidence: Vec::new(),
            victim: None,
            attacker: None,
            exact_findings: 0,
            low_confidence_findings: 0,
            boost: 0.0,
        }
    }

    pub fn victim(mut self, victim: Option<Address>) -> Self {
        self.victim = victim;
        self
    }

    pub fn attacker(mut self, attacker: Option<Address>) -> Self {
        self.attacker = attacker;
        self
    }

    fn cite(&mut self, reference: EvidenceRef, rationale: impl Into<String>) {
        if self.evidence.iter().any(|e| e.reference == reference) {
            return;
        }
        self.evidence.push(Evidence {
            reference,
            rationale: rationale.into(),
        });
    }

    pub fn call(mut self, id: CallId, rationale: impl Into<String>) -> Self {
        self.cite(EvidenceRef::CallNode { id }, rationale);
        self
    }

    pub fn edge(mut self, seq: usize, rationale: impl Into<String>) -> Self {
        self.cite(EvidenceRef::ValueFlowEdge { seq }, rationale);
        self
    }

    /// Cite a correlated finding. Each finding is counted once.
    pub fn finding(
        mut self,
        index: usize,
        low_confidence: bool,
        rationale: impl Into<String>,
    ) -> Self {
        let reference = EvidenceRef::Finding { index };
        if self.evidence.iter().any(|e| e.reference == reference) {
            return self;
        }
        self.cite(reference, rationale);
        if low_confidence {
            self.low_confidence_findings += 1;
        } else {
            self.exact_findings += 1;
        }
        self
    }

    pub fn boost(mut self, amount: f64) -> Self {
        self.boost += amount;
        self
    }

    pub fn finish(self, input: &PatternInput<'_>) -> ExploitHypothesis {
        let findings = (FINDING_WEIGHT * self.exact_findings as f64
            + LOW_CONFIDENCE_FINDING_WEIGHT * self.low_confidence_findings as f64)
            .min(FINDING_CAP);
        let hops = match (self.victim, self.attacker) {
            (Some(victim), Some(attacker)) => input
                .graph
                .shortest_hops(victim, attacker)
                .map_or(0.0, |h| HOP_WEIGHT / h as f64),
            _ => 0.0,
        };
        let score = (base(self.category) + findings + hops + self.boost).clamp(0.0, 1.0);
        ExploitHypothesis {
            category: self.category,
            confidence_score: score,
            evidence: self.evidence,
            primary_victim: self.victim,
            primary_attacker: self.attacker,
        }
    }
}

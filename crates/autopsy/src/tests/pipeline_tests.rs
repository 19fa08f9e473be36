//! End-to-end analysis, deadlines and cancellation.

use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::helpers::*;
use crate::config::AutopsyConfig;
use crate::error::AutopsyError;
use crate::patterns::ExploitCategory;
use crate::pipeline::{AnalysisContext, Analyzer};
use crate::report::AnalysisStatus;
use crate::roles::Role;

// ─── Reference transactions ─────────────────────────────────────────────

#[test]
fn owner_mint_is_attributed_and_classified() {
    let (envelope, findings) = owner_mint();
    let result = analyzer()
        .analyze_json(&envelope.to_string(), &findings, &live_ctx())
        .unwrap();

    assert!(result.is_complete());
    assert_eq!(result.role_of(addr(EOA)), Some(Role::Attacker));
    assert_eq!(result.role_of(addr(VICTIM)), Some(Role::Victim));

    let categories: Vec<ExploitCategory> = result
        .exploit_hypotheses
        .iter()
        .map(|h| h.category)
        .collect();
    assert!(categories.contains(&ExploitCategory::Rugpull));
    assert!(categories.contains(&ExploitCategory::AccessControl));
    assert!(
        result
            .exploit_hypotheses
            .iter()
            .all(|h| h.confidence_score > 0.0)
    );
    assert_eq!(
        result.top_hypothesis().map(|h| h.category),
        Some(ExploitCategory::AccessControl)
    );
}

#[test]
fn result_serializes_with_camel_case_keys() {
    let (envelope, findings) = owner_mint();
    let rendered = analyze(envelope, &findings).to_json().unwrap();
    let json: Value = serde_json::from_str(&rendered).unwrap();

    assert_eq!(json["txHash"], TX_HASH);
    assert_eq!(json["status"]["state"], "complete");
    assert_eq!(json["valueFlowEdges"][0]["asset"], hex_addr(addr(VICTIM)));
    assert_eq!(json["valueFlowEdges"][0]["amount"], "0xf4240");

    let profiles = json["addressProfiles"].as_array().unwrap();
    let victim = profiles
        .iter()
        .find(|p| p["address"] == hex_addr(addr(VICTIM)))
        .unwrap();
    assert_eq!(victim["role"], "victim");
    assert_eq!(victim["rule"], "finding-with-loss");
    assert_eq!(
        victim["netValueDeltaByAsset"][hex_addr(addr(VICTIM))],
        "-1000000"
    );

    let top = &json["exploitHypotheses"][0];
    assert_eq!(top["category"], "access-control");
    assert!(top["evidence"][0]["kind"].is_string());
}

#[test]
fn analysis_is_deterministic() {
    let (envelope, findings) = reentrant_withdraw();
    let first = analyze(envelope.clone(), &findings).to_json().unwrap();
    let second = analyze(envelope, &findings).to_json().unwrap();
    assert_eq!(first, second);
}

#[test]
fn summary_names_the_top_hypothesis() {
    let (envelope, findings) = reentrant_withdraw();
    let result = analyze(envelope, &findings);
    assert!(result.summary.starts_with("2 attacker(s), 1 victim(s), 0 helper(s)"));
    assert!(result.summary.contains("most likely reentrancy (0.95)"));

    let quiet = analyze(create2_relay(), &[]);
    assert!(quiet.summary.ends_with("no exploit pattern matched"));
}

// ─── Deadlines ──────────────────────────────────────────────────────────

#[test]
fn deadline_before_roles_returns_an_empty_partial_result() {
    let (envelope, findings) = reentrant_withdraw();
    let trace = build(envelope);
    let result = analyzer()
        .analyze_trace(&trace, &findings, &expired_ctx())
        .unwrap();

    assert_eq!(
        result.status,
        AnalysisStatus::Incomplete {
            stage: "value-flow".to_string()
        }
    );
    assert_eq!(result.tx_hash, trace.hash);
    assert!(result.address_profiles.is_empty());
    assert!(result.value_flow_edges.is_empty());
    assert!(result.exploit_hypotheses.is_empty());
    assert_eq!(result.findings, findings);

    let json: Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(json["status"]["state"], "incomplete");
    assert_eq!(json["status"]["stage"], "value-flow");
}

#[test]
fn deadline_during_patterns_returns_a_partial_result() {
    let (envelope, findings) = reentrant_withdraw();
    let trace = build(envelope);
    let analyzer = analyzer();
    let attributed = analyzer.attribute(&trace, &findings, &live_ctx()).unwrap();
    let result = analyzer
        .classify(&trace, &findings, attributed, &expired_ctx())
        .unwrap();

    assert_eq!(
        result.status,
        AnalysisStatus::Incomplete {
            stage: "patterns".to_string()
        }
    );
    assert!(!result.is_complete());
    assert!(result.exploit_hypotheses.is_empty());
    assert_eq!(result.role_of(addr(VICTIM)), Some(Role::Victim));
    assert_eq!(result.value_flow_edges.len(), 3);
}

#[test]
fn cancellation_is_reported_as_such() {
    let (envelope, findings) = reentrant_withdraw();
    let trace = build(envelope);
    let token = CancellationToken::new();
    token.cancel();
    let ctx = AnalysisContext::with_deadline(
        Instant::now() + std::time::Duration::from_secs(60),
        token,
    );
    let err = analyzer()
        .analyze_trace(&trace, &findings, &ctx)
        .unwrap_err();
    assert!(matches!(err, AutopsyError::Cancelled { .. }));
    assert!(err.is_per_trace());
}

// ─── Findings in the result ─────────────────────────────────────────────

#[test]
fn evidence_and_profiles_carry_the_findings_themselves() {
    let (envelope, findings) = reentrant_withdraw();
    let result = analyze(envelope, &findings);

    assert_eq!(result.findings, findings);
    let top = result.top_hypothesis().unwrap();
    let cited: Vec<_> = result.cited_findings(top).collect();
    assert_eq!(cited, vec![&findings[0]]);

    let json: Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    let vault = json["addressProfiles"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["address"] == hex_addr(addr(VICTIM)))
        .unwrap();
    let correlated = &vault["correlatedFindings"][0];
    assert_eq!(correlated["contractAddress"], hex_addr(addr(VICTIM)));
    assert_eq!(json["findings"][0], *correlated);
}

// ─── Deep traces ────────────────────────────────────────────────────────

/// A chain of `depth` nested CALL frames, written out as text.
fn nested_chain_json(depth: usize) -> String {
    let a = hex_addr(addr(EOA));
    let b = hex_addr(addr(VICTIM));
    let open = format!(r#"{{"type":"CALL","from":"{a}","to":"{b}","value":"0x0","input":"0x","calls":["#);
    let leaf = format!(r#"{{"type":"CALL","from":"{b}","to":"{a}","value":"0x1","input":"0x"}}"#);
    format!(
        r#"{{"hash":"{TX_HASH}","blockNumber":"0x1","trace":{}{}{}}}"#,
        open.repeat(depth),
        leaf,
        "]}".repeat(depth)
    )
}

#[test]
fn deeply_nested_frames_parse() {
    let json = nested_chain_json(120);
    let result = analyzer()
        .analyze_json(&json, &[], &live_ctx())
        .unwrap();
    assert!(result.is_complete());
    assert_eq!(result.value_flow_edges.len(), 1);
    assert_eq!(result.value_flow_edges[0].causing_call.0, 120);
}

#[test]
fn nesting_beyond_max_call_depth_is_malformed() {
    let config = AutopsyConfig {
        max_call_depth: 50,
        ..Default::default()
    };
    let analyzer = Analyzer::new(config).unwrap();
    let err = analyzer
        .analyze_json(&nested_chain_json(60), &[], &live_ctx())
        .unwrap_err();
    let AutopsyError::MalformedTrace { reason } = err else {
        panic!("expected a malformed trace, got {err:?}");
    };
    assert!(reason.contains("exceeds limit 50"));
}

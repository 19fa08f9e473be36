//! Exploit pattern matchers, one synthetic transaction each.

use serde_json::json;

use super::helpers::*;
use crate::config::AutopsyConfig;
use crate::patterns::{Evidence, EvidenceRef, ExploitCategory, ExploitHypothesis, rank};
use crate::pipeline::Analyzer;
use crate::report::AnalysisResult;
use crate::roles::{Role, RoleRule};
use crate::types::CallId;

fn hypothesis(result: &AnalysisResult, category: ExploitCategory) -> &ExploitHypothesis {
    result
        .exploit_hypotheses
        .iter()
        .find(|h| h.category == category)
        .unwrap_or_else(|| panic!("no {category} hypothesis in {:?}", result.exploit_hypotheses))
}

fn has(result: &AnalysisResult, category: ExploitCategory) -> bool {
    result.exploit_hypotheses.iter().any(|h| h.category == category)
}

fn approx(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// ─── Reentrancy ─────────────────────────────────────────────────────────

#[test]
fn reentrancy_cites_both_entries_and_the_callback() {
    let (envelope, findings) = reentrant_withdraw();
    let result = analyze(envelope, &findings);

    let top = result.top_hypothesis().unwrap();
    assert_eq!(top.category, ExploitCategory::Reentrancy);
    assert_eq!(top.primary_victim, Some(addr(VICTIM)));
    assert_eq!(top.primary_attacker, Some(addr(ATTACK_CONTRACT)));
    assert!(top.cites_call(CallId(2)));
    assert!(top.cites_call(CallId(4)));
    assert!(top.cites_call(CallId(3)));
    assert!(
        top.evidence
            .iter()
            .any(|e| e.reference == EvidenceRef::Finding { index: 0 })
    );
    for seq in [1, 2] {
        assert!(
            top.evidence
                .iter()
                .any(|e| e.reference == EvidenceRef::ValueFlowEdge { seq })
        );
    }
    // base + one exact finding + one hop + callback
    approx(top.confidence_score, 0.35 + 0.15 + 0.35 + 0.10);
}

#[test]
fn reentrancy_fires_without_a_finding() {
    let (envelope, _) = reentrant_withdraw();
    let result = analyze(envelope, &[]);

    let h = hypothesis(&result, ExploitCategory::Reentrancy);
    assert_eq!(h.primary_victim, Some(addr(VICTIM)));
    assert!(h.cites_call(CallId(2)));
    assert!(h.cites_call(CallId(4)));
    assert!(
        !h.evidence
            .iter()
            .any(|e| matches!(e.reference, EvidenceRef::Finding { .. }))
    );
    // base + one hop + callback
    approx(h.confidence_score, 0.35 + 0.35 + 0.10);
}

#[test]
fn reentrancy_is_reported_once_per_function() {
    let (envelope, findings) = reentrant_withdraw();
    let result = analyze(envelope, &findings);
    let count = result
        .exploit_hypotheses
        .iter()
        .filter(|h| h.category == ExploitCategory::Reentrancy)
        .count();
    assert_eq!(count, 1);
}

#[test]
fn static_reentry_is_not_reentrancy() {
    let eoa = addr(EOA);
    let attack = addr(ATTACK_CONTRACT);
    let vault = addr(VICTIM);
    let withdraw = calldata("withdraw(uint256)", &[Arg::Amount(1)]);
    let hook = with_calls(
        call(vault, attack, 1, "0x"),
        vec![frame("STATICCALL", attack, vault, 0, &withdraw)],
    );
    let root = with_calls(
        call(eoa, attack, 0, "0x"),
        vec![with_calls(call(attack, vault, 0, &withdraw), vec![hook])],
    );
    let result = analyze(envelope(root), &[]);
    assert!(!has(&result, ExploitCategory::Reentrancy));
}

// ─── Arithmetic ─────────────────────────────────────────────────────────

fn overflow_withdraw() -> (serde_json::Value, Vec<crate::findings::Finding>) {
    let eoa = addr(EOA);
    let attack = addr(ATTACK_CONTRACT);
    let vault = addr(VICTIM);
    let root = with_calls(
        call(eoa, attack, 0, "0x"),
        vec![with_calls(
            call(
                attack,
                vault,
                0,
                &calldata("withdraw(uint256)", &[Arg::Amount(1_000)]),
            ),
            vec![call(vault, attack, 1_000, "0x")],
        )],
    );
    let findings = vec![finding(vault, "withdraw(uint256)", "SWC-101", "High")];
    (envelope(root), findings)
}

#[test]
fn flagged_overflow_followed_by_payout() {
    let (envelope, findings) = overflow_withdraw();
    let result = analyze(envelope, &findings);

    let h = hypothesis(&result, ExploitCategory::Arithmetic);
    assert_eq!(h.primary_victim, Some(addr(VICTIM)));
    assert_eq!(h.primary_attacker, Some(addr(ATTACK_CONTRACT)));
    assert!(h.cites_call(CallId(1)));
    approx(h.confidence_score, 0.30 + 0.15 + 0.35 + 0.10);
}

#[test]
fn payout_outside_the_window_is_ignored() {
    let (envelope, findings) = overflow_withdraw();
    let config = AutopsyConfig {
        arithmetic_window: 0,
        ..Default::default()
    };
    let trace = build(envelope);
    let result = Analyzer::new(config)
        .unwrap()
        .analyze_trace(&trace, &findings, &live_ctx())
        .unwrap();
    assert!(!has(&result, ExploitCategory::Arithmetic));
}

// ─── Access control ─────────────────────────────────────────────────────

#[test]
fn privileged_calls_by_a_stranger() {
    let eoa = addr(EOA);
    let attack = addr(ATTACK_CONTRACT);
    let vault = addr(VICTIM);
    let root = with_calls(
        call(eoa, attack, 0, "0x"),
        vec![
            call(
                attack,
                vault,
                0,
                &calldata("transferOwnership(address)", &[Arg::Address(attack)]),
            ),
            call(
                attack,
                vault,
                0,
                &calldata("setFee(uint256)", &[Arg::Amount(0)]),
            ),
            with_calls(
                call(attack, vault, 0, &calldata("emergencyWithdraw()", &[])),
                vec![call(vault, attack, 500, "0x")],
            ),
        ],
    );
    let mut env = envelope(root);
    env["ownership"] = json!([{
        "contract": hex_addr(vault),
        "owner": hex_addr(addr(BYSTANDER)),
        "relation": "admin",
    }]);
    let result = analyze(env, &[]);

    assert_eq!(result.role_of(vault), Some(Role::Victim));
    let h = hypothesis(&result, ExploitCategory::AccessControl);
    assert_eq!(h.primary_victim, Some(vault));
    assert_eq!(h.primary_attacker, Some(attack));
    for id in [1, 2, 3] {
        assert!(h.cites_call(CallId(id)), "call #{id} not cited");
    }
    // base + one hop + not owner + fee mutator before the payout
    approx(h.confidence_score, 0.30 + 0.35 + 0.10 + 0.10);
}

// ─── Delegatecall hijack ────────────────────────────────────────────────

#[test]
fn delegatecall_into_caller_supplied_code() {
    let eoa = addr(EOA);
    let attack = addr(ATTACK_CONTRACT);
    let proxy = addr(VICTIM);
    let hijack = with_calls(
        frame("DELEGATECALL", proxy, attack, 0, &calldata("pwn()", &[])),
        vec![call(proxy, attack, 10, "0x")],
    );
    let root = with_calls(
        call(eoa, attack, 0, "0x"),
        vec![with_calls(
            call(
                attack,
                proxy,
                0,
                &calldata("execute(address,bytes)", &[Arg::Address(attack)]),
            ),
            vec![hijack],
        )],
    );
    let findings = vec![finding(proxy, "", "controlled-delegatecall", "High")];
    let result = analyze(envelope(root), &findings);

    assert_eq!(result.role_of(proxy), Some(Role::Victim));
    let top = result.top_hypothesis().unwrap();
    assert_eq!(top.category, ExploitCategory::DelegatecallHijack);
    assert_eq!(top.primary_victim, Some(proxy));
    assert_eq!(top.primary_attacker, Some(attack));
    assert!(top.cites_call(CallId(1)));
    assert!(top.cites_call(CallId(2)));
    // base + one exact finding + one hop + drain
    approx(top.confidence_score, 0.30 + 0.15 + 0.35 + 0.10);
}

#[test]
fn proxy_delegating_to_its_fixed_implementation_is_not_a_hijack() {
    let eoa = addr(EOA);
    let proxy = addr(VICTIM);
    let implementation = addr(BYSTANDER);
    let deposit = calldata("deposit()", &[]);
    let forwarded = with_calls(
        call(eoa, proxy, 0, &deposit),
        vec![frame("DELEGATECALL", proxy, implementation, 0, &deposit)],
    );
    let result = analyze(envelope(forwarded), &[]);
    assert!(!has(&result, ExploitCategory::DelegatecallHijack));

    // Naming the implementation in call data does not make it attacker code.
    let routed = with_calls(
        call(
            eoa,
            proxy,
            0,
            &calldata(
                "execute(address,bytes)",
                &[Arg::Address(implementation)],
            ),
        ),
        vec![frame(
            "DELEGATECALL",
            proxy,
            implementation,
            0,
            &calldata("pwn()", &[]),
        )],
    );
    let findings = vec![finding(proxy, "", "controlled-delegatecall", "High")];
    let result = analyze(envelope(routed), &findings);
    assert_eq!(result.role_of(implementation), Some(Role::Unknown));
    assert!(!has(&result, ExploitCategory::DelegatecallHijack));
}

// ─── Rugpull ────────────────────────────────────────────────────────────

#[test]
fn owner_self_destructs_the_contract() {
    let owner = addr(EOA);
    let vault = addr(VICTIM);
    let root = with_calls(
        call(owner, vault, 0, &calldata("kill()", &[])),
        vec![frame("SELFDESTRUCT", vault, owner, 1_000, "0x")],
    );
    let mut env = envelope(root);
    env["ownership"] = json!([{
        "contract": hex_addr(vault),
        "owner": hex_addr(owner),
    }]);
    let result = analyze(env, &[]);

    let vault_profile = result.profile(vault).unwrap();
    assert_eq!(vault_profile.rule, RoleRule::DrainedTarget);

    let categories: Vec<ExploitCategory> = result
        .exploit_hypotheses
        .iter()
        .map(|h| h.category)
        .collect();
    assert_eq!(
        categories,
        vec![ExploitCategory::Rugpull, ExploitCategory::AccessControl]
    );
    let rugpull = &result.exploit_hypotheses[0];
    assert!(rugpull.cites_call(CallId(1)));
    approx(rugpull.confidence_score, 0.30 + 0.35 + 0.15);
    approx(result.exploit_hypotheses[1].confidence_score, 0.30 + 0.35);
}

// ─── Price manipulation ─────────────────────────────────────────────────

#[test]
fn swap_round_trip_before_the_payout() {
    let eoa = addr(EOA);
    let attack = addr(ATTACK_CONTRACT);
    let lender = addr(VICTIM);
    let pool = known(UNIV2_PAIR);
    let weth = known(WETH);
    let other_token = addr(0xd1);

    let swap = with_logs(
        call(
            attack,
            pool,
            0,
            &calldata(
                "swap(uint256,uint256,address,bytes)",
                &[Arg::Amount(0), Arg::Amount(50), Arg::Address(attack)],
            ),
        ),
        vec![
            transfer_log(weth, attack, pool, 100),
            transfer_log(other_token, pool, attack, 50),
        ],
    );
    let borrow = with_calls(
        call(attack, lender, 0, &calldata("borrow()", &[])),
        vec![
            frame("STATICCALL", lender, pool, 0, &calldata("getReserves()", &[])),
            call(lender, attack, 1_000, "0x"),
        ],
    );
    let root = with_calls(call(eoa, attack, 0, "0x"), vec![swap, borrow]);
    let result = analyze(envelope(root), &[]);

    assert_eq!(result.role_of(pool), Some(Role::Infrastructure));
    assert_eq!(result.role_of(lender), Some(Role::Victim));
    let top = result.top_hypothesis().unwrap();
    assert_eq!(top.category, ExploitCategory::PriceManipulation);
    assert_eq!(top.primary_victim, Some(lender));
    assert_eq!(top.primary_attacker, Some(attack));
    assert!(top.cites_call(CallId(1)));
    assert!(top.cites_call(CallId(3)));
    let swap_evidence = top
        .evidence
        .iter()
        .find(|e| e.reference == EvidenceRef::CallNode { id: CallId(1) })
        .unwrap();
    assert!(swap_evidence.rationale.contains("Uniswap V2 WETH/USDC"));
    // base + one hop + oracle read
    approx(top.confidence_score, 0.25 + 0.35 + 0.15);
}

#[test]
fn no_swaps_no_price_manipulation() {
    let (envelope, findings) = reentrant_withdraw();
    let result = analyze(envelope, &findings);
    assert!(!has(&result, ExploitCategory::PriceManipulation));
}

// ─── Ranking ────────────────────────────────────────────────────────────

fn bare(category: ExploitCategory, confidence_score: f64) -> ExploitHypothesis {
    ExploitHypothesis {
        category,
        confidence_score,
        evidence: vec![Evidence {
            reference: EvidenceRef::CallNode { id: CallId(0) },
            rationale: String::new(),
        }],
        primary_victim: None,
        primary_attacker: None,
    }
}

#[test]
fn ranking_breaks_ties_by_category_order() {
    let mut hypotheses = vec![
        bare(ExploitCategory::PriceManipulation, 0.5),
        bare(ExploitCategory::Rugpull, 0.9),
        bare(ExploitCategory::Reentrancy, 0.5),
        bare(ExploitCategory::AccessControl, 0.5),
    ];
    rank(&mut hypotheses);
    let order: Vec<ExploitCategory> = hypotheses.iter().map(|h| h.category).collect();
    assert_eq!(
        order,
        vec![
            ExploitCategory::Rugpull,
            ExploitCategory::Reentrancy,
            ExploitCategory::AccessControl,
            ExploitCategory::PriceManipulation,
        ]
    );
}

#[test]
fn every_hypothesis_is_grounded_and_bounded() {
    let cases = [reentrant_withdraw(), owner_mint(), overflow_withdraw()];
    for (envelope, findings) in cases {
        let calls = build(envelope.clone()).call_count();
        let result = analyze(envelope, &findings);
        for h in &result.exploit_hypotheses {
            assert!(!h.evidence.is_empty());
            assert!((0.0..=1.0).contains(&h.confidence_score));
            for evidence in &h.evidence {
                match evidence.reference {
                    EvidenceRef::CallNode { id } => assert!(id.0 < calls),
                    EvidenceRef::Finding { index } => assert!(index < findings.len()),
                    EvidenceRef::ValueFlowEdge { seq } => {
                        assert!(seq < result.value_flow_edges.len())
                    }
                }
            }
        }
    }
}

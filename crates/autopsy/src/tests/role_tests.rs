//! Role attribution over the reference transactions.

use super::helpers::*;
use crate::roles::{Role, RoleRule, participants};
use crate::value_flow::{PathLimits, ValueFlowGraph};

#[test]
fn reentrancy_roles() {
    let (envelope, findings) = reentrant_withdraw();
    let result = analyze(envelope, &findings);

    let eoa = result.profile(addr(EOA)).unwrap();
    assert_eq!((eoa.role, eoa.rule), (Role::Attacker, RoleRule::Origin));

    let contract = result.profile(addr(ATTACK_CONTRACT)).unwrap();
    assert_eq!(
        (contract.role, contract.rule),
        (Role::Attacker, RoleRule::PositiveNetDelta)
    );
    assert!(contract.gained());

    let vault = result.profile(addr(VICTIM)).unwrap();
    assert_eq!(
        (vault.role, vault.rule),
        (Role::Victim, RoleRule::FindingWithLoss)
    );
    assert_eq!(vault.correlated_findings, findings);
    assert!(vault.lost());
}

#[test]
fn drained_contract_is_a_victim_without_findings() {
    let (envelope, _) = reentrant_withdraw();
    let result = analyze(envelope, &[]);

    let vault = result.profile(addr(VICTIM)).unwrap();
    assert_eq!(
        (vault.role, vault.rule),
        (Role::Victim, RoleRule::DrainedTarget)
    );
}

#[test]
fn create2_helper_is_not_an_attacker() {
    let result = analyze(create2_relay(), &[]);

    let helper = result.profile(addr(HELPER)).unwrap();
    assert_eq!(
        (helper.role, helper.rule),
        (Role::Helper, RoleRule::CreatedInTrace)
    );
    assert_eq!(helper.created_by, Some(addr(ATTACK_CONTRACT)));

    let contract = result.profile(addr(ATTACK_CONTRACT)).unwrap();
    assert_eq!(contract.role, Role::Attacker);
    assert_eq!(contract.created_addresses, vec![addr(HELPER)]);

    let weth = result.profile(known(WETH)).unwrap();
    assert_eq!(
        (weth.role, weth.rule),
        (Role::Infrastructure, RoleRule::AllowList)
    );
    assert!(weth.label.is_some());
    assert!(result.exploit_hypotheses.is_empty());
}

#[test]
fn mint_recipient_and_token() {
    let (envelope, findings) = owner_mint();
    let result = analyze(envelope, &findings);

    assert_eq!(result.role_of(addr(EOA)), Some(Role::Attacker));
    assert_eq!(result.role_of(addr(VICTIM)), Some(Role::Victim));
    assert!(result.profile(ethereum_types::Address::zero()).is_none());
}

#[test]
fn silent_participant_stays_unknown() {
    let root = with_calls(
        call(addr(EOA), addr(VICTIM), 0, "0x"),
        vec![frame("STATICCALL", addr(VICTIM), addr(BYSTANDER), 0, "0x")],
    );
    let result = analyze(envelope(root), &[]);

    let bystander = result.profile(addr(BYSTANDER)).unwrap();
    assert_eq!(
        (bystander.role, bystander.rule),
        (Role::Unknown, RoleRule::Default)
    );
    assert_eq!(bystander.first_seen_call.0, 1);
}

#[test]
fn every_participant_gets_exactly_one_profile() {
    let cases = [
        reentrant_withdraw(),
        owner_mint(),
        (create2_relay(), Vec::new()),
    ];
    for (envelope, findings) in cases {
        let trace = build(envelope.clone());
        let graph = ValueFlowGraph::build(&trace, PathLimits::default());
        let expected = participants(&trace, &graph);

        let result = analyze(envelope, &findings);
        assert_eq!(result.address_profiles.len(), expected.len());
        for address in &expected {
            let count = result
                .address_profiles
                .iter()
                .filter(|p| p.address == *address)
                .count();
            assert_eq!(count, 1, "{address:#x}");
        }
        for profile in &result.address_profiles {
            assert_eq!(profile.role, profile.rule.role());
            if profile.role == Role::Attacker {
                assert!(profile.created_by.is_none());
            }
        }
    }
}

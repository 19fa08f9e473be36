//! DELEGATECALL into an attacker-supplied implementation.

use ethereum_types::Address;

use super::{ExploitCategory, ExploitHypothesis, HypothesisBuilder, PatternInput};
use crate::call_tree::CallKind;
use crate::findings::FindingCategory;

const DRAIN_BOOST: f64 = 0.10;

pub(super) fn detect(input: &PatternInput<'_>) -> Vec<ExploitHypothesis> {
    let mut out = Vec::new();
    for call in input.trace.calls() {
        if call.kind != CallKind::DelegateCall {
            continue;
        }
        let Some(target) = call.to else {
            continue;
        };
        if !input.is_attacker_side(target) {
            continue;
        }
        let Some(issuer) = input.trace.parent_of(call.id) else {
            continue;
        };
        if !has_address_word(&issuer.input, target) {
            continue;
        }

        // The hijacked context is the contract executing the DELEGATECALL.
        let victim = call.from;
        let mut builder = HypothesisBuilder::new(ExploitCategory::DelegatecallHijack)
            .victim(Some(victim))
            .attacker(input.attacker_for(victim))
            .call(
                issuer.id,
                format!("call data passed {target:#x} to {victim:#x}"),
            )
            .call(
                call.id,
                format!("{victim:#x} delegated execution to the supplied {target:#x}"),
            );

        let drained: Vec<usize> = input
            .graph
            .edges()
            .iter()
            .filter(|e| {
                call.contains(e.causing_call)
                    && e.source_party() == victim
                    && input.is_attacker_side(e.to)
            })
            .map(|e| e.seq)
            .collect();
        if !drained.is_empty() {
            builder = builder.boost(DRAIN_BOOST);
        }
        for seq in drained {
            builder = builder.edge(seq, "value left the hijacked context");
        }
        for (index, low) in input.findings_on(victim, |c| {
            c == FindingCategory::DelegatecallToUntrusted
        }) {
            builder = builder.finding(index, low, "controlled delegatecall flagged on the victim");
        }
        out.push(builder.finish(input));
    }
    out
}

/// Whether `address` appears as a 32-byte ABI word in the call arguments.
fn has_address_word(input: &[u8], address: Address) -> bool {
    let Some(args) = input.get(4..) else {
        return false;
    };
    args.chunks_exact(32)
        .any(|word| word[..12].iter().all(|b| *b == 0) && word[12..] == address.as_bytes()[..])
}

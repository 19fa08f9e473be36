//! Owner drains the contract it controls.

use super::{ExploitCategory, ExploitHypothesis, HypothesisBuilder, PatternInput};
use crate::call_tree::CallKind;
use crate::roles::Role;
use crate::selectors::selector_of;

const RENOUNCE_BOOST: f64 = 0.15;
const SELFDESTRUCT_BOOST: f64 = 0.15;

pub(super) fn detect(input: &PatternInput<'_>) -> Vec<ExploitHypothesis> {
    let renounce = selector_of("renounceOwnership()");
    let mut out = Vec::new();

    for victim in input.addresses_with(Role::Victim) {
        let owners = input.trace.owners_of(victim);
        let Some(owner) = owners
            .iter()
            .copied()
            .find(|o| input.role(*o) == Role::Attacker)
        else {
            continue;
        };

        // Last value to leave the victim must be a large net outflow to an attacker.
        let Some(last) = input
            .graph
            .edges()
            .iter()
            .rev()
            .find(|e| e.source_party() == victim)
        else {
            continue;
        };
        let net_outflow = input
            .graph
            .attributed_deltas(victim)
            .get(&last.asset)
            .is_some_and(|d| d.is_negative());
        if input.role(last.to) != Role::Attacker
            || !net_outflow
            || !input.graph.is_large(last, input.settings.large_transfer_ratio)
        {
            continue;
        }

        let relation = match input.trace.created_by(victim) {
            Some((creator, _)) if creator == owner => "deployed the victim in this transaction",
            _ => "is a recorded owner of the victim",
        };
        let mut builder = HypothesisBuilder::new(ExploitCategory::Rugpull)
            .victim(Some(victim))
            .attacker(Some(last.to))
            .edge(
                last.seq,
                format!(
                    "final outflow of {} {} to {:#x}; {owner:#x} {relation}",
                    last.amount, last.asset, last.to
                ),
            );
        if let Some((_, create)) = input.trace.created_by(victim) {
            builder = builder.call(create, "victim created in this transaction");
        }

        let preceding = input
            .trace
            .calls()
            .filter(|c| c.id <= last.causing_call || c.kind == CallKind::SelfDestruct);
        let (mut renounced, mut destroyed) = (false, false);
        for call in preceding {
            if call.to == Some(victim) && call.input_selector == Some(renounce) && !renounced {
                renounced = true;
                builder = builder
                    .call(call.id, "ownership renounced")
                    .boost(RENOUNCE_BOOST);
            }
            if call.kind == CallKind::SelfDestruct && call.from == victim && !destroyed {
                destroyed = true;
                builder = builder
                    .call(call.id, "victim self-destructed")
                    .boost(SELFDESTRUCT_BOOST);
            }
        }
        out.push(builder.finish(input));
    }
    out
}

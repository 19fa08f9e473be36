//! Round trip through an AMM before the victim pays out.

use ethereum_types::Address;
use rustc_hash::FxHashSet;

use super::{ExploitCategory, ExploitHypothesis, HypothesisBuilder, PatternInput};
use crate::call_tree::CallNode;
use crate::types::CallId;

const TWO_LEG_BOOST: f64 = 0.10;
const ORACLE_READ_BOOST: f64 = 0.15;

pub(super) fn detect(input: &PatternInput<'_>) -> Vec<ExploitHypothesis> {
    let registry = &input.settings.registry;
    let swaps: Vec<&CallNode> = input
        .trace
        .calls()
        .filter(|c| {
            c.to.is_some_and(|to| {
                registry.is_amm(to) || (registry.contains(to) && input.settings.is_swap_named(c))
            })
        })
        .collect();
    if swaps.is_empty() {
        return Vec::new();
    }
    let swap_of = |id: CallId| swaps.iter().find(|s| s.contains(id)).copied();

    let mut out = Vec::new();
    let mut paid_victims: FxHashSet<Address> = FxHashSet::default();
    for payout in input.graph.edges().iter().filter(|e| input.is_payout(e)) {
        let victim = payout.source_party();
        if !paid_victims.insert(victim) {
            continue;
        }

        let before = &input.graph.edges()[..payout.seq];
        let leg_in = before.iter().find(|e| {
            input.is_attacker_side(e.source_party()) && swap_of(e.causing_call).is_some()
        });
        let Some(leg_in) = leg_in else {
            continue;
        };
        let leg_out = before[leg_in.seq + 1..].iter().find(|e| {
            input.is_attacker_side(e.to)
                && !input.is_attacker_side(e.source_party())
                && swap_of(e.causing_call).is_some()
        });
        let Some(leg_out) = leg_out else {
            continue;
        };
        let (Some(swap_in), Some(swap_out)) =
            (swap_of(leg_in.causing_call), swap_of(leg_out.causing_call))
        else {
            continue;
        };

        let mut builder = HypothesisBuilder::new(ExploitCategory::PriceManipulation)
            .victim(Some(victim))
            .attacker(Some(payout.to))
            .call(swap_in.id, describe(input, swap_in))
            .edge(leg_in.seq, "attacker side paid into the pool")
            .edge(leg_out.seq, "attacker side received from the pool")
            .edge(payout.seq, "victim paid the attacker after the round trip");
        if swap_out.id != swap_in.id {
            builder = builder
                .call(swap_out.id, describe(input, swap_out))
                .boost(TWO_LEG_BOOST);
        }

        // The victim reading a pool it was about to pay against.
        let pools: FxHashSet<Address> = swaps
            .iter()
            .flat_map(|s| s.iter())
            .filter_map(|c| c.to)
            .filter(|a| *a != victim && !input.is_attacker_side(*a))
            .collect();
        let oracle_read = input.trace.calls().find(|c| {
            c.from == victim
                && c.id > leg_in.causing_call
                && c.id <= payout.causing_call
                && c.to.is_some_and(|to| pools.contains(&to))
        });
        if let Some(read) = oracle_read {
            builder = builder
                .call(read.id, "victim queried the manipulated pool")
                .boost(ORACLE_READ_BOOST);
        }
        out.push(builder.finish(input));
    }
    out
}

/// `swap on Uniswap V2 Router (0x7a25...)`
fn describe(input: &PatternInput<'_>, call: &CallNode) -> String {
    let method = call.method_label();
    let Some(to) = call.to else {
        return method;
    };
    match input.settings.registry.get(to).and_then(|k| k.label.as_deref()) {
        Some(label) => format!("{method} on {label} ({to:#x})"),
        None => format!("{method} on {to:#x}"),
    }
}

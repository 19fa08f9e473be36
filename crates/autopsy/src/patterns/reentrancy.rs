//! Re-entry into the same function of the same contract while value moves.

use ethereum_types::Address;
use rustc_hash::FxHashSet;

use super::{ExploitCategory, ExploitHypothesis, HypothesisBuilder, PatternInput};
use crate::call_tree::{CallKind, CallNode};
use crate::findings::FindingCategory;
use crate::types::{CallId, Selector};

/// Callback hops through an attacker-controlled contract.
const CALLBACK_BOOST: f64 = 0.10;

pub(super) fn detect(input: &PatternInput<'_>) -> Vec<ExploitHypothesis> {
    let mut seen: FxHashSet<(Address, Selector)> = FxHashSet::default();
    let mut out = Vec::new();

    for outer in input.trace.calls() {
        let (Some(target), Some(selector)) = (outer.to, outer.input_selector) else {
            continue;
        };
        if outer.kind == CallKind::StaticCall || seen.contains(&(target, selector)) {
            continue;
        }
        let Some(nested) = outer.iter().skip(1).find(|d| {
            d.kind != CallKind::StaticCall
                && d.to == Some(target)
                && d.input_selector == Some(selector)
        }) else {
            continue;
        };
        let moved: Vec<usize> = input
            .graph
            .edges()
            .iter()
            .filter(|e| outer.contains(e.causing_call))
            .map(|e| e.seq)
            .collect();
        if moved.is_empty() {
            continue;
        }
        seen.insert((target, selector));

        let method = outer.method_label();
        let mut builder = HypothesisBuilder::new(ExploitCategory::Reentrancy)
            .victim(Some(target))
            .attacker(input.attacker_for(target))
            .call(outer.id, format!("outer {method} call into {target:#x}"))
            .call(
                nested.id,
                format!(
                    "{method} re-entered at depth {} before the outer call returned",
                    nested.depth
                ),
            );

        if let Some(hop) = callback_hop(input, outer, nested.id) {
            let via = hop.to.unwrap_or_default();
            builder = builder
                .call(hop.id, format!("control passed to {via:#x} between the two entries"))
                .boost(CALLBACK_BOOST);
        }
        for seq in moved.iter().copied().filter(|&seq| {
            input
                .graph
                .edge(seq)
                .is_some_and(|e| e.source_party() == target)
        }) {
            builder = builder.edge(seq, "value left the target inside the re-entered call");
        }
        for (index, low) in input.findings_on(target, |c| c == FindingCategory::Reentrancy) {
            builder =
                builder.finding(index, low, "static analysis flagged reentrancy on the target");
        }
        out.push(builder.finish(input));
    }
    out
}

/// First call on the path from `outer` to `nested` that enters attacker-side code.
fn callback_hop<'a>(
    input: &PatternInput<'a>,
    outer: &'a CallNode,
    nested: CallId,
) -> Option<&'a CallNode> {
    let mut node = outer;
    loop {
        node = node.children.iter().find(|c| c.contains(nested))?;
        if node.id == nested {
            return None;
        }
        if node.to.is_some_and(|to| input.is_attacker_side(to)) {
            return Some(node);
        }
    }
}

//! Privileged function invoked by the attacker side against the victim.

use ethereum_types::Address;
use indexmap::IndexMap;

use super::{ExploitCategory, ExploitHypothesis, HypothesisBuilder, PatternInput};
use crate::call_tree::CallNode;
use crate::findings::FindingCategory;
use crate::roles::Role;

const NOT_OWNER_BOOST: f64 = 0.10;
const FEE_LIMIT_BOOST: f64 = 0.10;
const FINDING_BOOST: f64 = 0.10;

pub(super) fn detect(input: &PatternInput<'_>) -> Vec<ExploitHypothesis> {
    let settings = input.settings;
    if settings.privileged.is_empty() {
        return Vec::new();
    }

    let mut by_victim: IndexMap<Address, Vec<(&CallNode, String)>> = IndexMap::new();
    for call in input.trace.calls() {
        let Some(victim) = call.to else {
            continue;
        };
        if input.role(victim) != Role::Victim || !input.is_attacker_side(call.from) {
            continue;
        }
        if let Some(label) = settings.privileged.match_call(call) {
            by_victim.entry(victim).or_default().push((call, label));
        }
    }

    let mut out = Vec::new();
    for (victim, calls) in by_victim {
        let owners = input.trace.owners_of(victim);
        let mut builder: Option<HypothesisBuilder> = None;
        let (mut not_owner, mut fee_limit, mut flagged) = (false, false, false);

        for (call, label) in calls {
            let caller_is_owner = owners.contains(&call.from);
            let payout = input
                .graph
                .edges()
                .iter()
                .find(|e| e.causing_call >= call.id && input.role(e.to) == Role::Attacker);
            if caller_is_owner && payout.is_none() {
                continue;
            }

            let rationale = if caller_is_owner {
                format!("{label} called on the victim by its owner {:#x}", call.from)
            } else {
                format!(
                    "{label} called on the victim by {:#x}, which is not a recorded owner",
                    call.from
                )
            };
            let mut b = builder
                .take()
                .unwrap_or_else(|| {
                    HypothesisBuilder::new(ExploitCategory::AccessControl)
                        .victim(Some(victim))
                        .attacker(payout.map(|e| e.to).or_else(|| input.attacker_for(victim)))
                })
                .call(call.id, rationale);
            not_owner |= !caller_is_owner;

            if let Some(payout) = payout {
                b = b.edge(payout.seq, "attacker received value after the privileged call");
                for mutator in input.trace.calls().filter(|c| {
                    c.id > call.id
                        && c.id <= payout.causing_call
                        && settings.fee_limit.matches_call(c)
                }) {
                    fee_limit = true;
                    b = b.call(
                        mutator.id,
                        format!(
                            "{} changed fees or limits before the payout",
                            mutator.method_label()
                        ),
                    );
                }
            }
            for correlation in input.correlations.for_call(call.id) {
                let is_access_control = input
                    .findings
                    .get(correlation.finding)
                    .is_some_and(|f| f.category == FindingCategory::AccessControl);
                if is_access_control {
                    flagged = true;
                    b = b.finding(
                        correlation.finding,
                        correlation.low_confidence(),
                        "access-control finding on the called function",
                    );
                }
            }
            builder = Some(b);
        }

        if let Some(mut b) = builder {
            for (boosted, amount) in [
                (not_owner, NOT_OWNER_BOOST),
                (fee_limit, FEE_LIMIT_BOOST),
                (flagged, FINDING_BOOST),
            ] {
                if boosted {
                    b = b.boost(amount);
                }
            }
            out.push(b.finish(input));
        }
    }
    out
}

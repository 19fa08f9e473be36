//! Flagged overflow/underflow followed closely by a payout to the attacker.

use super::{ExploitCategory, ExploitHypothesis, HypothesisBuilder, PatternInput};
use crate::roles::Role;

const LARGE_PAYOUT_BOOST: f64 = 0.10;

pub(super) fn detect(input: &PatternInput<'_>) -> Vec<ExploitHypothesis> {
    let window = input.settings.arithmetic_window;
    let mut out = Vec::new();

    for victim in input.addresses_with(Role::Victim) {
        let mut builder: Option<HypothesisBuilder> = None;
        let mut large_payout = false;
        let flagged = input
            .correlations
            .for_contract(victim)
            .filter(|c| {
                input
                    .findings
                    .get(c.finding)
                    .is_some_and(|f| f.category.is_arithmetic())
            });

        for correlation in flagged {
            for &call in &correlation.calls {
                let payouts = input.graph.edges().iter().filter(|e| {
                    e.source_party() == victim
                        && input.role(e.to) == Role::Attacker
                        && e.causing_call >= call
                        && e.causing_call.0 - call.0 <= window
                });
                for payout in payouts {
                    let category = input
                        .findings
                        .get(correlation.finding)
                        .map(|f| f.category.to_string())
                        .unwrap_or_default();
                    let b = builder.take().unwrap_or_else(|| {
                        HypothesisBuilder::new(ExploitCategory::Arithmetic)
                            .victim(Some(victim))
                            .attacker(Some(payout.to))
                    });
                    let b = b
                        .finding(
                            correlation.finding,
                            correlation.low_confidence(),
                            format!("{category} flagged on the victim"),
                        )
                        .call(call, "call into the flagged function")
                        .edge(
                            payout.seq,
                            format!(
                                "victim paid the attacker {} pre-order calls later",
                                payout.causing_call.0 - call.0
                            ),
                        );
                    large_payout |=
                        input.graph.is_large(payout, input.settings.large_transfer_ratio);
                    builder = Some(b);
                }
            }
        }
        if let Some(mut b) = builder {
            if large_payout {
                b = b.boost(LARGE_PAYOUT_BOOST);
            }
            out.push(b.finish(input));
        }
    }
    out
}

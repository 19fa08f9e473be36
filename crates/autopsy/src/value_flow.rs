//! Value-flow multigraph.
//!
//! One edge per value-bearing effective call and one per decoded token
//! `Transfer` log. Edges are never merged: repeated small transfers between the
//! same pair are evidence in their own right.

use std::collections::BTreeMap;

use ethereum_types::{Address, U256};
use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use crate::call_tree::{CallKind, CallNode, TransactionTrace};
use crate::error::AutopsyError;
use crate::types::{Asset, CallId, SignedAmount};

const RATIO_SCALE: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFlowEdge {
    /// Position in execution order; also the edge's index in the graph.
    pub seq: usize,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub asset: Asset,
    pub causing_call: CallId,
}

impl ValueFlowEdge {
    /// Token mints are emitted from the zero address.
    pub fn is_mint(&self) -> bool {
        self.from.is_zero() && matches!(self.asset, Asset::Token(_))
    }

    /// Party whose holdings back the transfer. Mints are charged to the token contract.
    pub fn source_party(&self) -> Address {
        match self.asset {
            Asset::Token(token) if self.from.is_zero() => token,
            _ => self.from,
        }
    }
}

/// A transfer that was observed but excluded because its call did not take effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardedEdge {
    pub from: Address,
    pub to: Option<Address>,
    pub amount: U256,
    pub asset: Asset,
    pub causing_call: CallId,
    pub reason: String,
}

/// Bounds for path enumeration.
#[derive(Debug, Clone, Copy)]
pub struct PathLimits {
    /// Maximum number of edges in a path.
    pub max_depth: usize,
    /// Maximum number of path prefixes visited by one query.
    pub max_paths: usize,
}

impl Default for PathLimits {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_paths: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValueFlowGraph {
    edges: Vec<ValueFlowEdge>,
    discarded: Vec<DiscardedEdge>,
    outgoing: FxHashMap<Address, Vec<usize>>,
    incoming: FxHashMap<Address, Vec<usize>>,
    /// Outgoing edges keyed by `source_party`; paths are walked over this index.
    sourced: FxHashMap<Address, Vec<usize>>,
    limits: PathLimits,
}

impl ValueFlowGraph {
    pub fn build(trace: &TransactionTrace, limits: PathLimits) -> Self {
        let mut graph = ValueFlowGraph {
            limits,
            ..Default::default()
        };

        for call in trace.calls() {
            let effective = trace.is_effective(call.id);
            if let Some(amount) = native_transfer(call) {
                match (effective, call.to) {
                    (true, Some(to)) => graph.push(call.from, to, amount, Asset::Native, call.id),
                    (_, to) => graph.discard(DiscardedEdge {
                        from: call.from,
                        to,
                        amount,
                        asset: Asset::Native,
                        causing_call: call.id,
                        reason: revert_reason(call),
                    }),
                }
            }
            for log in &call.logs {
                let asset = Asset::Token(log.token);
                if effective {
                    graph.push(log.from, log.to, log.amount, asset, call.id);
                } else {
                    graph.discard(DiscardedEdge {
                        from: log.from,
                        to: Some(log.to),
                        amount: log.amount,
                        asset,
                        causing_call: call.id,
                        reason: revert_reason(call),
                    });
                }
            }
        }

        debug!(
            edges = graph.edges.len(),
            discarded = graph.discarded.len(),
            "value-flow graph built"
        );
        graph
    }

    fn push(&mut self, from: Address, to: Address, amount: U256, asset: Asset, call: CallId) {
        let seq = self.edges.len();
        self.edges.push(ValueFlowEdge {
            seq,
            from,
            to,
            amount,
            asset,
            causing_call: call,
        });
        self.outgoing.entry(from).or_default().push(seq);
        self.incoming.entry(to).or_default().push(seq);
        let source = self.edges[seq].source_party();
        self.sourced.entry(source).or_default().push(seq);
    }

    fn discard(&mut self, edge: DiscardedEdge) {
        debug!(
            call = %edge.causing_call,
            from = %format!("{:#x}", edge.from),
            amount = %edge.amount,
            asset = %edge.asset,
            reason = %edge.reason,
            "DiscardedEdge"
        );
        self.discarded.push(edge);
    }

    pub fn edges(&self) -> &[ValueFlowEdge] {
        &self.edges
    }

    pub fn edge(&self, seq: usize) -> Option<&ValueFlowEdge> {
        self.edges.get(seq)
    }

    pub fn discarded(&self) -> &[DiscardedEdge] {
        &self.discarded
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edges_from(&self, address: Address) -> impl Iterator<Item = &ValueFlowEdge> {
        self.indexed(self.outgoing.get(&address))
    }

    pub fn edges_into(&self, address: Address) -> impl Iterator<Item = &ValueFlowEdge> {
        self.indexed(self.incoming.get(&address))
    }

    fn indexed<'a>(
        &'a self,
        indices: Option<&'a Vec<usize>>,
    ) -> impl Iterator<Item = &'a ValueFlowEdge> + 'a {
        indices
            .into_iter()
            .flatten()
            .filter_map(|&i| self.edges.get(i))
    }

    /// Distinct assets moved by the transaction, in first-seen order.
    pub fn assets(&self) -> IndexSet<Asset> {
        self.edges.iter().map(|e| e.asset).collect()
    }

    /// Whether the address sends or receives at least one edge.
    pub fn participates(&self, address: Address) -> bool {
        self.outgoing.contains_key(&address) || self.incoming.contains_key(&address)
    }

    /// Edge endpoints in first-seen order.
    pub fn participants(&self) -> IndexSet<Address> {
        self.edges.iter().flat_map(|e| [e.from, e.to]).collect()
    }

    /// Inbound minus outbound for one asset.
    pub fn net_delta(&self, address: Address, asset: Asset) -> SignedAmount {
        let mut delta = SignedAmount::zero();
        for edge in self.edges_into(address).filter(|e| e.asset == asset) {
            delta.credit(edge.amount);
        }
        for edge in self.edges_from(address).filter(|e| e.asset == asset) {
            delta.debit(edge.amount);
        }
        delta
    }

    /// Net delta for every asset the address touched.
    pub fn net_deltas(&self, address: Address) -> BTreeMap<Asset, SignedAmount> {
        let mut out: BTreeMap<Asset, SignedAmount> = BTreeMap::new();
        for edge in self.edges_into(address) {
            out.entry(edge.asset).or_default().credit(edge.amount);
        }
        for edge in self.edges_from(address) {
            out.entry(edge.asset).or_default().debit(edge.amount);
        }
        out
    }

    /// Like [`Self::net_deltas`], but mints are charged to the token contract
    /// rather than to the zero address.
    pub fn attributed_deltas(&self, address: Address) -> BTreeMap<Asset, SignedAmount> {
        let mut out: BTreeMap<Asset, SignedAmount> = BTreeMap::new();
        for edge in self.edges_into(address) {
            out.entry(edge.asset).or_default().credit(edge.amount);
        }
        for edge in self.indexed(self.sourced.get(&address)) {
            out.entry(edge.asset).or_default().debit(edge.amount);
        }
        out
    }

    pub fn first_inbound_edge(&self, address: Address) -> Option<&ValueFlowEdge> {
        self.edges_into(address).min_by_key(|e| e.seq)
    }

    /// Largest single edge amount for an asset.
    pub fn max_amount(&self, asset: Asset) -> U256 {
        self.edges
            .iter()
            .filter(|e| e.asset == asset)
            .map(|e| e.amount)
            .max()
            .unwrap_or_default()
    }

    /// Whether `edge` moves at least `ratio` of the largest edge of its asset.
    pub fn is_large(&self, edge: &ValueFlowEdge, ratio: f64) -> bool {
        let scaled = (ratio.clamp(0.0, 1.0) * RATIO_SCALE as f64).round() as u64;
        let max = self.max_amount(edge.asset);
        edge.amount.full_mul(U256::from(RATIO_SCALE)) >= max.full_mul(U256::from(scaled))
    }

    /// All edge sequences `a -> ... -> b` with strictly increasing `seq`.
    ///
    /// Paths leave an address through the edges it is the source party of, so a
    /// token contract's mints start paths at the token.
    pub fn paths_between(&self, a: Address, b: Address) -> Vec<Vec<&ValueFlowEdge>> {
        let mut out = Vec::new();
        self.for_each_path(a, |path| {
            if path.last().and_then(|&i| self.edges.get(i)).map(|e| e.to) == Some(b) {
                out.push(self.resolve(path));
            }
        });
        out
    }

    /// Every path starting at `a`, including proper prefixes.
    pub fn paths_from(&self, a: Address) -> Vec<Vec<&ValueFlowEdge>> {
        let mut out = Vec::new();
        self.for_each_path(a, |path| out.push(self.resolve(path)));
        out
    }

    /// Longest path from `a` whose final recipient passes `accept`.
    ///
    /// Ties go to the path found first, i.e. the one with the earliest edges.
    pub fn longest_path_from(
        &self,
        a: Address,
        accept: impl Fn(Address) -> bool,
    ) -> Option<Vec<&ValueFlowEdge>> {
        let mut best: Option<Vec<usize>> = None;
        self.for_each_path(a, |path| {
            let Some(last) = path.last().and_then(|&i| self.edges.get(i)) else {
                return;
            };
            if !accept(last.to) {
                return;
            }
            if best.as_ref().is_none_or(|b| path.len() > b.len()) {
                best = Some(path.to_vec());
            }
        });
        best.map(|p| self.resolve(&p))
    }

    /// Edge count of the shortest ordered path `a -> b`.
    pub fn shortest_hops(&self, a: Address, b: Address) -> Option<usize> {
        let mut best: Option<usize> = None;
        self.for_each_path(a, |path| {
            let reaches = path.last().and_then(|&i| self.edges.get(i)).map(|e| e.to) == Some(b);
            if reaches && best.is_none_or(|h| path.len() < h) {
                best = Some(path.len());
            }
        });
        best
    }

    fn resolve(&self, path: &[usize]) -> Vec<&ValueFlowEdge> {
        path.iter().filter_map(|&i| self.edges.get(i)).collect()
    }

    fn for_each_path(&self, start: Address, mut visit: impl FnMut(&[usize])) {
        let mut stack = Vec::new();
        let mut budget = self.limits.max_paths;
        self.extend_path(start, None, &mut stack, &mut budget, &mut visit);
    }

    fn extend_path(
        &self,
        at: Address,
        after: Option<usize>,
        stack: &mut Vec<usize>,
        budget: &mut usize,
        visit: &mut impl FnMut(&[usize]),
    ) {
        if stack.len() >= self.limits.max_depth {
            return;
        }
        let Some(outgoing) = self.sourced.get(&at) else {
            return;
        };
        for &seq in outgoing {
            if after.is_some_and(|prev| seq <= prev) {
                continue;
            }
            if *budget == 0 {
                return;
            }
            *budget -= 1;
            stack.push(seq);
            visit(stack);
            if let Some(edge) = self.edges.get(seq) {
                self.extend_path(edge.to, Some(seq), stack, budget, visit);
            }
            stack.pop();
        }
    }

    /// Check the edge view against the call view for every address and asset.
    ///
    /// The call view is derived from the tree alone: frame values and emitted
    /// transfers, kept only when the frame and all of its ancestors succeeded.
    pub fn reconcile(&self, trace: &TransactionTrace) -> Result<(), AutopsyError> {
        let mut from_calls: FxHashMap<(Address, Asset), SignedAmount> = FxHashMap::default();
        let mut pending: Vec<(&CallNode, bool)> = vec![(&trace.root, true)];
        while let Some((call, ancestors_ok)) = pending.pop() {
            let kept = ancestors_ok && call.succeeded;
            pending.extend(call.children.iter().rev().map(|c| (c, kept)));
            if !kept {
                continue;
            }
            let moves_value = matches!(
                call.kind,
                CallKind::Call | CallKind::Create | CallKind::Create2 | CallKind::SelfDestruct
            );
            if let Some(to) = call.to.filter(|_| moves_value && !call.value.is_zero()) {
                from_calls.entry((to, Asset::Native)).or_default().credit(call.value);
                from_calls
                    .entry((call.from, Asset::Native))
                    .or_default()
                    .debit(call.value);
            }
            for log in &call.logs {
                let asset = Asset::Token(log.token);
                from_calls.entry((log.to, asset)).or_default().credit(log.amount);
                from_calls.entry((log.from, asset)).or_default().debit(log.amount);
            }
        }

        let mut keys: Vec<(Address, Asset)> = from_calls.keys().copied().collect();
        for edge in &self.edges {
            keys.push((edge.from, edge.asset));
            keys.push((edge.to, edge.asset));
        }
        keys.sort_unstable();
        keys.dedup();

        for (address, asset) in keys {
            let expected = from_calls
                .get(&(address, asset))
                .copied()
                .unwrap_or_default();
            let observed = self.net_delta(address, asset);
            if expected != observed {
                return Err(AutopsyError::ValueConservation {
                    address,
                    asset,
                    from_edges: observed,
                    from_calls: expected,
                });
            }
        }
        Ok(())
    }
}

/// Native value moved by this call, if any.
///
/// DELEGATECALL and CALLCODE run in the caller's context and move nothing.
fn native_transfer(call: &CallNode) -> Option<U256> {
    if call.value.is_zero() {
        return None;
    }
    match call.kind {
        CallKind::Call | CallKind::Create | CallKind::Create2 | CallKind::SelfDestruct => {
            Some(call.value)
        }
        CallKind::DelegateCall | CallKind::CallCode | CallKind::StaticCall => None,
    }
}

fn revert_reason(call: &CallNode) -> String {
    if call.succeeded {
        "ancestor call reverted".to_string()
    } else {
        format!(
            "call reverted: {}",
            call.error.as_deref().unwrap_or("unknown error")
        )
    }
}

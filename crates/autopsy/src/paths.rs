//! Suspicious call-path ranking.
//!
//! Scores root-to-leaf call paths by how deep they go, how much they branch
//! and how often the same path repeats. The ranking is reported alongside the
//! hypotheses and never feeds role or pattern decisions.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::call_tree::{CallNode, TransactionTrace};
use crate::config::PathRankingConfig;
use crate::types::CallId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousPath {
    /// `to:method` per node, joined with ` -> `.
    pub signature: String,
    pub calls: Vec<CallId>,
    /// Edges in the path.
    pub depth: usize,
    /// Children of every non-leaf node on the path.
    pub fanout: usize,
    /// Paths in the trace with the same signature.
    pub frequency: usize,
    pub score: f64,
}

pub struct SuspiciousPathRanker<'a> {
    config: &'a PathRankingConfig,
}

impl<'a> SuspiciousPathRanker<'a> {
    pub fn new(config: &'a PathRankingConfig) -> Self {
        Self { config }
    }

    pub fn rank(&self, trace: &TransactionTrace) -> Vec<SuspiciousPath> {
        let mut raw = Vec::new();
        let mut stack = Vec::new();
        collect_paths(&trace.root, &mut stack, &mut raw);
        if raw.is_empty() || self.config.k == 0 {
            return Vec::new();
        }

        let mut frequency: FxHashMap<&str, usize> = FxHashMap::default();
        for path in &raw {
            *frequency.entry(path.signature.as_str()).or_default() += 1;
        }
        let max_depth = raw.iter().map(|p| p.depth).max().unwrap_or(0);
        let max_fanout = raw.iter().map(|p| p.fanout).max().unwrap_or(0);
        let min_freq = frequency.values().copied().min().unwrap_or(0);
        let max_freq = frequency.values().copied().max().unwrap_or(0);

        let normalize = |value: usize, min: usize, max: usize| {
            if max > min {
                (value - min) as f64 / (max - min) as f64
            } else {
                0.0
            }
        };

        let mut scored: Vec<SuspiciousPath> = raw
            .iter()
            .map(|path| {
                let freq = frequency.get(path.signature.as_str()).copied().unwrap_or(1);
                let score = self.config.depth_weight * normalize(path.depth, 0, max_depth)
                    + self.config.fanout_weight * normalize(path.fanout, 0, max_fanout)
                    + self.config.frequency_weight * normalize(freq, min_freq, max_freq);
                SuspiciousPath {
                    signature: path.signature.clone(),
                    calls: path.calls.clone(),
                    depth: path.depth,
                    fanout: path.fanout,
                    frequency: freq,
                    score,
                }
            })
            .collect();

        // Stable sort keeps execution order among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut seen: FxHashSet<String> = FxHashSet::default();
        scored.retain(|p| seen.insert(p.signature.clone()));
        scored.truncate(self.config.k);
        scored
    }
}

struct RawPath {
    signature: String,
    calls: Vec<CallId>,
    depth: usize,
    fanout: usize,
}

fn collect_paths<'a>(node: &'a CallNode, stack: &mut Vec<&'a CallNode>, out: &mut Vec<RawPath>) {
    stack.push(node);
    if node.children.is_empty() {
        if stack.len() >= 2 {
            out.push(RawPath {
                signature: stack
                    .iter()
                    .map(|n| signature_step(n))
                    .collect::<Vec<_>>()
                    .join(" -> "),
                calls: stack.iter().map(|n| n.id).collect(),
                depth: stack.len() - 1,
                fanout: stack.iter().map(|n| n.children.len()).sum(),
            });
        }
    } else {
        for child in &node.children {
            collect_paths(child, stack, out);
        }
    }
    stack.pop();
}

fn signature_step(node: &CallNode) -> String {
    match node.to {
        Some(to) => format!("{to:#x}:{}", node.method_label()),
        None => format!("<failed create>:{}", node.method_label()),
    }
}

//! Many traces on the analyzer's bounded worker pool.
//!
//! Traces share nothing mutable. A malformed or cancelled trace is recorded as
//! a failure and the batch moves on; a timed-out trace yields an incomplete
//! result; a classifier invariant violation cancels the remaining work and
//! fails the whole batch.

use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AutopsyError;
use crate::findings::Finding;
use crate::pipeline::Analyzer;
use crate::report::AnalysisResult;
use crate::types::parse_json_unbounded;

/// A trace that could not be analyzed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFailure {
    /// Position in the input batch.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Input order.
    pub results: Vec<AnalysisResult>,
    pub failures: Vec<TraceFailure>,
}

/// Read a trace file holding one envelope or an array of envelopes.
///
/// Decoding runs on the analyzer's pool, whose stacks fit `maxCallDepth`.
pub fn load_traces(analyzer: &Analyzer, path: &Path) -> Result<Vec<Value>, AutopsyError> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value = analyzer.install(|| parse_json_unbounded(&raw))?;
    Ok(match value {
        Value::Array(items) => items,
        single => vec![single],
    })
}

pub fn run_batch(
    analyzer: &Analyzer,
    traces: Vec<Value>,
    findings: &[Finding],
    cancel: &CancellationToken,
) -> Result<BatchReport, AutopsyError> {
    let total = traces.len();
    let outcomes: Vec<(usize, Option<String>, Result<AnalysisResult, AutopsyError>)> =
        analyzer.install(|| {
            traces
                .into_par_iter()
                .enumerate()
                .map(|(index, raw)| {
                    let tx_hash = envelope_hash(&raw);
                    let ctx = analyzer.context(cancel.child_token());
                    let outcome = if ctx.token().is_cancelled() {
                        Err(AutopsyError::Cancelled { stage: "parse" })
                    } else {
                        analyzer.analyze_value(raw, findings, &ctx)
                    };
                    if let Err(e) = &outcome {
                        if !e.is_per_trace() {
                            cancel.cancel();
                        }
                    }
                    (index, tx_hash, outcome)
                })
                .collect()
        });

    let mut report = BatchReport::default();
    let mut fatal = None;
    for (index, tx_hash, outcome) in outcomes {
        match outcome {
            Ok(result) => report.results.push(result),
            Err(e) if !e.is_per_trace() => {
                fatal.get_or_insert(e);
            }
            Err(e) => {
                warn!(
                    index,
                    tx = tx_hash.as_deref().unwrap_or("unknown"),
                    error = %e,
                    "trace skipped"
                );
                report.failures.push(TraceFailure {
                    index,
                    tx_hash,
                    error: e.to_string(),
                });
            }
        }
    }
    if let Some(e) = fatal {
        return Err(e);
    }

    info!(
        total,
        analyzed = report.results.len(),
        failed = report.failures.len(),
        incomplete = report.results.iter().filter(|r| !r.is_complete()).count(),
        "batch finished"
    );
    Ok(report)
}

fn envelope_hash(raw: &Value) -> Option<String> {
    ["hash", "txHash", "transactionHash"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

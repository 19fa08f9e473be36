//! Per-trace orchestration.
//!
//! ```text
//! trace ─┬─ value flow ─ reconcile ─ profiles ─┬─ roles ─ path ranking ─ patterns
//!        └─ finding correlation ───────────────┘
//! ```
//!
//! The two branches run on the rayon pool via `rayon::join`. Deadline and
//! cancellation are checked at each stage boundary and between pattern
//! matchers. A deadline yields an incomplete result holding whatever the
//! earlier stages produced; cancellation is an error.
//!
//! Parsing and analysis run on the analyzer's own pool, whose worker stacks
//! are sized for `maxCallDepth`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::call_tree::{CallTreeBuilder, TransactionTrace, worker_stack_size};
use crate::config::{AddressRegistry, AutopsyConfig};
use crate::correlator::{CorrelationSet, FindingCorrelator};
use crate::error::AutopsyError;
use crate::findings::Finding;
use crate::paths::{SuspiciousPath, SuspiciousPathRanker};
use crate::patterns::{ExploitHypothesis, PatternClassifier, PatternInput, PatternSettings};
use crate::report::{AnalysisResult, AnalysisStatus};
use crate::roles::{AddressProfile, RoleClassifier, build_profiles};
use crate::value_flow::ValueFlowGraph;

/// Deadline and cancellation for one trace.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    deadline: Instant,
    token: CancellationToken,
}

impl AnalysisContext {
    pub fn new(timeout: Duration, token: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            token,
        }
    }

    pub fn with_deadline(deadline: Instant, token: CancellationToken) -> Self {
        Self { deadline, token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Fail if the trace was cancelled or its deadline has passed.
    pub fn check(&self, stage: &'static str) -> Result<(), AutopsyError> {
        if self.token.is_cancelled() {
            return Err(AutopsyError::Cancelled { stage });
        }
        if self.is_expired() {
            return Err(AutopsyError::TimeoutExceeded { stage });
        }
        Ok(())
    }

    /// Whether the deadline has passed. Cancellation is still an error.
    pub fn deadline_reached(&self, stage: &'static str) -> Result<bool, AutopsyError> {
        if self.token.is_cancelled() {
            return Err(AutopsyError::Cancelled { stage });
        }
        Ok(self.is_expired())
    }
}

/// Intermediate state after roles are assigned.
#[derive(Debug, Clone)]
pub struct Attributed {
    pub graph: ValueFlowGraph,
    pub correlations: CorrelationSet,
    pub profiles: Vec<AddressProfile>,
    /// Stage whose deadline check failed; later stages were skipped.
    pub stopped_at: Option<&'static str>,
}

impl Attributed {
    fn stopped(stage: &'static str, graph: ValueFlowGraph, correlations: CorrelationSet) -> Self {
        Self {
            graph,
            correlations,
            profiles: Vec::new(),
            stopped_at: Some(stage),
        }
    }
}

/// Compiled configuration, shared read-only by every trace of a run.
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: AutopsyConfig,
    builder: CallTreeBuilder,
    settings: PatternSettings,
    pool: Arc<rayon::ThreadPool>,
}

impl Analyzer {
    pub fn new(config: AutopsyConfig) -> Result<Self, AutopsyError> {
        config.validate().map_err(AutopsyError::Config)?;
        let settings = PatternSettings::from_config(&config)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency)
            .stack_size(worker_stack_size(config.max_call_depth))
            .thread_name(|i| format!("autopsy-worker-{i}"))
            .build()
            .map_err(|e| AutopsyError::Config(format!("worker pool: {e}")))?;
        Ok(Self {
            builder: CallTreeBuilder::new(config.max_call_depth),
            settings,
            config,
            pool: Arc::new(pool),
        })
    }

    /// Run `op` on the analyzer's worker pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    pub fn config(&self) -> &AutopsyConfig {
        &self.config
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.settings.registry
    }

    pub fn trace_builder(&self) -> &CallTreeBuilder {
        &self.builder
    }

    /// A fresh context using the configured timeout.
    pub fn context(&self, token: CancellationToken) -> AnalysisContext {
        AnalysisContext::new(Duration::from_millis(self.config.analysis_timeout_ms), token)
    }

    /// Parse and analyze one trace envelope.
    pub fn analyze_json(
        &self,
        trace_json: &str,
        findings: &[Finding],
        ctx: &AnalysisContext,
    ) -> Result<AnalysisResult, AutopsyError> {
        self.install(|| {
            let trace = self.builder.from_json(trace_json)?;
            self.analyze_trace(&trace, findings, ctx)
        })
    }

    /// Like [`Self::analyze_json`], for an envelope that is already decoded.
    pub fn analyze_value(
        &self,
        envelope: Value,
        findings: &[Finding],
        ctx: &AnalysisContext,
    ) -> Result<AnalysisResult, AutopsyError> {
        self.install(|| {
            let trace = self.builder.from_value(envelope)?;
            self.analyze_trace(&trace, findings, ctx)
        })
    }

    pub fn analyze_trace(
        &self,
        trace: &TransactionTrace,
        findings: &[Finding],
        ctx: &AnalysisContext,
    ) -> Result<AnalysisResult, AutopsyError> {
        self.install(|| {
            let attributed = self.attribute(trace, findings, ctx)?;
            self.classify(trace, findings, attributed, ctx)
        })
    }

    /// Everything up to and including role assignment.
    ///
    /// A deadline hit here stops early and records the stage in
    /// [`Attributed::stopped_at`].
    pub fn attribute(
        &self,
        trace: &TransactionTrace,
        findings: &[Finding],
        ctx: &AnalysisContext,
    ) -> Result<Attributed, AutopsyError> {
        if ctx.deadline_reached("value-flow")? {
            return Ok(Attributed::stopped(
                "value-flow",
                ValueFlowGraph::default(),
                CorrelationSet::default(),
            ));
        }
        let started = Instant::now();
        let limits = self.config.path_limits();
        let (flow, correlations) = rayon::join(
            || -> Result<_, AutopsyError> {
                let graph = ValueFlowGraph::build(trace, limits);
                graph.reconcile(trace)?;
                let profiles = build_profiles(trace, &graph);
                Ok((graph, profiles))
            },
            || FindingCorrelator::new(findings).correlate(trace),
        );
        let (graph, profiles) = flow?;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            edges = graph.edges().len(),
            correlated = correlations.len(),
            "value flow and correlation finished"
        );

        if ctx.deadline_reached("roles")? {
            return Ok(Attributed::stopped("roles", graph, correlations));
        }
        let classifier =
            RoleClassifier::new(&self.settings.registry, self.config.large_transfer_ratio);
        let profiles = classifier.classify(trace, &graph, findings, &correlations, profiles)?;
        Ok(Attributed {
            graph,
            correlations,
            profiles,
            stopped_at: None,
        })
    }

    /// Path ranking and pattern matching. A deadline hit here yields an
    /// incomplete result.
    pub fn classify(
        &self,
        trace: &TransactionTrace,
        findings: &[Finding],
        attributed: Attributed,
        ctx: &AnalysisContext,
    ) -> Result<AnalysisResult, AutopsyError> {
        let Attributed {
            graph,
            correlations,
            profiles,
            stopped_at,
        } = attributed;

        if let Some(stage) = stopped_at {
            warn!(
                tx = %format!("{:#x}", trace.hash),
                stage,
                edges = graph.edges().len(),
                "deadline reached before roles were assigned, returning partial result"
            );
            let status = AnalysisStatus::Incomplete {
                stage: stage.to_string(),
            };
            return Ok(self.assemble(
                trace,
                findings,
                status,
                profiles,
                &graph,
                &correlations,
                Vec::new(),
                Vec::new(),
            ));
        }

        let suspicious_paths = SuspiciousPathRanker::new(&self.config.path_ranking).rank(trace);
        let input = PatternInput::new(
            trace,
            &graph,
            findings,
            &correlations,
            &profiles,
            &self.settings,
        );
        let outcome = PatternClassifier::classify(&input, ctx)?;
        let status = if outcome.interrupted {
            warn!(
                tx = %format!("{:#x}", trace.hash),
                hypotheses = outcome.hypotheses.len(),
                "deadline reached during pattern matching, returning partial result"
            );
            AnalysisStatus::Incomplete {
                stage: "patterns".to_string(),
            }
        } else {
            AnalysisStatus::Complete
        };

        Ok(self.assemble(
            trace,
            findings,
            status,
            profiles,
            &graph,
            &correlations,
            outcome.hypotheses,
            suspicious_paths,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        trace: &TransactionTrace,
        findings: &[Finding],
        status: AnalysisStatus,
        profiles: Vec<AddressProfile>,
        graph: &ValueFlowGraph,
        correlations: &CorrelationSet,
        hypotheses: Vec<ExploitHypothesis>,
        suspicious_paths: Vec<SuspiciousPath>,
    ) -> AnalysisResult {
        let uncorrelated = correlations
            .uncorrelated()
            .iter()
            .filter_map(|&i| findings.get(i).cloned())
            .collect();
        AnalysisResult::build(
            trace,
            status,
            profiles,
            graph,
            hypotheses,
            findings.to_vec(),
            uncorrelated,
            suspicious_paths,
        )
    }
}

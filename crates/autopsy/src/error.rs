//! Error types for the autopsy engine.

use ethereum_types::Address;

use crate::types::{Asset, CallId, SignedAmount};

#[derive(Debug, thiserror::Error)]
pub enum AutopsyError {
    /// Unbalanced nesting, missing required fields, undecodable values.
    #[error("Malformed trace: {reason}")]
    MalformedTrace { reason: String },

    #[error("Call {call_id} is a successful create without a created address")]
    MissingCreatedAddress { call_id: CallId },

    /// The edge view and the call view disagree. Always a parsing defect.
    #[error(
        "Value conservation violated for {address:#x} ({asset}): edges give {from_edges}, calls give {from_calls}"
    )]
    ValueConservation {
        address: Address,
        asset: Asset,
        from_edges: SignedAmount,
        from_calls: SignedAmount,
    },

    /// Role rules produced an inconsistent assignment. Indicates a logic defect.
    #[error("Classifier invariant violated: {reason}")]
    ClassifierInvariantViolation { reason: String },

    #[error("Analysis deadline exceeded during {stage}")]
    TimeoutExceeded { stage: &'static str },

    #[error("Analysis cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid finding: {0}")]
    Finding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AutopsyError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        AutopsyError::MalformedTrace {
            reason: reason.into(),
        }
    }

    /// Whether this error only invalidates the trace it came from.
    ///
    /// Invariant violations are logic defects and must abort the whole run.
    pub fn is_per_trace(&self) -> bool {
        !matches!(self, AutopsyError::ClassifierInvariantViolation { .. })
    }
}

//! Wire shapes of the supported trace serializations.
//!
//! Everything is optional at this layer; required-field checks happen in the
//! builder so that errors name the offending call.

use serde::Deserialize;
use serde_json::Value;

/// Transaction envelope wrapping either trace shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawEnvelope {
    #[serde(alias = "txHash", alias = "transactionHash")]
    pub hash: Option<String>,
    pub block_number: Option<Value>,
    pub origin: Option<String>,
    /// A nested frame object or a flat parity array.
    #[serde(alias = "result", alias = "callTrace", alias = "calls")]
    pub trace: Option<Value>,
    #[serde(default)]
    pub ownership: Vec<RawOwnership>,
    #[serde(default)]
    pub token_transfers: Vec<RawTokenTransfer>,
}

/// geth `callTracer` frame.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawFrame {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<Value>,
    pub gas_used: Option<Value>,
    pub input: Option<String>,
    pub error: Option<String>,
    #[serde(alias = "address")]
    pub created_address: Option<String>,
    #[serde(alias = "method", alias = "functionName")]
    pub function: Option<String>,
    #[serde(default)]
    pub calls: Vec<RawFrame>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawLog {
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub data: Option<String>,
}

/// One record of a parity `trace_transaction` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawParityTrace {
    pub action: RawParityAction,
    pub result: Option<RawParityResult>,
    pub error: Option<String>,
    pub subtraces: usize,
    pub trace_address: Vec<usize>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawParityAction {
    pub call_type: Option<String>,
    pub creation_method: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<Value>,
    #[serde(alias = "init")]
    pub input: Option<String>,
    /// Self-destructing contract.
    pub address: Option<String>,
    pub refund_address: Option<String>,
    pub balance: Option<Value>,
    #[serde(alias = "method")]
    pub function: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawParityResult {
    pub gas_used: Option<Value>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOwnership {
    pub contract: String,
    pub owner: String,
    #[serde(default = "default_relation")]
    pub relation: String,
}

fn default_relation() -> String {
    "admin".to_string()
}

/// Pre-decoded token transfer, attributed to a call by pre-order index.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawTokenTransfer {
    pub token: String,
    pub from: String,
    pub to: String,
    pub amount: Value,
    #[serde(alias = "callId")]
    pub call_index: usize,
}

impl RawParityTrace {
    /// Convert a flat record into a childless frame.
    pub(crate) fn into_frame(self) -> RawFrame {
        let action = self.action;
        let result = self.result.unwrap_or_default();
        let kind = match self.kind.to_ascii_lowercase().as_str() {
            "call" => action.call_type.clone().unwrap_or_else(|| "call".into()),
            "create" => action
                .creation_method
                .clone()
                .unwrap_or_else(|| "create".into()),
            "suicide" | "selfdestruct" => "selfdestruct".into(),
            other => other.to_string(),
        };
        let is_selfdestruct = kind == "selfdestruct";
        RawFrame {
            kind: Some(kind),
            from: if is_selfdestruct {
                action.address.or(action.from)
            } else {
                action.from
            },
            to: if is_selfdestruct {
                action.refund_address.or(action.to)
            } else {
                action.to
            },
            value: if is_selfdestruct {
                action.balance.or(action.value)
            } else {
                action.value
            },
            gas_used: result.gas_used,
            input: action.input,
            error: self.error,
            created_address: result.address,
            function: action.function,
            calls: Vec::new(),
            logs: Vec::new(),
        }
    }
}

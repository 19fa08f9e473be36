//! Lowers raw trace JSON into a [`TransactionTrace`].

use ethereum_types::{Address, H256, U256};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::AutopsyError;
use crate::selectors::{TRANSFER_TOPIC, known_name};
use crate::types::{
    CallId, Selector, decode_hex, parse_address, parse_json_unbounded, parse_quantity,
    parse_u64_quantity,
};

use super::raw::{RawEnvelope, RawFrame, RawLog, RawOwnership, RawParityTrace};
use super::{
    CallKind, CallNode, OwnershipRecord, OwnershipRelation, TokenTransferLog, TransactionTrace,
};

/// EVM call depth limit, and the largest `maxCallDepth` accepted.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

const BASE_STACK_BYTES: usize = 8 * 1024 * 1024;
/// JSON decoding, lowering and teardown each recurse once per call level.
const STACK_BYTES_PER_CALL_LEVEL: usize = 32 * 1024;

/// Worker stack size needed to parse and analyze traces `max_call_depth` deep.
pub fn worker_stack_size(max_call_depth: usize) -> usize {
    BASE_STACK_BYTES.saturating_add(max_call_depth.saturating_mul(STACK_BYTES_PER_CALL_LEVEL))
}

/// Stateless trace parser, parameterized by the depth limit.
#[derive(Debug, Clone, Copy)]
pub struct CallTreeBuilder {
    max_call_depth: usize,
}

impl Default for CallTreeBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_DEPTH)
    }
}

impl CallTreeBuilder {
    pub fn new(max_call_depth: usize) -> Self {
        Self { max_call_depth }
    }

    /// Parse an envelope string. Nesting is bounded by `max_call_depth`, not by
    /// the JSON decoder, so run this on a stack from [`worker_stack_size`].
    pub fn from_json(&self, json: &str) -> Result<TransactionTrace, AutopsyError> {
        let value: Value = parse_json_unbounded(json)
            .map_err(|e| AutopsyError::malformed(format!("invalid JSON: {e}")))?;
        self.from_value(value)
    }

    /// Build a trace from an envelope holding a nested frame or flat parity records.
    pub fn from_value(&self, value: Value) -> Result<TransactionTrace, AutopsyError> {
        let envelope: RawEnvelope = serde_json::from_value(value)
            .map_err(|e| AutopsyError::malformed(format!("envelope: {e}")))?;

        let hash = envelope
            .hash
            .as_deref()
            .ok_or_else(|| AutopsyError::malformed("missing transaction hash"))
            .and_then(|s| parse_h256(s).map_err(AutopsyError::malformed))?;
        let block_number = envelope
            .block_number
            .as_ref()
            .ok_or_else(|| AutopsyError::malformed("missing blockNumber"))
            .and_then(|v| {
                parse_u64_quantity(v)
                    .map_err(|e| AutopsyError::malformed(format!("blockNumber: {e}")))
            })?;

        let root_frame = match envelope.trace {
            Some(value @ Value::Object(_)) => serde_json::from_value::<RawFrame>(value)
                .map_err(|e| AutopsyError::malformed(format!("call frame: {e}")))?,
            Some(value @ Value::Array(_)) => {
                let records: Vec<RawParityTrace> = serde_json::from_value(value)
                    .map_err(|e| AutopsyError::malformed(format!("parity record: {e}")))?;
                rebuild_parity(records, self.max_call_depth)?
            }
            Some(other) => {
                return Err(AutopsyError::malformed(format!(
                    "trace must be an object or an array, got {other}"
                )));
            }
            None => return Err(AutopsyError::malformed("missing trace")),
        };

        let mut lowering = Lowering {
            next_id: 0,
            effective: Vec::new(),
            max_call_depth: self.max_call_depth,
        };
        let mut root = lowering.lower(root_frame, 0, None, true)?;

        for transfer in envelope.token_transfers {
            let call_id = CallId(transfer.call_index);
            let log = TokenTransferLog {
                token: address_field(&transfer.token, call_id, "token")?,
                from: address_field(&transfer.from, call_id, "from")?,
                to: address_field(&transfer.to, call_id, "to")?,
                amount: parse_quantity(&transfer.amount).map_err(|e| {
                    AutopsyError::malformed(format!("token transfer at {call_id}: {e}"))
                })?,
            };
            let node = root.find_mut(call_id).ok_or_else(|| {
                AutopsyError::malformed(format!("token transfer references unknown call {call_id}"))
            })?;
            node.logs.push(log);
        }

        let origin = match envelope.origin.as_deref() {
            Some(raw) => parse_address(raw)
                .map_err(|e| AutopsyError::malformed(format!("origin: {e}")))?,
            None => root.from,
        };
        if origin != root.from {
            debug!(
                origin = %format!("{origin:#x}"),
                root_from = %format!("{:#x}", root.from),
                "transaction origin differs from root caller"
            );
        }

        let ownership = envelope
            .ownership
            .iter()
            .map(parse_ownership)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            tx = %format!("{hash:#x}"),
            calls = root.subtree_size,
            "call tree built"
        );

        Ok(TransactionTrace::new(
            hash,
            block_number,
            origin,
            root,
            ownership,
            lowering.effective,
        ))
    }
}

struct Lowering {
    next_id: usize,
    effective: Vec<bool>,
    max_call_depth: usize,
}

impl Lowering {
    fn lower(
        &mut self,
        raw: RawFrame,
        depth: usize,
        parent: Option<CallId>,
        parent_effective: bool,
    ) -> Result<CallNode, AutopsyError> {
        if depth > self.max_call_depth {
            return Err(AutopsyError::malformed(format!(
                "call depth {depth} exceeds limit {}",
                self.max_call_depth
            )));
        }
        let id = CallId(self.next_id);
        self.next_id += 1;

        let kind_raw = raw
            .kind
            .as_deref()
            .ok_or_else(|| AutopsyError::malformed(format!("call {id} has no type")))?;
        let kind = CallKind::from_trace_type(kind_raw).ok_or_else(|| {
            AutopsyError::malformed(format!("call {id} has unknown type '{kind_raw}'"))
        })?;
        let from = required_address(raw.from.as_deref(), id, "from")?;
        let value = match &raw.value {
            Some(v) => parse_quantity(v).map_err(|e| field_error(id, "value", e))?,
            None => U256::zero(),
        };
        let gas_used = match &raw.gas_used {
            Some(v) => parse_u64_quantity(v).map_err(|e| field_error(id, "gasUsed", e))?,
            None => 0,
        };
        let input = match raw.input.as_deref() {
            Some(s) => decode_hex(s).map_err(|e| field_error(id, "input", e))?,
            None => Vec::new(),
        };
        let error = raw.error.filter(|e| !e.trim().is_empty());
        let succeeded = error.is_none();
        let effective = parent_effective && succeeded;
        self.effective.push(effective);

        let (to, created_address, input_selector) = if kind.is_create() {
            // callTracer reports the created address in `to`.
            let explicit = raw.created_address.as_deref().or(raw.to.as_deref());
            let created = explicit
                .map(|s| parse_address(s).map_err(|e| field_error(id, "createdAddress", e)))
                .transpose()?
                .filter(|a| !a.is_zero());
            if succeeded && created.is_none() {
                return Err(AutopsyError::MissingCreatedAddress { call_id: id });
            }
            let created = if succeeded { created } else { None };
            (created, created, None)
        } else {
            let to = required_address(raw.to.as_deref(), id, "to")?;
            let selector = match kind {
                CallKind::SelfDestruct => None,
                _ => Selector::from_input(&input),
            };
            (Some(to), None, selector)
        };

        let function_name = raw
            .function
            .filter(|f| !f.trim().is_empty())
            .or_else(|| input_selector.and_then(known_name).map(str::to_string));

        let mut logs = Vec::new();
        for raw_log in &raw.logs {
            if let Some(log) = decode_transfer(raw_log, to)
                .map_err(|e| AutopsyError::malformed(format!("log in call {id}: {e}")))?
            {
                logs.push(log);
            }
        }

        let mut children = Vec::with_capacity(raw.calls.len());
        for child in raw.calls {
            children.push(self.lower(child, depth + 1, Some(id), effective)?);
        }

        Ok(CallNode {
            id,
            kind,
            from,
            to,
            value,
            input,
            input_selector,
            function_name,
            succeeded,
            error,
            gas_used,
            depth,
            parent,
            subtree_size: self.next_id - id.0,
            created_address,
            logs,
            children,
        })
    }
}

/// Decode an ERC-20 `Transfer(address,address,uint256)` log. Other logs yield `None`.
fn decode_transfer(
    log: &RawLog,
    emitter: Option<Address>,
) -> Result<Option<TokenTransferLog>, String> {
    if log.topics.len() != 3 {
        return Ok(None);
    }
    let topic0 = decode_hex(&log.topics[0])?;
    if topic0.as_slice() != TRANSFER_TOPIC.as_bytes() {
        return Ok(None);
    }
    let token = match log.address.as_deref() {
        Some(raw) => parse_address(raw)?,
        None => emitter.ok_or("transfer log without emitting address")?,
    };
    let from = address_from_topic(&log.topics[1])?;
    let to = address_from_topic(&log.topics[2])?;
    let data = decode_hex(log.data.as_deref().unwrap_or("0x"))?;
    let word = data
        .get(..32)
        .ok_or_else(|| format!("transfer data is {} bytes, expected 32", data.len()))?;
    Ok(Some(TokenTransferLog {
        token,
        from,
        to,
        amount: U256::from_big_endian(word),
    }))
}

fn address_from_topic(topic: &str) -> Result<Address, String> {
    let bytes = decode_hex(topic)?;
    if bytes.len() != 32 {
        return Err(format!("topic '{topic}' is not 32 bytes"));
    }
    Ok(Address::from_slice(&bytes[12..]))
}

/// Rebuild a nested frame from flat parity records.
///
/// Every record must declare exactly as many `subtraces` as there are records
/// nested directly under its `traceAddress`, numbered from zero.
fn rebuild_parity(
    records: Vec<RawParityTrace>,
    max_call_depth: usize,
) -> Result<RawFrame, AutopsyError> {
    if records.is_empty() {
        return Err(AutopsyError::malformed("empty parity trace"));
    }
    let mut index: FxHashMap<Vec<usize>, usize> = FxHashMap::default();
    let mut declared = Vec::with_capacity(records.len());
    let mut paths = Vec::with_capacity(records.len());
    let mut frames = Vec::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
        let path = record.trace_address.clone();
        if path.len() > max_call_depth {
            return Err(AutopsyError::malformed(format!(
                "traceAddress {path:?} exceeds depth limit {max_call_depth}"
            )));
        }
        if index.insert(path.clone(), i).is_some() {
            return Err(AutopsyError::malformed(format!(
                "duplicate traceAddress {path:?}"
            )));
        }
        declared.push(record.subtraces);
        paths.push(path);
        frames.push(Some(record.into_frame()));
    }

    let root = *index
        .get(&Vec::new())
        .ok_or_else(|| AutopsyError::malformed("parity trace has no root record"))?;

    let mut children: Vec<Vec<(usize, usize)>> = vec![Vec::new(); frames.len()];
    for (i, path) in paths.iter().enumerate() {
        let Some((&position, parent_path)) = path.split_last() else {
            continue;
        };
        let parent = *index.get(parent_path).ok_or_else(|| {
            AutopsyError::malformed(format!("traceAddress {path:?} has no parent record"))
        })?;
        children[parent].push((position, i));
    }

    for (i, kids) in children.iter_mut().enumerate() {
        kids.sort_unstable();
        let numbered = kids
            .iter()
            .enumerate()
            .all(|(expected, &(position, _))| position == expected);
        if kids.len() != declared[i] || !numbered {
            return Err(AutopsyError::malformed(format!(
                "unbalanced nesting: traceAddress {:?} declares {} subtraces but {} nested records follow",
                paths[i],
                declared[i],
                kids.len()
            )));
        }
    }

    assemble(root, &children, &mut frames)
}

fn assemble(
    i: usize,
    children: &[Vec<(usize, usize)>],
    frames: &mut [Option<RawFrame>],
) -> Result<RawFrame, AutopsyError> {
    let mut frame = frames[i]
        .take()
        .ok_or_else(|| AutopsyError::malformed("parity record reached twice"))?;
    for &(_, child) in &children[i] {
        frame.calls.push(assemble(child, children, frames)?);
    }
    Ok(frame)
}

fn parse_ownership(raw: &RawOwnership) -> Result<OwnershipRecord, AutopsyError> {
    let relation = match raw.relation.to_ascii_lowercase().as_str() {
        "deployer" | "creator" => OwnershipRelation::Deployer,
        "admin" | "owner" => OwnershipRelation::Admin,
        other => {
            return Err(AutopsyError::malformed(format!(
                "unknown ownership relation '{other}'"
            )));
        }
    };
    Ok(OwnershipRecord {
        contract: parse_address(&raw.contract)
            .map_err(|e| AutopsyError::malformed(format!("ownership contract: {e}")))?,
        owner: parse_address(&raw.owner)
            .map_err(|e| AutopsyError::malformed(format!("ownership owner: {e}")))?,
        relation,
    })
}

fn parse_h256(s: &str) -> Result<H256, String> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 32 {
        return Err(format!("hash '{s}' must be 32 bytes, got {}", bytes.len()));
    }
    Ok(H256::from_slice(&bytes))
}

fn required_address(
    raw: Option<&str>,
    id: CallId,
    field: &'static str,
) -> Result<Address, AutopsyError> {
    let raw = raw.ok_or_else(|| {
        AutopsyError::malformed(format!("call {id} is missing required field '{field}'"))
    })?;
    parse_address(raw).map_err(|e| field_error(id, field, e))
}

fn address_field(raw: &str, id: CallId, field: &'static str) -> Result<Address, AutopsyError> {
    parse_address(raw).map_err(|e| field_error(id, field, e))
}

fn field_error(id: CallId, field: &str, cause: String) -> AutopsyError {
    AutopsyError::malformed(format!("call {id} field '{field}': {cause}"))
}

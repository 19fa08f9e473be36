//! Typed call tree built from a transaction's execution trace.
//!
//! Nodes are numbered in pre-order (execution order). Each node records its
//! subtree size, so "is `b` nested inside `a`" is a range check on ids and no
//! node ever needs a pointer to its parent.

mod builder;
mod raw;

pub use builder::{CallTreeBuilder, DEFAULT_MAX_CALL_DEPTH, worker_stack_size};

use ethereum_types::{Address, H256, U256};
use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::{CallId, Selector};

/// EVM-level call flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    #[serde(rename = "CALL")]
    Call,
    #[serde(rename = "CALLCODE")]
    CallCode,
    #[serde(rename = "DELEGATECALL")]
    DelegateCall,
    #[serde(rename = "STATICCALL")]
    StaticCall,
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "CREATE2")]
    Create2,
    #[serde(rename = "SELFDESTRUCT")]
    SelfDestruct,
}

impl CallKind {
    /// Parse the `type` field used by callTracer and parity traces.
    pub fn from_trace_type(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CALL" => Some(CallKind::Call),
            "CALLCODE" => Some(CallKind::CallCode),
            "DELEGATECALL" => Some(CallKind::DelegateCall),
            "STATICCALL" => Some(CallKind::StaticCall),
            "CREATE" => Some(CallKind::Create),
            "CREATE2" => Some(CallKind::Create2),
            "SELFDESTRUCT" | "SUICIDE" => Some(CallKind::SelfDestruct),
            _ => None,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, CallKind::Create | CallKind::Create2)
    }
}

/// An ERC-20 `Transfer` event emitted inside a call frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransferLog {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

/// One EVM-level invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNode {
    pub id: CallId,
    pub kind: CallKind,
    pub from: Address,
    /// For successful creates this is the created address; `None` for failed creates.
    pub to: Option<Address>,
    pub value: U256,
    #[serde(skip)]
    pub input: Vec<u8>,
    pub input_selector: Option<Selector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub gas_used: u64,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<CallId>,
    /// Number of nodes in this subtree, including the node itself.
    pub subtree_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_address: Option<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TokenTransferLog>,
    pub children: Vec<CallNode>,
}

impl CallNode {
    /// Whether `other` lies strictly inside this node's subtree.
    pub fn is_ancestor_of(&self, other: CallId) -> bool {
        other.0 > self.id.0 && other.0 < self.id.0 + self.subtree_size
    }

    /// Whether `other` is this node or lies inside its subtree.
    pub fn contains(&self, other: CallId) -> bool {
        other == self.id || self.is_ancestor_of(other)
    }

    /// Pre-order iterator over this subtree.
    pub fn iter(&self) -> PreOrder<'_> {
        PreOrder { stack: vec![self] }
    }

    pub fn find(&self, id: CallId) -> Option<&CallNode> {
        let mut node = self;
        loop {
            if node.id == id {
                return Some(node);
            }
            if !node.is_ancestor_of(id) {
                return None;
            }
            node = node.children.iter().find(|c| c.contains(id))?;
        }
    }

    pub(crate) fn find_mut(&mut self, id: CallId) -> Option<&mut CallNode> {
        let mut node = self;
        loop {
            if node.id == id {
                return Some(node);
            }
            if !node.is_ancestor_of(id) {
                return None;
            }
            node = node.children.iter_mut().find(|c| c.contains(id))?;
        }
    }

    /// Human-readable `name` or selector for this call.
    pub fn method_label(&self) -> String {
        match (&self.function_name, self.input_selector) {
            (Some(name), _) => crate::selectors::bare_name(name).to_string(),
            (None, Some(selector)) => selector.to_string(),
            (None, None) if self.kind.is_create() => "<create>".to_string(),
            (None, None) => "<fallback>".to_string(),
        }
    }
}

pub struct PreOrder<'a> {
    stack: Vec<&'a CallNode>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a CallNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// How an address controls a contract, as recorded outside the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipRelation {
    Deployer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipRecord {
    pub contract: Address,
    pub owner: Address,
    pub relation: OwnershipRelation,
}

/// A parsed transaction: root call plus metadata. Immutable after construction.
#[derive(Debug, Clone)]
pub struct TransactionTrace {
    pub hash: H256,
    pub block_number: u64,
    pub origin: Address,
    pub root: CallNode,
    pub ownership: Vec<OwnershipRecord>,
    /// Per call id: the call and all of its ancestors succeeded.
    effective: Vec<bool>,
    /// Effective creations: created address to (creator, creating call).
    creations: FxHashMap<Address, (Address, CallId)>,
}

impl TransactionTrace {
    pub(crate) fn new(
        hash: H256,
        block_number: u64,
        origin: Address,
        root: CallNode,
        ownership: Vec<OwnershipRecord>,
        effective: Vec<bool>,
    ) -> Self {
        let mut creations = FxHashMap::default();
        for call in root.iter() {
            if let Some(address) = call.created_address {
                if effective.get(call.id.0).copied().unwrap_or(false) {
                    creations.entry(address).or_insert((call.from, call.id));
                }
            }
        }
        Self {
            hash,
            block_number,
            origin,
            root,
            ownership,
            effective,
            creations,
        }
    }

    /// All calls in execution order.
    pub fn calls(&self) -> PreOrder<'_> {
        self.root.iter()
    }

    pub fn call_count(&self) -> usize {
        self.root.subtree_size
    }

    pub fn call(&self, id: CallId) -> Option<&CallNode> {
        self.root.find(id)
    }

    pub fn parent_of(&self, id: CallId) -> Option<&CallNode> {
        self.call(id)?.parent.and_then(|p| self.call(p))
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: CallId) -> Vec<&CallNode> {
        let mut out = Vec::new();
        let mut current = self.call(id).and_then(|c| c.parent);
        while let Some(parent_id) = current {
            let Some(parent) = self.call(parent_id) else {
                break;
            };
            out.push(parent);
            current = parent.parent;
        }
        out
    }

    /// The call and every ancestor succeeded, so its effects were kept.
    pub fn is_effective(&self, id: CallId) -> bool {
        self.effective.get(id.0).copied().unwrap_or(false)
    }

    /// Every address touched by a call, in first-seen order.
    pub fn addresses(&self) -> IndexSet<Address> {
        let mut out = IndexSet::new();
        out.insert(self.origin);
        for call in self.calls() {
            out.insert(call.from);
            if let Some(to) = call.to {
                out.insert(to);
            }
        }
        out
    }

    /// In-trace creator of `address`, if it was deployed by this transaction.
    pub fn created_by(&self, address: Address) -> Option<(Address, CallId)> {
        self.creations.get(&address).copied()
    }

    /// Recorded or in-trace owners of `contract`.
    pub fn owners_of(&self, contract: Address) -> Vec<Address> {
        let mut owners: Vec<Address> = self
            .ownership
            .iter()
            .filter(|r| r.contract == contract)
            .map(|r| r.owner)
            .collect();
        if let Some((creator, _)) = self.created_by(contract) {
            if !owners.contains(&creator) {
                owners.push(creator);
            }
        }
        owners
    }
}

//! Core data model: `TraceEntry`, `SignedRecord`, `AnchorStatus` (spec §3).

use crate::value::Value;
use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fixed 32-byte zero sentinel used as `previousHash` for the first
/// record of any signing chain.
pub const GENESIS: H256 = H256::zero();

/// The components of a secp256k1 signature, in Ethereum's `(v, r, s)` shape.
///
/// Defined here rather than in `signing` (which is gated behind the
/// `signing` feature and pulls in `secp256k1`) since `SignedRecord` carries
/// one unconditionally; `signing` re-exports this type under its own name
/// for code built with the `signing` feature enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub v: u64,
    pub r: H256,
    pub s: H256,
}

/// A captured error thrown by an intercepted method.
///
/// Modeled as a plain struct rather than a trait object, per Design Note §9
/// ("use ... a structured error record for `ErrorInfo`; do not rely on
/// inheritance").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into(), stack: None }
    }
}

/// Either a successful result or a captured error, for a single invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Result(Value),
    Error(ErrorInfo),
}

/// A reified method invocation, built once by the interceptor and never
/// mutated afterwards (spec §3, "Lifecycles").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub id: Uuid,
    pub method: String,
    pub args: Vec<Value>,
    pub outcome: Outcome,
    pub timestamp: i64,
    pub duration_ms: u64,
    pub parent_id: Option<Uuid>,
}

impl TraceEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: impl Into<String>,
        args: Vec<Value>,
        outcome: Outcome,
        timestamp: i64,
        duration_ms: u64,
        parent_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            args,
            outcome,
            timestamp,
            duration_ms,
            parent_id,
        }
    }
}

/// Lifecycle state of a record's anchoring attempt (spec §3, §4.7).
///
/// A small tagged sum, per Design Note §9, rather than a class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Rejected,
    LocalOnly,
}

impl AnchorState {
    /// `true` for the terminal-success and terminal-reject/local states.
    pub fn is_terminal(self) -> bool {
        matches!(self, AnchorState::Confirmed | AnchorState::LocalOnly)
    }

    /// Validate a transition against the graph in spec §4.7.
    ///
    /// This crate takes the strict branch of the Design Note §9 open
    /// question: `update_status` rejects any edge not explicitly listed
    /// below, rather than allowing arbitrary state-to-state moves.
    pub fn validate_transition(from: AnchorState, to: AnchorState) -> bool {
        use AnchorState::*;
        if from == to {
            // Re-persisting the same state (e.g. retry bookkeeping) is always allowed.
            return true;
        }
        match (from, to) {
            (Pending, Submitted) => true,
            (Pending, Failed) => true,
            (Pending, LocalOnly) => true,
            (Submitted, Confirmed) => true,
            (Submitted, Failed) => true,
            (Submitted, LocalOnly) => true,
            (Failed, Submitted) => true,
            (Failed, Rejected) => true,
            (Failed, LocalOnly) => true,
            (Rejected, LocalOnly) => true,
            _ => false,
        }
    }
}

/// Mutable status attached to a `SignedRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorStatus {
    pub state: AnchorState,
    pub retry_count: u32,
    pub tx_id: Option<String>,
    pub block_number: Option<u64>,
    pub confirmed_at: Option<i64>,
    pub last_error: Option<String>,
}

impl AnchorStatus {
    pub fn pending() -> Self {
        Self {
            state: AnchorState::Pending,
            retry_count: 0,
            tx_id: None,
            block_number: None,
            confirmed_at: None,
            last_error: None,
        }
    }
}

/// A `TraceEntry` bound into a signed, hash-chained record (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedRecord {
    pub entry: TraceEntry,
    pub hash: H256,
    pub previous_hash: H256,
    pub signature: Signature,
    pub signer_address: Address,
    pub created_at: i64,
    pub anchor_status: AnchorStatus,
}

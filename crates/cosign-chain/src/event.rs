//! Confirmed-event taxonomy.
//!
//! Every submission resolves into one or more in-block confirmation batches.
//! Each batch names the confirming block and carries the typed events the
//! ledger emitted for that extrinsic, in emission order.

use serde::{Deserialize, Serialize};

use cosign_types::Address;

/// Reference to a confirmed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: u64,
    pub hash: String,
}

/// One extrinsic of a confirmed block body, identified by its call target.
/// The position in the returned list is the extrinsic index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtrinsicRecord {
    pub namespace: String,
    pub operation: String,
}

impl ExtrinsicRecord {
    pub fn new(namespace: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            operation: operation.into(),
        }
    }
}

/// Events the gateway consumes from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainEvent {
    /// The confirmed extrinsic itself failed post-dispatch.
    ExtrinsicFailed { reason: Option<String> },
    /// A new approval round was opened by this submission.
    RoundOpened { shared: Address },
    /// An open round was cancelled.
    RoundCancelled { shared: Address },
    /// The final approval landed and the wrapped call executed.
    RoundExecuted { shared: Address },
    /// A contract-bound resource came into existence.
    ResourceInstantiated { address: Address },
    /// A resource (its account) was destroyed.
    ResourceDestroyed { address: Address },
}

/// One in-block confirmation batch for one submission. Ordering is
/// guaranteed within a submission's stream, not across submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub block: BlockRef,
    pub events: Vec<ChainEvent>,
}

impl Confirmation {
    pub fn new(block: BlockRef, events: Vec<ChainEvent>) -> Self {
        Self { block, events }
    }

    pub fn contains_executed(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, ChainEvent::RoundExecuted { .. }))
    }
}

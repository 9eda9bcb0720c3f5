//! Cosign Ledger Client Abstraction
//!
//! Unified interface to the append-only ledger: call catalog discovery,
//! submit-and-watch with per-submission confirmation streams, one-shot read
//! queries, fee-estimation-only encodings and resource liveness
//! subscriptions. The concrete transport lives outside this workspace; the
//! coordinators only ever see this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use cosign_types::{Address, CallHash, CatalogEntry, Liveness, TimePoint, TypedCall};

pub mod event;
pub mod mock;

pub use event::{BlockRef, ChainEvent, Confirmation, ExtrinsicRecord};
pub use mock::MockLedgerClient;

/// How the local actor's submissions get signed. Resolved once per session;
/// the gateway never touches key material itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningMethod {
    /// Key material held by the process
    LocalKey { seed: String },
    /// Signing delegated to an external custodian session
    ExternalCustodian { session: String },
}

/// The local actor: an identity plus its resolved signing method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub address: Address,
    pub method: SigningMethod,
}

impl Signer {
    pub fn local(address: Address, seed: impl Into<String>) -> Self {
        Self {
            address,
            method: SigningMethod::LocalKey { seed: seed.into() },
        }
    }
}

/// Ephemeral signing metadata for fee-estimation-only encodings: enough to
/// produce bytes bit-identical to a real submission without broadcasting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningInfo {
    pub nonce: u64,
    pub block_hash: String,
    pub genesis_hash: String,
    pub mortality_period: u64,
}

/// An approval round the ledger reports as open for a shared identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRound {
    pub call_hash: CallHash,
    pub time_point: TimePoint,
    pub approvals: Vec<Address>,
}

/// One liveness change notification for a watched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessNotice {
    pub address: Address,
    pub liveness: Liveness,
}

/// Per-submission confirmation stream. Dropping the watch stops further
/// delivery; it does not undo the already-broadcast call.
#[derive(Debug)]
pub struct SubmissionWatch {
    events: mpsc::UnboundedReceiver<Confirmation>,
}

impl SubmissionWatch {
    pub fn new(events: mpsc::UnboundedReceiver<Confirmation>) -> Self {
        Self { events }
    }

    /// Next in-block confirmation for this submission, `None` once the
    /// sender side is gone.
    pub async fn next(&mut self) -> Option<Confirmation> {
        self.events.recv().await
    }
}

#[derive(Error, Debug)]
pub enum ChainError {
    /// The ledger rejected the call outright; nothing was broadcast.
    #[error("submission rejected: {0}")]
    Submission(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("ledger connection lost")]
    Disconnected,
}

/// Unified ledger client trait.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Catalog of remote-callable operations and their parameter lists.
    async fn catalog(&self) -> Result<Vec<CatalogEntry>, ChainError>;

    /// Sign, broadcast and watch a call. Confirmations arrive in order on
    /// the returned per-submission channel.
    async fn submit_and_watch(
        &self,
        call: &TypedCall,
        signer: &Signer,
    ) -> Result<SubmissionWatch, ChainError>;

    /// One-shot read-only query against a resource.
    async fn query(
        &self,
        address: &Address,
        operation: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, ChainError>;

    /// Current signing metadata for `who` (nonce, block hash, mortality).
    async fn signing_info(&self, who: &Address) -> Result<SigningInfo, ChainError>;

    /// Encode `call` exactly as a real submission signed by `who` would be
    /// encoded, without broadcasting anything.
    async fn encode_for_estimate(
        &self,
        call: &TypedCall,
        who: &Address,
        info: &SigningInfo,
    ) -> Result<Vec<u8>, ChainError>;

    /// Extrinsics of a confirmed block, in block order.
    async fn block_body(&self, block: &BlockRef) -> Result<Vec<ExtrinsicRecord>, ChainError>;

    /// Approval rounds currently open for a shared identity.
    async fn pending_rounds(&self, shared: &Address) -> Result<Vec<PendingRound>, ChainError>;

    /// Stored full call bytes for a pending round, if the initiator stored
    /// them.
    async fn call_data(&self, hash: &CallHash) -> Result<Option<Vec<u8>>, ChainError>;

    /// Current liveness of a resource.
    async fn liveness(&self, address: &Address) -> Result<Liveness, ChainError>;

    /// Standing subscription to liveness changes for a resource. Dropping
    /// the receiver ends the subscription.
    async fn subscribe_liveness(
        &self,
        address: &Address,
    ) -> Result<mpsc::UnboundedReceiver<LivenessNotice>, ChainError>;
}

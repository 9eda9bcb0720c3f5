//! Scripted in-memory ledger client.
//!
//! Drives the coordinator and reconciler tests without a live chain: every
//! submission is recorded for inspection, and confirmation batches, block
//! bodies, pending rounds and liveness notices are replayed from scripts
//! queued ahead of time.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use cosign_types::{Address, CallHash, CatalogEntry, Liveness, TypedCall};

use crate::{
    BlockRef, ChainError, ChainEvent, Confirmation, ExtrinsicRecord, LedgerClient,
    LivenessNotice, PendingRound, Signer, SigningInfo, SubmissionWatch,
};

/// A call the mock saw, with the identity that signed it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedCall {
    pub call: TypedCall,
    pub signer: Address,
}

#[derive(Default)]
struct Inner {
    submissions: Vec<SubmittedCall>,
    /// One confirmation script per upcoming submission, consumed in order.
    confirmation_scripts: VecDeque<Vec<Confirmation>>,
    block_bodies: HashMap<String, Vec<ExtrinsicRecord>>,
    pending_rounds: HashMap<Address, Vec<PendingRound>>,
    call_data: HashMap<CallHash, Vec<u8>>,
    liveness: HashMap<Address, Liveness>,
    liveness_scripts: HashMap<Address, Vec<LivenessNotice>>,
    query_results: HashMap<(Address, String), serde_json::Value>,
    /// Per-call results consumed ahead of the fixed `query_results` map.
    query_scripts: HashMap<(Address, String), VecDeque<serde_json::Value>>,
    reject_next: Option<String>,
}

/// Scripted `LedgerClient` for tests.
#[derive(Default)]
pub struct MockLedgerClient {
    catalog: Vec<CatalogEntry>,
    inner: Mutex<Inner>,
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Vec<CatalogEntry>) -> Self {
        Self {
            catalog,
            inner: Mutex::default(),
        }
    }

    /// Queue the confirmation batches the next submission will observe.
    pub fn script_confirmations(&self, confirmations: Vec<Confirmation>) {
        self.lock().confirmation_scripts.push_back(confirmations);
    }

    pub fn set_block_body(&self, block_hash: impl Into<String>, body: Vec<ExtrinsicRecord>) {
        self.lock().block_bodies.insert(block_hash.into(), body);
    }

    pub fn set_pending_rounds(&self, shared: Address, rounds: Vec<PendingRound>) {
        self.lock().pending_rounds.insert(shared, rounds);
    }

    pub fn set_call_data(&self, hash: CallHash, data: Vec<u8>) {
        self.lock().call_data.insert(hash, data);
    }

    pub fn set_liveness(&self, address: Address, liveness: Liveness) {
        self.lock().liveness.insert(address, liveness);
    }

    /// Queue the notices a liveness subscription for `address` will deliver.
    pub fn script_liveness(&self, address: Address, notices: Vec<LivenessNotice>) {
        self.lock().liveness_scripts.insert(address, notices);
    }

    pub fn set_query_result(
        &self,
        address: Address,
        operation: impl Into<String>,
        result: serde_json::Value,
    ) {
        self.lock()
            .query_results
            .insert((address, operation.into()), result);
    }

    /// Queue results for successive `query` calls on one operation, consumed
    /// one per call before `set_query_result` answers apply.
    pub fn script_query_results(
        &self,
        address: Address,
        operation: impl Into<String>,
        results: Vec<serde_json::Value>,
    ) {
        self.lock()
            .query_scripts
            .insert((address, operation.into()), results.into());
    }

    /// Make the next submission fail outright, as if the node rejected it.
    pub fn reject_next_submission(&self, reason: impl Into<String>) {
        self.lock().reject_next = Some(reason.into());
    }

    /// Everything submitted so far, in submission order.
    pub fn submissions(&self) -> Vec<SubmittedCall> {
        self.lock().submissions.clone()
    }

    /// Submissions targeting `namespace.operation`.
    pub fn submissions_of(&self, namespace: &str, operation: &str) -> Vec<SubmittedCall> {
        self.submissions()
            .into_iter()
            .filter(|s| s.call.namespace == namespace && s.call.operation == operation)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock state poisoned")
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn catalog(&self) -> Result<Vec<CatalogEntry>, ChainError> {
        Ok(self.catalog.clone())
    }

    async fn submit_and_watch(
        &self,
        call: &TypedCall,
        signer: &Signer,
    ) -> Result<SubmissionWatch, ChainError> {
        let script = {
            let mut inner = self.lock();
            if let Some(reason) = inner.reject_next.take() {
                return Err(ChainError::Submission(reason));
            }
            tracing::debug!(
                "mock submission #{}: {}.{} by {}",
                inner.submissions.len(),
                call.namespace,
                call.operation,
                signer.address
            );
            inner.submissions.push(SubmittedCall {
                call: call.clone(),
                signer: signer.address.clone(),
            });
            inner.confirmation_scripts.pop_front().unwrap_or_default()
        };

        let (tx, rx) = mpsc::unbounded_channel();
        for confirmation in script {
            let _ = tx.send(confirmation);
        }
        // sender dropped here: queued confirmations drain, then the watch ends
        Ok(SubmissionWatch::new(rx))
    }

    async fn query(
        &self,
        address: &Address,
        operation: &str,
        _args: &[serde_json::Value],
    ) -> Result<serde_json::Value, ChainError> {
        let key = (address.clone(), operation.to_string());
        let mut inner = self.lock();
        if let Some(scripted) = inner.query_scripts.get_mut(&key).and_then(VecDeque::pop_front) {
            return Ok(scripted);
        }
        inner
            .query_results
            .get(&key)
            .cloned()
            .ok_or_else(|| ChainError::Rpc(format!("no mock result for {address}.{operation}")))
    }

    async fn signing_info(&self, _who: &Address) -> Result<SigningInfo, ChainError> {
        Ok(SigningInfo {
            nonce: 7,
            block_hash: "0xmock-block".to_string(),
            genesis_hash: "0xmock-genesis".to_string(),
            mortality_period: 64,
        })
    }

    async fn encode_for_estimate(
        &self,
        call: &TypedCall,
        who: &Address,
        info: &SigningInfo,
    ) -> Result<Vec<u8>, ChainError> {
        // Deterministic stand-in for the real signed encoding.
        let mut encoded = call.encode();
        encoded.extend_from_slice(who.as_str().as_bytes());
        encoded.extend_from_slice(&info.nonce.to_be_bytes());
        encoded.extend_from_slice(info.block_hash.as_bytes());
        Ok(encoded)
    }

    async fn block_body(&self, block: &BlockRef) -> Result<Vec<ExtrinsicRecord>, ChainError> {
        self.lock()
            .block_bodies
            .get(&block.hash)
            .cloned()
            .ok_or_else(|| ChainError::Rpc(format!("no mock body for block {}", block.hash)))
    }

    async fn pending_rounds(&self, shared: &Address) -> Result<Vec<PendingRound>, ChainError> {
        Ok(self
            .lock()
            .pending_rounds
            .get(shared)
            .cloned()
            .unwrap_or_default())
    }

    async fn call_data(&self, hash: &CallHash) -> Result<Option<Vec<u8>>, ChainError> {
        Ok(self.lock().call_data.get(hash).cloned())
    }

    async fn liveness(&self, address: &Address) -> Result<Liveness, ChainError> {
        Ok(self
            .lock()
            .liveness
            .get(address)
            .copied()
            .unwrap_or(Liveness::Unknown))
    }

    async fn subscribe_liveness(
        &self,
        address: &Address,
    ) -> Result<mpsc::UnboundedReceiver<LivenessNotice>, ChainError> {
        let notices = self
            .lock()
            .liveness_scripts
            .remove(address)
            .unwrap_or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        for notice in notices {
            let _ = tx.send(notice);
        }
        Ok(rx)
    }
}

//! Multisig Coordinator
//!
//! Owns the N-of-M approval state machine for privileged calls shared by a
//! fixed participant set. Submissions are funded, broadcast and then driven
//! by the per-submission confirmation stream: confirmations are classified
//! into typed round events and folded through a pure reducer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Context;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use cosign_chain::{
    ChainError, ChainEvent, Confirmation, LedgerClient, Signer, SubmissionWatch,
};
use cosign_types::{
    Address, ApprovalRound, CallArg, CallHash, ParticipantSet, RoundState, TimePoint, TypedCall,
};

/// Base currency unit of the ledger.
pub const ONE_UNIT: u128 = 1_000_000_000_000_000;

/// Minimum balance an account needs to stay alive on the ledger.
pub const EXISTENTIAL_DEPOSIT: u128 = 1_000_000;

/// Stake transferred to the shared identity per participating actor; covers
/// the ledger's existential and multisig storage deposits.
pub const STAKE_PER_PARTICIPANT: u128 = ONE_UNIT + EXISTENTIAL_DEPOSIT;

/// Weight limit attached to co-sign submissions.
pub const MAX_WEIGHT: u64 = 1_000_000_000_000;

const COSIGN_NAMESPACE: &str = "multisig";
const COSIGN_OPERATION: &str = "as_multi";
const CANCEL_OPERATION: &str = "cancel_as_multi";
const FUNDING_NAMESPACE: &str = "balances";
const FUNDING_OPERATION: &str = "transfer_keep_alive";

/// Rounds are addressed by the shared identity and the pending call's hash.
pub type RoundKey = (Address, CallHash);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub stake_per_participant: u128,
    pub max_weight: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stake_per_participant: STAKE_PER_PARTICIPANT,
            max_weight: MAX_WEIGHT,
        }
    }
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("a submission for this round is already in flight")]
    Busy,

    #[error("local identity is not a member of the participant set")]
    NotAParticipant,

    #[error("no open round for this call")]
    NoOpenRound,

    #[error("call data unavailable; cannot approve")]
    MissingCallData,

    #[error("funding transfer failed in block")]
    FundingFailed,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Outcome of `begin`.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// The local actor already approved this call; nothing was submitted.
    AlreadySigned,
    /// The co-sign call went out (opening or joining a round).
    Submitted {
        shared: Address,
        call_hash: CallHash,
    },
}

/// Typed round transition, derived from one confirmation batch. Ledger
/// independent, so the reducer stays unit-testable.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundEvent {
    Failed,
    Opened(TimePoint),
    Cancelled,
    Executed,
    /// The executed call instantiated a resource; no round-state effect,
    /// surfaced as a follow-up for the reconciler.
    Instantiated(Address),
}

/// Plain-data updates pushed to the owning UI.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundUpdate {
    StateChanged {
        shared: Address,
        call_hash: CallHash,
        state: RoundState,
        time_point: Option<TimePoint>,
    },
    ResourceInstantiated {
        address: Address,
    },
}

struct RoundRecord {
    round: ApprovalRound,
    participants: ParticipantSet,
}

type RoundTable = Arc<RwLock<HashMap<RoundKey, RoundRecord>>>;
type InFlightSet = Arc<StdMutex<HashSet<RoundKey>>>;

/// Removes its key from the in-flight set when dropped. Held by the driver
/// task until the submission's first confirmation has been applied.
struct InFlightGuard {
    set: InFlightSet,
    key: RoundKey,
}

impl InFlightGuard {
    fn acquire(set: &InFlightSet, key: &RoundKey) -> Result<Self, CoordinatorError> {
        let mut keys = set.lock().expect("in-flight set poisoned");
        if !keys.insert(key.clone()) {
            return Err(CoordinatorError::Busy);
        }
        Ok(Self {
            set: set.clone(),
            key: key.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.key);
    }
}

/// Coordinator for shared-identity approval rounds.
pub struct MultisigCoordinator<C> {
    client: Arc<C>,
    signer: Signer,
    config: CoordinatorConfig,
    rounds: RoundTable,
    in_flight: InFlightSet,
    updates: mpsc::UnboundedSender<RoundUpdate>,
}

impl<C: LedgerClient + 'static> MultisigCoordinator<C> {
    /// Create a coordinator and the stream of round updates it will feed.
    pub fn new(
        client: Arc<C>,
        signer: Signer,
        config: CoordinatorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RoundUpdate>) {
        let (updates, receiver) = mpsc::unbounded_channel();
        (
            Self {
                client,
                signer,
                config,
                rounds: Arc::new(RwLock::new(HashMap::new())),
                in_flight: Arc::new(StdMutex::new(HashSet::new())),
                updates,
            },
            receiver,
        )
    }

    /// Current snapshot of a round, if one is tracked.
    pub async fn round(&self, shared: &Address, call_hash: &CallHash) -> Option<ApprovalRound> {
        let rounds = self.rounds.read().await;
        rounds
            .get(&(shared.clone(), *call_hash))
            .map(|r| r.round.clone())
    }

    /// Remove and return a round that reached a terminal state, folding it
    /// back to the implicit no-round state. Open rounds stay put.
    pub async fn take_finished(
        &self,
        shared: &Address,
        call_hash: &CallHash,
    ) -> Option<ApprovalRound> {
        let mut rounds = self.rounds.write().await;
        let key = (shared.clone(), *call_hash);
        if rounds.get(&key).map(|r| r.round.state.is_terminal()) == Some(true) {
            rounds.remove(&key).map(|r| r.round)
        } else {
            None
        }
    }

    /// Reconstruct a pending round for `call_hash` from ledger state, as
    /// done when reconnecting to an approval already opened elsewhere. Only
    /// the first listed approver is recorded as the opener; the full
    /// approval list is kept verbatim.
    pub async fn restore(
        &self,
        call_hash: CallHash,
        participants: &ParticipantSet,
    ) -> Result<Option<ApprovalRound>, CoordinatorError> {
        let shared = participants.shared_identity();
        let pending = self.client.pending_rounds(&shared).await?;
        let Some(found) = pending.iter().find(|p| p.call_hash == call_hash) else {
            return Ok(None);
        };

        let mut round = ApprovalRound::open(shared.clone(), call_hash);
        round.time_point = Some(found.time_point);
        round.approvals = found.approvals.clone();
        round.first_approver = found.approvals.first().cloned();
        round.call_data = self.client.call_data(&call_hash).await?;
        info!(
            "restored pending round {} opened by {:?} at {}",
            call_hash, round.first_approver, found.time_point
        );

        let snapshot = round.clone();
        let mut rounds = self.rounds.write().await;
        rounds.insert(
            (shared, call_hash),
            RoundRecord {
                round,
                participants: participants.clone(),
            },
        );
        Ok(Some(snapshot))
    }

    /// Open a new approval round for `call`, or join the already-open one.
    /// Idempotent: if the local actor already approved, nothing is funded or
    /// submitted again.
    pub async fn begin(
        &self,
        call: &TypedCall,
        participants: &ParticipantSet,
    ) -> Result<BeginOutcome, CoordinatorError> {
        if !participants.contains(&self.signer.address) {
            return Err(CoordinatorError::NotAParticipant);
        }

        let shared = participants.shared_identity();
        let call_hash = call.hash();
        let key = (shared.clone(), call_hash);
        let guard = InFlightGuard::acquire(&self.in_flight, &key)?;

        // Discover an existing round: local table first, ledger second. A
        // terminal record still sitting in the table folds back to no-round
        // here, so beginning again restarts the protocol from scratch.
        let known = {
            let mut rounds = self.rounds.write().await;
            match rounds.get(&key) {
                Some(record) if record.round.state.is_terminal() => {
                    rounds.remove(&key);
                    None
                }
                Some(record) => Some(record.round.clone()),
                None => None,
            }
        };
        let known = match known {
            Some(round) => Some(round),
            None => self.restore(call_hash, participants).await?,
        };

        let (time_point, joining) = match &known {
            Some(round) if round.has_approved(&self.signer.address) => {
                info!("already signed round {} for {}", call_hash, shared);
                return Ok(BeginOutcome::AlreadySigned);
            }
            Some(round) => (round.time_point, true),
            None => (None, false),
        };

        // Stake the shared identity and wait for the transfer to reach a
        // block before the co-sign call goes out. Strict ordering.
        self.fund_shared(&shared).await?;

        let call_data = match &known {
            Some(round) => round
                .call_data
                .clone()
                .unwrap_or_else(|| call.encode()),
            None => call.encode(),
        };
        let cosign = self.cosign_call(participants, time_point, &call_data, !joining);
        let watch = self.client.submit_and_watch(&cosign, &self.signer).await?;
        info!(
            "co-sign submitted for {} ({}; {})",
            shared,
            call_hash,
            if joining { "joining" } else { "opening" }
        );

        {
            let mut rounds = self.rounds.write().await;
            let record = rounds.entry(key.clone()).or_insert_with(|| RoundRecord {
                round: ApprovalRound::open(shared.clone(), call_hash),
                participants: participants.clone(),
            });
            record.round.state = RoundState::RoundOpen;
            record.round.time_point = time_point;
            record.round.call_data = Some(call_data);
            if record.round.first_approver.is_none() {
                record.round.first_approver = Some(self.signer.address.clone());
            }
            if !record.round.approvals.contains(&self.signer.address) {
                record.round.approvals.push(self.signer.address.clone());
            }
        }

        self.spawn_driver(key, watch, guard);
        Ok(BeginOutcome::Submitted { shared, call_hash })
    }

    /// Join an open round with the stored call data at its time point.
    pub async fn approve(
        &self,
        shared: &Address,
        call_hash: &CallHash,
    ) -> Result<(), CoordinatorError> {
        let key = (shared.clone(), *call_hash);
        let guard = InFlightGuard::acquire(&self.in_flight, &key)?;

        let (participants, time_point, call_data) = {
            let rounds = self.rounds.read().await;
            let record = rounds.get(&key).ok_or(CoordinatorError::NoOpenRound)?;
            if record.round.state != RoundState::RoundOpen {
                return Err(CoordinatorError::NoOpenRound);
            }
            let time_point = record.round.time_point.ok_or(CoordinatorError::NoOpenRound)?;
            let call_data = record
                .round
                .call_data
                .clone()
                .ok_or(CoordinatorError::MissingCallData)?;
            (record.participants.clone(), time_point, call_data)
        };

        let cosign = self.cosign_call(&participants, Some(time_point), &call_data, false);
        let watch = self.client.submit_and_watch(&cosign, &self.signer).await?;
        info!("approval submitted for {} at {}", call_hash, time_point);

        {
            let mut rounds = self.rounds.write().await;
            if let Some(record) = rounds.get_mut(&key) {
                if !record.round.approvals.contains(&self.signer.address) {
                    record.round.approvals.push(self.signer.address.clone());
                }
            }
        }

        self.spawn_driver(key, watch, guard);
        Ok(())
    }

    /// Cancel an open round. Carries only the call hash, not the data.
    pub async fn cancel(
        &self,
        shared: &Address,
        call_hash: &CallHash,
    ) -> Result<(), CoordinatorError> {
        let key = (shared.clone(), *call_hash);
        let guard = InFlightGuard::acquire(&self.in_flight, &key)?;

        let (participants, time_point) = {
            let rounds = self.rounds.read().await;
            let record = rounds.get(&key).ok_or(CoordinatorError::NoOpenRound)?;
            if record.round.state != RoundState::RoundOpen {
                return Err(CoordinatorError::NoOpenRound);
            }
            let time_point = record.round.time_point.ok_or(CoordinatorError::NoOpenRound)?;
            (record.participants.clone(), time_point)
        };

        let cancel = TypedCall::new(
            COSIGN_NAMESPACE,
            CANCEL_OPERATION,
            vec![
                CallArg::Uint(participants.threshold() as u128),
                others_arg(&participants, &self.signer.address),
                time_point_arg(Some(time_point)),
                CallArg::Text(call_hash.to_string()),
            ],
        );
        let watch = self.client.submit_and_watch(&cancel, &self.signer).await?;
        info!("cancellation submitted for {} at {}", call_hash, time_point);

        self.spawn_driver(key, watch, guard);
        Ok(())
    }

    async fn fund_shared(&self, shared: &Address) -> Result<(), CoordinatorError> {
        let funding = TypedCall::new(
            FUNDING_NAMESPACE,
            FUNDING_OPERATION,
            vec![
                CallArg::Text(shared.to_string()),
                CallArg::Uint(self.config.stake_per_participant),
            ],
        );

        let mut watch = self.client.submit_and_watch(&funding, &self.signer).await?;
        info!(
            "funding {} with {} before co-signing",
            shared, self.config.stake_per_participant
        );

        let confirmation = watch.next().await.ok_or(ChainError::Disconnected)?;
        let failed = confirmation
            .events
            .iter()
            .any(|e| matches!(e, ChainEvent::ExtrinsicFailed { .. }));
        if failed {
            return Err(CoordinatorError::FundingFailed);
        }
        Ok(())
    }

    fn cosign_call(
        &self,
        participants: &ParticipantSet,
        time_point: Option<TimePoint>,
        call_data: &[u8],
        store_call: bool,
    ) -> TypedCall {
        TypedCall::new(
            COSIGN_NAMESPACE,
            COSIGN_OPERATION,
            vec![
                CallArg::Uint(participants.threshold() as u128),
                others_arg(participants, &self.signer.address),
                time_point_arg(time_point),
                CallArg::Text(hex::encode(call_data)),
                CallArg::Bool(store_call),
                CallArg::Uint(self.config.max_weight as u128),
            ],
        )
    }

    fn spawn_driver(&self, key: RoundKey, mut watch: SubmissionWatch, guard: InFlightGuard) {
        let client = self.client.clone();
        let rounds = self.rounds.clone();
        let updates = self.updates.clone();

        tokio::spawn(async move {
            let mut guard = Some(guard);
            while let Some(confirmation) = watch.next().await {
                match classify(client.as_ref(), &confirmation)
                    .await
                    .context("classifying confirmation batch")
                {
                    Ok(events) => apply_events(&rounds, &updates, &key, &events).await,
                    Err(e) => error!("dropping confirmation for {}: {:#}", key.1, e),
                }
                // First confirmation processed: this submission is no longer
                // in flight, the next mutation may proceed.
                guard.take();
            }
        });
    }
}

fn others_arg(participants: &ParticipantSet, local: &Address) -> CallArg {
    CallArg::Vector(
        participants
            .others(local)
            .into_iter()
            .map(|a| CallArg::Text(a.to_string()))
            .collect(),
    )
}

fn time_point_arg(time_point: Option<TimePoint>) -> CallArg {
    match time_point {
        None => CallArg::Absent,
        Some(tp) => CallArg::Vector(vec![
            CallArg::Uint(tp.height as u128),
            CallArg::Uint(tp.index as u128),
        ]),
    }
}

/// Translate one confirmation batch into typed round events.
///
/// The time point of a newly opened round is derived here: the chain assigns
/// the extrinsic index only at confirmation time, so the confirming block
/// body is scanned for the first co-sign extrinsic (ascending index). A
/// batch carrying both a cancellation and an execution keeps the execution.
pub async fn classify<C: LedgerClient>(
    client: &C,
    confirmation: &Confirmation,
) -> Result<Vec<RoundEvent>, ChainError> {
    let executed = confirmation.contains_executed();
    let mut events = Vec::new();

    for event in &confirmation.events {
        match event {
            ChainEvent::ExtrinsicFailed { reason } => {
                warn!("extrinsic failed in block {}: {:?}", confirmation.block.height, reason);
                events.push(RoundEvent::Failed);
            }
            ChainEvent::RoundOpened { .. } => {
                let body = client.block_body(&confirmation.block).await?;
                let index = body
                    .iter()
                    .position(|ex| {
                        ex.namespace == COSIGN_NAMESPACE && ex.operation == COSIGN_OPERATION
                    })
                    .unwrap_or(0) as u32;
                events.push(RoundEvent::Opened(TimePoint {
                    height: confirmation.block.height,
                    index,
                }));
            }
            ChainEvent::RoundCancelled { .. } => {
                if executed {
                    warn!(
                        "cancellation and execution in one batch at block {}; keeping execution",
                        confirmation.block.height
                    );
                } else {
                    events.push(RoundEvent::Cancelled);
                }
            }
            ChainEvent::RoundExecuted { .. } => events.push(RoundEvent::Executed),
            ChainEvent::ResourceInstantiated { address } => {
                events.push(RoundEvent::Instantiated(address.clone()));
            }
            // Destruction is the reconciler's concern, delivered through its
            // own liveness subscription.
            ChainEvent::ResourceDestroyed { .. } => {}
        }
    }

    Ok(events)
}

/// Pure reducer: fold one round event into a round record.
pub fn reduce(mut round: ApprovalRound, event: &RoundEvent) -> ApprovalRound {
    match event {
        RoundEvent::Failed => {
            round.state = RoundState::Failed;
            round.time_point = None;
        }
        RoundEvent::Opened(tp) => {
            round.state = RoundState::RoundOpen;
            round.time_point = Some(*tp);
        }
        RoundEvent::Cancelled => {
            round.state = RoundState::Cancelled;
            round.time_point = None;
        }
        RoundEvent::Executed => {
            round.state = RoundState::Executed;
            round.time_point = None;
        }
        RoundEvent::Instantiated(_) => {}
    }
    round
}

async fn apply_events(
    rounds: &RoundTable,
    updates: &mpsc::UnboundedSender<RoundUpdate>,
    key: &RoundKey,
    events: &[RoundEvent],
) {
    for event in events {
        if let RoundEvent::Instantiated(address) = event {
            info!("resource instantiated at {}", address);
            let _ = updates.send(RoundUpdate::ResourceInstantiated {
                address: address.clone(),
            });
            continue;
        }

        let mut table = rounds.write().await;
        let Some(record) = table.get_mut(key) else {
            continue;
        };
        let before = (record.round.state, record.round.time_point);
        record.round = reduce(record.round.clone(), event);

        if record.round.state == RoundState::Failed {
            warn!(
                "round {} failed; the stake transferred to {} is not recovered automatically",
                key.1, key.0
            );
        }
        let after = (record.round.state, record.round.time_point);
        if before != after {
            let _ = updates.send(RoundUpdate::StateChanged {
                shared: key.0.clone(),
                call_hash: key.1,
                state: record.round.state,
                time_point: record.round.time_point,
            });
        }
    }
}

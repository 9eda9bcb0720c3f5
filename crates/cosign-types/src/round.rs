//! Approval round records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Address, CallHash};

/// Coordinate of the submission that opened an approval round: the block
/// height and the index of the opening extrinsic within that block. Assigned
/// by the chain at confirmation time, not at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePoint {
    pub height: u64,
    pub index: u32,
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.height, self.index)
    }
}

/// Lifecycle of an approval round. The absence of a round record is the
/// implicit "no round" state; terminal states fold back to it once observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    RoundOpen,
    Executed,
    Cancelled,
    Failed,
}

impl RoundState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RoundState::RoundOpen)
    }
}

/// One N-of-M approval round for a specific call, owned by the multisig
/// coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRound {
    /// Shared identity this round is gated by
    pub shared: Address,
    /// Digest referencing the pending call
    pub call_hash: CallHash,
    /// Full encoded call, known to the initiator and to later participants
    /// once retrieved from the ledger
    pub call_data: Option<Vec<u8>>,
    /// Set while the round is open on the ledger, cleared on any terminal
    /// transition
    pub time_point: Option<TimePoint>,
    /// Identities that have approved so far, in approval order
    pub approvals: Vec<Address>,
    /// The identity that opened the round
    pub first_approver: Option<Address>,
    pub state: RoundState,
}

impl ApprovalRound {
    pub fn open(shared: Address, call_hash: CallHash) -> Self {
        Self {
            shared,
            call_hash,
            call_data: None,
            time_point: None,
            approvals: Vec::new(),
            first_approver: None,
            state: RoundState::RoundOpen,
        }
    }

    pub fn has_approved(&self, who: &Address) -> bool {
        self.approvals.contains(who) || self.first_approver.as_ref() == Some(who)
    }
}

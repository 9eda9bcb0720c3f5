//! Participant sets and shared-identity derivation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::{derive_shared_identity, Address};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParticipantSetError {
    #[error("a participant set needs at least two members, got {0}")]
    TooFewMembers(usize),

    #[error("threshold {threshold} outside 2..={members}")]
    BadThreshold { threshold: u32, members: usize },
}

/// A fixed set of co-signers. The same set always derives the same shared
/// identity, independent of the order members were supplied in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSet {
    members: BTreeSet<Address>,
    threshold: u32,
}

impl ParticipantSet {
    /// All members must approve (N-of-N).
    pub fn new(members: impl IntoIterator<Item = Address>) -> Result<Self, ParticipantSetError> {
        let members: BTreeSet<Address> = members.into_iter().collect();
        if members.len() < 2 {
            return Err(ParticipantSetError::TooFewMembers(members.len()));
        }
        let threshold = members.len() as u32;
        Ok(Self { members, threshold })
    }

    /// N-of-M variant: `threshold` approvals out of the full member set.
    pub fn with_threshold(
        members: impl IntoIterator<Item = Address>,
        threshold: u32,
    ) -> Result<Self, ParticipantSetError> {
        let set = Self::new(members)?;
        if threshold < 2 || threshold as usize > set.members.len() {
            return Err(ParticipantSetError::BadThreshold {
                threshold,
                members: set.members.len(),
            });
        }
        Ok(Self { threshold, ..set })
    }

    pub fn members(&self) -> impl Iterator<Item = &Address> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn contains(&self, who: &Address) -> bool {
        self.members.contains(who)
    }

    /// Co-signers other than `local`, in canonical order. A co-sign
    /// submission names everyone except its own signer.
    pub fn others(&self, local: &Address) -> Vec<Address> {
        self.members.iter().filter(|m| *m != local).cloned().collect()
    }

    /// Deterministic pseudo-account gating this set's approvals.
    pub fn shared_identity(&self) -> Address {
        derive_shared_identity(&self.members)
    }
}

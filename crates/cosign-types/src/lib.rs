//! Cosign Core Types
//!
//! Data model shared by the call builder, the multisig coordinator and the
//! state reconciler: catalog entries, call drafts, typed calls, participant
//! sets and the records both coordinators own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub mod call;
pub mod participants;
pub mod round;
pub mod resource;

pub use call::{CallArg, CallDraft, CatalogEntry, ParamSpec, TypedCall};
pub use participants::{ParticipantSet, ParticipantSetError};
pub use round::{ApprovalRound, RoundState, TimePoint};
pub use resource::{Liveness, TrackedResource};

/// Opaque ledger address. The gateway never interprets the contents; it only
/// compares, stores and forwards them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Fixed-size digest identifying a pending call compactly. The full encoded
/// bytes travel separately as call data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallHash([u8; 32]);

impl CallHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary encoded call data.
    pub fn digest(data: &[u8]) -> Self {
        use sha3::{Digest, Sha3_256};
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CallHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Derive the deterministic shared identity for a set of member addresses.
/// Members are hashed in sorted order, so any ordering of the same set yields
/// the same pseudo-account.
pub fn derive_shared_identity(members: &BTreeSet<Address>) -> Address {
    use sha3::{Digest, Sha3_256};

    let mut hasher = Sha3_256::new();
    hasher.update(b"cosign-shared-v1");
    for member in members {
        hasher.update((member.as_str().len() as u64).to_be_bytes());
        hasher.update(member.as_str().as_bytes());
    }
    let digest: [u8; 32] = hasher.finalize().into();
    Address::new(format!("0x{}", hex::encode(digest)))
}

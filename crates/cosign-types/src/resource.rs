//! Locally tracked ledger resources.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::Address;

/// Last observed existence state of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liveness {
    Alive,
    Dead,
    Unknown,
}

/// Local binding to a remote, contract-bound resource. Created on successful
/// instantiation and forgotten when the ledger reports it gone. At most one
/// live resource exists per tag-class locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub address: Address,
    pub local_name: String,
    pub tags: BTreeSet<String>,
    pub liveness: Liveness,
}

impl TrackedResource {
    pub fn new<T: Into<String>>(
        address: Address,
        local_name: impl Into<String>,
        tags: impl IntoIterator<Item = T>,
    ) -> Self {
        Self {
            address,
            local_name: local_name.into(),
            tags: tags.into_iter().map(Into::into).collect(),
            liveness: Liveness::Unknown,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

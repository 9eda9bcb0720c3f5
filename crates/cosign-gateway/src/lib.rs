//! Cosign Gateway Library
//!
//! Coordinates privileged calls that need N-of-M approval on an append-only
//! ledger: builds typed calls out of catalog entries and raw user input,
//! previews fees through the pricing oracle, drives the co-signing approval
//! state machine, and reconciles local resource bindings against confirmed
//! ledger events.

pub mod builder;
pub mod coordinator;
pub mod fee;
pub mod oracle;
pub mod reconciler;
pub mod registry;

pub use coordinator::MultisigCoordinator;
pub use fee::FeeEstimator;
pub use reconciler::StateReconciler;
pub use registry::InMemoryRegistry;

//! Event-driven state reconciler.
//!
//! Adopts freshly instantiated resources into the registry, enforces the
//! one-live-resource-per-tag-class rule, and keeps a read snapshot of each
//! watched resource current by re-running its query batch whenever the
//! ledger reports the resource alive.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cosign_chain::{ChainError, LedgerClient, Signer};
use cosign_types::{Address, Liveness, TrackedResource, TypedCall};

use crate::registry::ResourceRegistry;

#[derive(Error, Debug)]
pub enum ReconcilerError {
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// One named read in a watch batch. The result lands in the snapshot under
/// `name`.
#[derive(Debug, Clone)]
pub struct ReadOp {
    pub name: String,
    pub operation: String,
    pub args: Vec<serde_json::Value>,
}

impl ReadOp {
    pub fn new(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation: operation.into(),
            args: Vec::new(),
        }
    }
}

/// Updates delivered by a watch loop. A snapshot is always complete: either
/// every read in the batch succeeded, or no update is sent for that pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilerUpdate {
    Snapshot {
        address: Address,
        values: HashMap<String, serde_json::Value>,
    },
    /// The resource is gone from the ledger and has been forgotten locally.
    /// Final update for this watch.
    Tombstone { address: Address },
}

/// Aborts the watch task on drop unless detached.
pub struct WatchHandle {
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Let the watch outlive this handle.
    pub fn detach(mut self) {
        self.task.take();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Keeps the local registry and read snapshots consistent with the ledger.
pub struct StateReconciler<C, R> {
    client: Arc<C>,
    registry: Arc<R>,
    signer: Signer,
}

impl<C, R> StateReconciler<C, R>
where
    C: LedgerClient + 'static,
    R: ResourceRegistry + 'static,
{
    pub fn new(client: Arc<C>, registry: Arc<R>, signer: Signer) -> Self {
        Self {
            client,
            registry,
            signer,
        }
    }

    /// Adopt a new resource into the registry.
    ///
    /// Any previously tracked resource sharing a tag with the newcomer is
    /// evicted first: if the ledger still reports it alive, `teardown` may
    /// supply a destruction call which is submitted best-effort before the
    /// old entry is forgotten. Eviction failures never block adoption.
    pub async fn adopt<F>(
        &self,
        resource: TrackedResource,
        teardown: F,
    ) -> Result<(), ReconcilerError>
    where
        F: Fn(&Address) -> Option<TypedCall>,
    {
        for tag in resource.tags.clone() {
            for previous in self.registry.by_tag(&tag).await {
                if previous.address == resource.address {
                    continue;
                }
                self.evict(&previous, &teardown).await;
            }
        }

        info!("adopting resource {} ({})", resource.address, resource.local_name);
        self.registry.save(resource).await;
        Ok(())
    }

    async fn evict<F>(&self, previous: &TrackedResource, teardown: &F)
    where
        F: Fn(&Address) -> Option<TypedCall>,
    {
        match self.client.liveness(&previous.address).await {
            Ok(Liveness::Alive) => {
                if let Some(call) = teardown(&previous.address) {
                    info!(
                        "tearing down superseded resource {} ({})",
                        previous.address, previous.local_name
                    );
                    if let Err(e) = self.client.submit_and_watch(&call, &self.signer).await {
                        warn!("teardown submission for {} failed: {}", previous.address, e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("liveness check for {} failed: {}", previous.address, e);
            }
        }
        self.registry.forget(&previous.address).await;
    }

    /// Watch a tracked resource, re-reading the batch on every liveness
    /// notice that reports it alive. Ends with a tombstone once the ledger
    /// reports it dead.
    pub async fn watch(
        &self,
        address: Address,
        reads: Vec<ReadOp>,
    ) -> Result<(WatchHandle, mpsc::UnboundedReceiver<ReconcilerUpdate>), ReconcilerError> {
        let mut notices = self.client.subscribe_liveness(&address).await?;
        let (updates, receiver) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let registry = self.registry.clone();

        let task = tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                match notice.liveness {
                    Liveness::Dead => {
                        info!("resource {} is gone, dropping it", address);
                        registry.forget(&address).await;
                        let _ = updates.send(ReconcilerUpdate::Tombstone {
                            address: address.clone(),
                        });
                        break;
                    }
                    Liveness::Alive => {
                        match run_batch(client.as_ref(), &address, &reads).await {
                            Ok(values) => {
                                let _ = updates.send(ReconcilerUpdate::Snapshot {
                                    address: address.clone(),
                                    values,
                                });
                            }
                            // Partial results are never surfaced; the last
                            // complete snapshot stands until the next pass.
                            Err(e) => warn!("snapshot for {} aborted: {}", address, e),
                        }
                    }
                    Liveness::Unknown => {
                        debug!("indeterminate liveness notice for {}", address);
                    }
                }
            }
        });

        Ok((WatchHandle { task: Some(task) }, receiver))
    }
}

/// Run every read of the batch into one fresh map. Any failure aborts the
/// whole snapshot.
async fn run_batch<C: LedgerClient>(
    client: &C,
    address: &Address,
    reads: &[ReadOp],
) -> Result<HashMap<String, serde_json::Value>, ChainError> {
    let mut values = HashMap::with_capacity(reads.len());
    for read in reads {
        let value = client.query(address, &read.operation, &read.args).await?;
        values.insert(read.name.clone(), value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use cosign_chain::{LivenessNotice, MockLedgerClient};
    use cosign_types::CallArg;
    use serde_json::json;

    fn signer() -> Signer {
        Signer::local(Address::from("alice"), "//Alice")
    }

    fn reconciler(
        client: Arc<MockLedgerClient>,
        registry: Arc<InMemoryRegistry>,
    ) -> StateReconciler<MockLedgerClient, InMemoryRegistry> {
        StateReconciler::new(client, registry, signer())
    }

    fn shipment(address: &str) -> TrackedResource {
        TrackedResource::new(Address::from(address), format!("shipment-{address}"), ["shipment"])
    }

    fn alive(address: &str) -> LivenessNotice {
        LivenessNotice {
            address: Address::from(address),
            liveness: Liveness::Alive,
        }
    }

    fn dead(address: &str) -> LivenessNotice {
        LivenessNotice {
            address: Address::from(address),
            liveness: Liveness::Dead,
        }
    }

    #[tokio::test]
    async fn adoption_evicts_the_previous_resource_of_the_same_tag() {
        // A second shipment contract supersedes the first of the same tag.
        let client = Arc::new(MockLedgerClient::new());
        let registry = Arc::new(InMemoryRegistry::new());
        client.set_liveness(Address::from("0xold"), Liveness::Alive);

        let reconciler = reconciler(client.clone(), registry.clone());
        reconciler.adopt(shipment("0xold"), |_| None).await.unwrap();
        reconciler
            .adopt(shipment("0xnew"), |address| {
                Some(TypedCall::new(
                    "contracts",
                    "call",
                    vec![CallArg::Text(address.to_string()), CallArg::Text("destroy".into())],
                ))
            })
            .await
            .unwrap();

        let entries = registry.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, Address::from("0xnew"));

        // the live predecessor got a teardown call
        let teardowns = client.submissions_of("contracts", "call");
        assert_eq!(teardowns.len(), 1);
        assert!(teardowns[0].call.args.contains(&CallArg::Text("0xold".into())));
    }

    #[tokio::test]
    async fn dead_predecessors_are_forgotten_without_teardown() {
        let client = Arc::new(MockLedgerClient::new());
        let registry = Arc::new(InMemoryRegistry::new());
        client.set_liveness(Address::from("0xold"), Liveness::Dead);

        let reconciler = reconciler(client.clone(), registry.clone());
        reconciler.adopt(shipment("0xold"), |_| None).await.unwrap();
        reconciler
            .adopt(shipment("0xnew"), |address| {
                Some(TypedCall::new(
                    "contracts",
                    "call",
                    vec![CallArg::Text(address.to_string())],
                ))
            })
            .await
            .unwrap();

        assert!(client.submissions().is_empty());
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn adoption_with_disjoint_tags_keeps_both() {
        let client = Arc::new(MockLedgerClient::new());
        let registry = Arc::new(InMemoryRegistry::new());

        let reconciler = reconciler(client, registry.clone());
        reconciler.adopt(shipment("0xship"), |_| None).await.unwrap();
        reconciler
            .adopt(
                TrackedResource::new(Address::from("0xescrow"), "escrow", ["escrow"]),
                |_| None,
            )
            .await
            .unwrap();

        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn alive_notices_produce_complete_snapshots() {
        let client = Arc::new(MockLedgerClient::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let address = Address::from("0xship");

        client.set_query_result(address.clone(), "status", json!("InTransit"));
        client.set_query_result(address.clone(), "holder", json!("bob"));
        client.script_liveness(address.clone(), vec![alive("0xship"), alive("0xship")]);
        registry.save(shipment("0xship")).await;

        let reconciler = reconciler(client.clone(), registry.clone());
        let (handle, mut updates) = reconciler
            .watch(
                address.clone(),
                vec![ReadOp::new("status", "status"), ReadOp::new("holder", "holder")],
            )
            .await
            .unwrap();

        for _ in 0..2 {
            let update = updates.recv().await.unwrap();
            let ReconcilerUpdate::Snapshot { values, .. } = update else {
                panic!("expected a snapshot");
            };
            assert_eq!(values.len(), 2);
            assert_eq!(values["status"], json!("InTransit"));
            assert_eq!(values["holder"], json!("bob"));
        }
        handle.detach();
    }

    #[tokio::test]
    async fn consecutive_snapshots_carry_only_the_latest_values() {
        let client = Arc::new(MockLedgerClient::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let address = Address::from("0xship");

        // The resource changes between the two alive notices; each pass
        // rebuilds the snapshot from scratch, nothing stale leaks through.
        client.script_query_results(
            address.clone(),
            "status",
            vec![json!("InTransit"), json!("Delivered")],
        );
        client.script_query_results(
            address.clone(),
            "holder",
            vec![json!("bob"), json!("carol")],
        );
        client.script_liveness(address.clone(), vec![alive("0xship"), alive("0xship")]);
        registry.save(shipment("0xship")).await;

        let reconciler = reconciler(client, registry);
        let (handle, mut updates) = reconciler
            .watch(
                address.clone(),
                vec![ReadOp::new("status", "status"), ReadOp::new("holder", "holder")],
            )
            .await
            .unwrap();

        let ReconcilerUpdate::Snapshot { values, .. } = updates.recv().await.unwrap() else {
            panic!("expected a snapshot");
        };
        assert_eq!(values["status"], json!("InTransit"));
        assert_eq!(values["holder"], json!("bob"));

        let ReconcilerUpdate::Snapshot { values, .. } = updates.recv().await.unwrap() else {
            panic!("expected a snapshot");
        };
        assert_eq!(values.len(), 2);
        assert_eq!(values["status"], json!("Delivered"));
        assert_eq!(values["holder"], json!("carol"));
        handle.detach();
    }

    #[tokio::test]
    async fn failed_reads_never_surface_a_torn_snapshot() {
        let client = Arc::new(MockLedgerClient::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let address = Address::from("0xship");

        // "holder" has no scripted result: the whole pass is dropped, then
        // the resource dies and the watch tombstones.
        client.set_query_result(address.clone(), "status", json!("InTransit"));
        client.script_liveness(address.clone(), vec![alive("0xship"), dead("0xship")]);
        registry.save(shipment("0xship")).await;

        let reconciler = reconciler(client, registry.clone());
        let (handle, mut updates) = reconciler
            .watch(
                address.clone(),
                vec![ReadOp::new("status", "status"), ReadOp::new("holder", "holder")],
            )
            .await
            .unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update, ReconcilerUpdate::Tombstone { address });
        assert!(updates.recv().await.is_none());
        handle.detach();
    }

    #[tokio::test]
    async fn tombstone_forgets_the_resource_and_ends_the_watch() {
        let client = Arc::new(MockLedgerClient::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let address = Address::from("0xship");

        client.script_liveness(
            address.clone(),
            vec![dead("0xship"), alive("0xship")],
        );
        registry.save(shipment("0xship")).await;

        let reconciler = reconciler(client, registry.clone());
        let (handle, mut updates) = reconciler.watch(address.clone(), Vec::new()).await.unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update, ReconcilerUpdate::Tombstone { address: address.clone() });
        // notices after death are never read
        assert!(updates.recv().await.is_none());
        assert!(registry.get(&address).await.is_none());
        handle.detach();
    }
}

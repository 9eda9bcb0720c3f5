//! Local registry of tracked on-chain resources.
//!
//! A plain keyed store. Which entries may coexist (one live resource per tag
//! class) is the reconciler's policy, not the registry's.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use cosign_types::{Address, TrackedResource};

/// Injected persistence seam for tracked resources.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// Insert or replace the entry for the resource's address.
    async fn save(&self, resource: TrackedResource);

    /// Drop the entry, returning it if one existed.
    async fn forget(&self, address: &Address) -> Option<TrackedResource>;

    async fn get(&self, address: &Address) -> Option<TrackedResource>;

    /// All entries carrying `tag`, in unspecified order.
    async fn by_tag(&self, tag: &str) -> Vec<TrackedResource>;

    async fn list(&self) -> Vec<TrackedResource>;
}

/// Default in-process registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<Address, TrackedResource>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryRegistry {
    async fn save(&self, resource: TrackedResource) {
        info!("tracking resource {} ({})", resource.address, resource.local_name);
        let mut entries = self.entries.write().await;
        entries.insert(resource.address.clone(), resource);
    }

    async fn forget(&self, address: &Address) -> Option<TrackedResource> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(address);
        if removed.is_some() {
            info!("forgot resource {}", address);
        }
        removed
    }

    async fn get(&self, address: &Address) -> Option<TrackedResource> {
        self.entries.read().await.get(address).cloned()
    }

    async fn by_tag(&self, tag: &str) -> Vec<TrackedResource> {
        self.entries
            .read()
            .await
            .values()
            .filter(|r| r.has_tag(tag))
            .cloned()
            .collect()
    }

    async fn list(&self) -> Vec<TrackedResource> {
        self.entries.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipment(address: &str) -> TrackedResource {
        TrackedResource::new(Address::from(address), format!("shipment-{address}"), ["shipment"])
    }

    #[tokio::test]
    async fn save_replaces_by_address() {
        let registry = InMemoryRegistry::new();
        registry.save(shipment("0xaaa")).await;

        let mut renamed = shipment("0xaaa");
        renamed.local_name = "renamed".to_string();
        registry.save(renamed).await;

        let entries = registry.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].local_name, "renamed");
    }

    #[tokio::test]
    async fn by_tag_filters_and_forget_returns_the_entry() {
        let registry = InMemoryRegistry::new();
        registry.save(shipment("0xaaa")).await;
        registry
            .save(TrackedResource::new(Address::from("0xbbb"), "escrow", ["escrow"]))
            .await;

        assert_eq!(registry.by_tag("shipment").await.len(), 1);
        assert_eq!(registry.by_tag("escrow").await.len(), 1);
        assert!(registry.by_tag("missing").await.is_empty());

        let gone = registry.forget(&Address::from("0xaaa")).await.unwrap();
        assert_eq!(gone.address, Address::from("0xaaa"));
        assert!(registry.forget(&Address::from("0xaaa")).await.is_none());
        assert!(registry.by_tag("shipment").await.is_empty());
    }
}

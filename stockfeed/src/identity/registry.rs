//! Bounded registry of recently used identities.

use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

/// Default number of identities remembered.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 50;

#[derive(Debug, Default)]
struct RegistryInner {
    members: HashSet<String>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
}

/// FIFO-evicting set of identities.
///
/// Holds at most `capacity` identities. Adding a new identity at capacity
/// evicts the oldest one; re-adding a present identity changes nothing.
#[derive(Debug)]
pub struct IdentityRegistry {
    capacity: usize,
    inner: Mutex<RegistryInner>,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl IdentityRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add an identity. Returns `true` if it was not already present.
    pub async fn add(&self, identity: &str) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let mut inner = self.inner.lock().await;
        if inner.members.contains(identity) {
            return false;
        }

        while inner.order.len() >= self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.members.remove(&evicted);
                debug!(identity = %evicted, "Evicted identity from registry");
            }
        }

        inner.members.insert(identity.to_string());
        inner.order.push_back(identity.to_string());
        true
    }

    pub async fn contains(&self, identity: &str) -> bool {
        self.inner.lock().await.members.contains(identity)
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    /// Identities in insertion order, oldest first.
    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.lock().await.order.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_and_contains() {
        let registry = IdentityRegistry::new(3);
        assert!(registry.add("1.1.1.1").await);
        assert!(registry.contains("1.1.1.1").await);
        assert!(!registry.contains("2.2.2.2").await);
        assert_eq!(registry.size().await, 1);
    }

    #[tokio::test]
    async fn test_fifo_eviction() {
        let registry = IdentityRegistry::new(3);
        for ip in ["a", "b", "c", "d"] {
            registry.add(ip).await;
        }
        assert_eq!(registry.size().await, 3);
        assert!(!registry.contains("a").await);
        assert_eq!(registry.snapshot().await, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_readd_does_not_refresh_position() {
        let registry = IdentityRegistry::new(2);
        registry.add("a").await;
        registry.add("b").await;
        assert!(!registry.add("a").await);
        registry.add("c").await;

        // "a" was still the oldest entry
        assert!(!registry.contains("a").await);
        assert_eq!(registry.snapshot().await, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let registry = IdentityRegistry::new(5);
        for i in 0..100 {
            registry.add(&format!("10.0.0.{}", i)).await;
            assert!(registry.size().await <= 5);
        }
        assert_eq!(
            registry.snapshot().await,
            vec!["10.0.0.95", "10.0.0.96", "10.0.0.97", "10.0.0.98", "10.0.0.99"]
        );
    }

    #[tokio::test]
    async fn test_zero_capacity_holds_nothing() {
        let registry = IdentityRegistry::new(0);
        assert!(!registry.add("a").await);
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_adds_respect_capacity() {
        let registry = Arc::new(IdentityRegistry::new(10));
        let mut handles = Vec::new();
        for task in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    registry.add(&format!("{}-{}", task, i)).await;
                    registry.contains("0-0").await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.size().await, 10);
        assert_eq!(registry.snapshot().await.len(), 10);
    }
}

//! In-process membership store and backplane.
//!
//! Useful for single-process deployments and for tests that run several
//! instances side by side.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::{Backplane, ClusterMember, ClusterStore};
use crate::error::{EdgeError, EdgeResult};

/// Membership store backed by two hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    members: RwLock<HashMap<String, ClusterMember>>,
    last_active: RwLock<HashMap<String, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn set_member(&self, member: &ClusterMember) -> EdgeResult<()> {
        self.members
            .write()
            .insert(member.server_id().to_string(), member.clone());
        Ok(())
    }

    async fn get_member(&self, server_id: &str) -> EdgeResult<Option<ClusterMember>> {
        Ok(self.members.read().get(server_id).cloned())
    }

    async fn set_last_active(&self, server_id: &str, last_active: i64) -> EdgeResult<()> {
        self.last_active
            .write()
            .insert(server_id.to_string(), last_active);
        Ok(())
    }

    async fn get_active_members(&self, threshold: i64) -> EdgeResult<Vec<ClusterMember>> {
        let members = self.members.read();
        let mut active: Vec<ClusterMember> = self
            .last_active
            .read()
            .iter()
            .filter(|(_, ts)| **ts > threshold)
            .filter_map(|(id, _)| members.get(id).cloned())
            .collect();
        active.sort_by(|a, b| a.server_id().cmp(b.server_id()));
        Ok(active)
    }
}

/// Backplane delivering frames through bounded tokio channels.
#[derive(Debug)]
pub struct MemoryBackplane {
    inboxes: RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl MemoryBackplane {
    pub fn new(capacity: usize) -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryBackplane {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Backplane for MemoryBackplane {
    async fn subscribe(&self, server_id: &str) -> EdgeResult<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.inboxes.write().insert(server_id.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, server_id: &str) {
        self.inboxes.write().remove(server_id);
    }

    async fn publish(&self, target_id: &str, data: Vec<u8>) -> EdgeResult<()> {
        let tx = self
            .inboxes
            .read()
            .get(target_id)
            .cloned()
            .ok_or_else(|| EdgeError::Cluster(format!("no inbox for member '{target_id}'")))?;
        tx.send(data)
            .await
            .map_err(|_| EdgeError::Cluster(format!("inbox of member '{target_id}' is closed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_members_age_out_after_ttl() {
        let store = MemoryStore::new();
        let a = ClusterMember::new("a", vec![]);
        let b = ClusterMember::new("b", vec!["10.0.0.2:80".into()]);
        store.set_member(&a).await.unwrap();
        store.set_member(&b).await.unwrap();
        store.set_last_active("a", 1_000).await.unwrap();
        store.set_last_active("b", 1_500).await.unwrap();

        let ttl = 600;
        // now = 1_599: both heartbeats younger than ttl
        let active = store.get_active_members(1_599 - ttl).await.unwrap();
        assert_eq!(active, vec![a.clone(), b.clone()]);

        // now = 1_600: a's heartbeat is exactly ttl old
        let active = store.get_active_members(1_600 - ttl).await.unwrap();
        assert_eq!(active, vec![b.clone()]);

        // a heartbeats again
        store.set_last_active("a", 1_700).await.unwrap();
        let active = store.get_active_members(1_700 - ttl).await.unwrap();
        assert_eq!(active, vec![a, b]);
    }

    #[tokio::test]
    async fn test_member_without_record_is_skipped() {
        let store = MemoryStore::new();
        assert_ok!(store.set_last_active("ghost", 10).await);
        assert!(assert_ok!(store.get_active_members(0).await).is_empty());
        assert!(assert_ok!(store.get_member("ghost").await).is_none());
    }

    #[tokio::test]
    async fn test_backplane_delivery() {
        let bus = MemoryBackplane::new(4);
        let mut rx = assert_ok!(bus.subscribe("b").await);
        assert_ok!(bus.publish("b", b"hello".to_vec()).await);
        assert_eq!(rx.recv().await.unwrap(), b"hello");

        assert_err!(bus.publish("nobody", vec![]).await);
        bus.unsubscribe("b").await;
        assert_err!(bus.publish("b", vec![]).await);
    }
}

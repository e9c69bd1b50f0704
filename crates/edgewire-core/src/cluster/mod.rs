//! Cluster membership and point-to-point messaging between instances.
//!
//! The core consumes two capabilities:
//!
//! - a [`Cluster`]: who am I, who else is alive, and how to send bytes to a
//!   given member;
//! - a [`ClusterDelegate`] subscription through which the cluster reports
//!   inbound messages, joins, leaves and errors (implemented by the
//!   [`SouthBridge`](crate::bridge::SouthBridge)).
//!
//! [`StoreCluster`] builds a cluster out of a shared [`ClusterStore`]
//! (membership + heartbeat timestamps) and a [`Backplane`] (message delivery).

pub mod memory;
mod store;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::EdgeResult;

pub use memory::{MemoryBackplane, MemoryStore};
pub use store::{DEFAULT_HEARTBEAT, StoreCluster, StoreClusterConfig, now_millis};

/// One addressable instance of the running service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterMember {
    #[serde(rename = "serverID")]
    server_id: String,
    #[serde(rename = "advertisedURLs", default)]
    advertised_urls: Vec<String>,
}

impl ClusterMember {
    pub fn new(server_id: impl Into<String>, advertised_urls: Vec<String>) -> Self {
        Self {
            server_id: server_id.into(),
            advertised_urls,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn advertised_urls(&self) -> &[String] {
        &self.advertised_urls
    }
}

impl fmt::Display for ClusterMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.server_id)
    }
}

/// Receiver of cluster events.
#[async_trait]
pub trait ClusterDelegate: Send + Sync {
    async fn on_message(&self, data: Vec<u8>);

    fn on_join(&self, members: &[String]);

    fn on_leave(&self, members: &[String]);

    fn on_error(&self, err: &crate::error::EdgeError);
}

/// The running cluster as seen by one instance.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn start(&self) -> EdgeResult<()>;

    async fn shutdown(&self) -> EdgeResult<()>;

    fn subscribe(&self, delegate: Arc<dyn ClusterDelegate>);

    /// Sends `data` to the member `target_id`.
    async fn publish(&self, target_id: &str, data: Vec<u8>) -> EdgeResult<()>;

    /// Currently active members, queried fresh on every call.
    async fn members(&self) -> EdgeResult<Vec<ClusterMember>>;

    async fn member_by_id(&self, server_id: &str) -> EdgeResult<ClusterMember>;

    fn me(&self) -> &ClusterMember;
}

/// Shared cluster handle.
pub type BoxedCluster = Arc<dyn Cluster>;

/// Shared membership storage. Externally synchronized.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn set_member(&self, member: &ClusterMember) -> EdgeResult<()>;

    async fn get_member(&self, server_id: &str) -> EdgeResult<Option<ClusterMember>>;

    /// Records the member's last heartbeat (unix millis).
    async fn set_last_active(&self, server_id: &str, last_active: i64) -> EdgeResult<()>;

    /// Members whose last heartbeat is strictly newer than `threshold`.
    async fn get_active_members(&self, threshold: i64) -> EdgeResult<Vec<ClusterMember>>;
}

/// Point-to-point delivery of opaque frames between members.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Opens the inbox of `server_id`.
    async fn subscribe(&self, server_id: &str) -> EdgeResult<mpsc::Receiver<Vec<u8>>>;

    async fn unsubscribe(&self, server_id: &str);

    async fn publish(&self, target_id: &str, data: Vec<u8>) -> EdgeResult<()>;
}

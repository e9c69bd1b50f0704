//! Cluster implementation over a membership store and a message backplane.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Backplane, Cluster, ClusterDelegate, ClusterMember, ClusterStore};
use crate::error::{EdgeError, EdgeResult};

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Current unix time in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Heartbeat and liveness settings of a [`StoreCluster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreClusterConfig {
    /// How often this member refreshes its last-active timestamp.
    pub heartbeat: Duration,
    /// How long a member stays active without a heartbeat.
    pub ttl: Duration,
}

impl StoreClusterConfig {
    /// Heartbeat `heartbeat`, ttl twice that.
    pub fn with_heartbeat(heartbeat: Duration) -> Self {
        Self {
            heartbeat,
            ttl: heartbeat * 2,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Default for StoreClusterConfig {
    fn default() -> Self {
        Self::with_heartbeat(DEFAULT_HEARTBEAT)
    }
}

type DelegateSlot = Arc<RwLock<Option<Arc<dyn ClusterDelegate>>>>;

struct Running {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// A [`Cluster`] whose membership lives in a [`ClusterStore`] and whose
/// messages travel over a [`Backplane`].
///
/// Liveness is heartbeat based: every `heartbeat` the member refreshes its
/// timestamp, and a member counts as active while its timestamp is younger
/// than `ttl`. Membership changes observed between two heartbeats are
/// reported to the delegate as joins and leaves.
pub struct StoreCluster {
    me: ClusterMember,
    store: Arc<dyn ClusterStore>,
    backplane: Arc<dyn Backplane>,
    config: StoreClusterConfig,
    delegate: DelegateSlot,
    running: Mutex<Option<Running>>,
}

impl StoreCluster {
    pub fn new(
        me: ClusterMember,
        store: Arc<dyn ClusterStore>,
        backplane: Arc<dyn Backplane>,
        config: StoreClusterConfig,
    ) -> Self {
        Self {
            me,
            store,
            backplane,
            config,
            delegate: Arc::new(RwLock::new(None)),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> StoreClusterConfig {
        self.config
    }

    fn threshold(ttl: Duration) -> i64 {
        now_millis() - ttl.as_millis() as i64
    }
}

#[async_trait]
impl Cluster for StoreCluster {
    async fn start(&self) -> EdgeResult<()> {
        if self.running.lock().is_some() {
            warn!(server_id = %self.me, "Cluster already started");
            return Ok(());
        }

        let id = self.me.server_id().to_string();
        self.store.set_member(&self.me).await?;
        self.store.set_last_active(&id, now_millis()).await?;
        let known: HashSet<String> = self
            .store
            .get_active_members(Self::threshold(self.config.ttl))
            .await?
            .into_iter()
            .map(|m| m.server_id().to_string())
            .collect();
        let inbox = self.backplane.subscribe(&id).await?;

        let token = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.store),
            id.clone(),
            self.config,
            known,
            Arc::clone(&self.delegate),
            token.clone(),
        ));
        let receive = tokio::spawn(receive_loop(inbox, Arc::clone(&self.delegate), token.clone()));

        *self.running.lock() = Some(Running {
            token,
            tasks: vec![heartbeat, receive],
        });
        info!(
            server_id = %self.me,
            heartbeat = ?self.config.heartbeat,
            ttl = ?self.config.ttl,
            "Cluster started"
        );
        Ok(())
    }

    async fn shutdown(&self) -> EdgeResult<()> {
        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };
        running.token.cancel();
        self.backplane.unsubscribe(self.me.server_id()).await;
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Cluster task ended abnormally");
            }
        }
        info!(server_id = %self.me, "Cluster stopped");
        Ok(())
    }

    fn subscribe(&self, delegate: Arc<dyn ClusterDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    async fn publish(&self, target_id: &str, data: Vec<u8>) -> EdgeResult<()> {
        self.backplane.publish(target_id, data).await
    }

    async fn members(&self) -> EdgeResult<Vec<ClusterMember>> {
        self.store
            .get_active_members(Self::threshold(self.config.ttl))
            .await
    }

    async fn member_by_id(&self, server_id: &str) -> EdgeResult<ClusterMember> {
        self.store
            .get_member(server_id)
            .await?
            .ok_or_else(|| EdgeError::MemberNotFound(server_id.to_string()))
    }

    fn me(&self) -> &ClusterMember {
        &self.me
    }
}

fn current_delegate(slot: &DelegateSlot) -> Option<Arc<dyn ClusterDelegate>> {
    slot.read().clone()
}

async fn heartbeat_loop(
    store: Arc<dyn ClusterStore>,
    id: String,
    config: StoreClusterConfig,
    mut known: HashSet<String>,
    delegate: DelegateSlot,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; start() already beat once.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = store.set_last_active(&id, now_millis()).await {
            if let Some(d) = current_delegate(&delegate) {
                d.on_error(&e);
            }
            continue;
        }

        let active = match store.get_active_members(StoreCluster::threshold(config.ttl)).await {
            Ok(members) => members,
            Err(e) => {
                if let Some(d) = current_delegate(&delegate) {
                    d.on_error(&e);
                }
                continue;
            }
        };

        let current: HashSet<String> = active.iter().map(|m| m.server_id().to_string()).collect();
        let mut joined: Vec<String> = current.difference(&known).cloned().collect();
        let mut left: Vec<String> = known.difference(&current).cloned().collect();
        joined.sort();
        left.sort();
        known = current;

        let Some(d) = current_delegate(&delegate) else {
            continue;
        };
        if !joined.is_empty() {
            d.on_join(&joined);
        }
        if !left.is_empty() {
            d.on_leave(&left);
        }
    }
    debug!(server_id = %id, "Heartbeat loop stopped");
}

async fn receive_loop(
    mut inbox: mpsc::Receiver<Vec<u8>>,
    delegate: DelegateSlot,
    token: CancellationToken,
) {
    loop {
        let data = tokio::select! {
            () = token.cancelled() => break,
            data = inbox.recv() => match data {
                Some(data) => data,
                None => break,
            },
        };
        match current_delegate(&delegate) {
            Some(d) => d.on_message(data).await,
            None => debug!(bytes = data.len(), "Dropping cluster message, no delegate"),
        }
    }
}

//! Cluster ownership service.
//!
//! Membership itself is maintained elsewhere; this service holds the current
//! peer list (delivered through its `clustering` configuration block) and
//! answers which node owns a key using rendezvous hashing.

use std::sync::Arc;

use async_trait::async_trait;
use conflux_value::Value;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::info;

use crate::{Result, Service, ServiceContext, ServiceData, ServiceDefinition, ServiceError};

/// Registered name of the cluster service.
pub const SERVICE_NAME: &str = "cluster";

/// Name of the configuration block routed to the cluster service.
pub const CONFIG_TYPE: &str = "clustering";

/// Peer ownership state shared through the service host.
pub struct ClusterData {
    node_name: String,
    peers: RwLock<Vec<String>>,
    changes: watch::Sender<u64>,
}

impl ClusterData {
    pub fn new(node_name: &str) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            node_name: node_name.to_string(),
            peers: RwLock::new(Vec::new()),
            changes,
        }
    }

    /// Name of the local node.
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// All members, including the local node, sorted by name.
    pub fn members(&self) -> Vec<String> {
        let mut members = self.peers.read().clone();
        members.push(self.node_name.clone());
        members.sort();
        members.dedup();
        members
    }

    /// The member responsible for `key`.
    pub fn owner(&self, key: &str) -> String {
        self.members()
            .into_iter()
            .max_by_key(|member| score(member, key))
            .unwrap_or_else(|| self.node_name.clone())
    }

    /// Returns true if the local node is responsible for `key`.
    pub fn owns_key(&self, key: &str) -> bool {
        self.owner(key) == self.node_name
    }

    /// Receiver that changes every time the peer list changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Replaces the peer list. Returns true if it changed.
    pub fn set_peers(&self, mut peers: Vec<String>) -> bool {
        peers.sort();
        peers.dedup();

        {
            let mut current = self.peers.write();
            if *current == peers {
                return false;
            }
            *current = peers;
        }

        self.changes.send_modify(|generation| *generation += 1);
        true
    }
}

fn score(member: &str, key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(member.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// The builtin cluster service.
pub struct ClusterService {
    data: Arc<ClusterData>,
}

impl ClusterService {
    pub fn new(node_name: &str) -> Self {
        Self {
            data: Arc::new(ClusterData::new(node_name)),
        }
    }

    pub fn cluster_data(&self) -> Arc<ClusterData> {
        Arc::clone(&self.data)
    }
}

#[async_trait]
impl Service for ClusterService {
    fn definition(&self) -> ServiceDefinition {
        ServiceDefinition::new(SERVICE_NAME).config_type(CONFIG_TYPE)
    }

    async fn run(&self, mut ctx: ServiceContext) -> Result<()> {
        info!(node_name = %self.data.node_name, "Cluster service running");
        ctx.cancelled().await;
        Ok(())
    }

    async fn update(&self, config: Value) -> Result<()> {
        let invalid = |message: &str| ServiceError::InvalidConfig {
            service: SERVICE_NAME.to_string(),
            message: message.to_string(),
        };

        let peers = match config.get("peers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid("peers must be a list of strings"))
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(invalid("peers must be a list of strings")),
        };

        if self.data.set_peers(peers) {
            info!(members = ?self.data.members(), "Cluster peers changed");
        }
        Ok(())
    }

    fn data(&self) -> Option<ServiceData> {
        Some(Arc::clone(&self.data) as ServiceData)
    }
}

// =============================================================================
// Tests
// =============================================================================

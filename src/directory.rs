use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Identity of a remote computation process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the node a process currently runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distributed key/value directory consumed by the migration core.
///
/// Resolution failures are benign: an absent entry means "no special
/// handling", never an error.
pub trait PeerDirectory: Send + Sync {
    fn resolve_peer_node(&self, peer: &PeerId) -> Option<NodeId>;
}

/// In-process directory backed by a shared map, suitable both for embedding
/// runtimes that mirror their own directory into it and for tests.
#[derive(Clone)]
pub struct SharedPeerDirectory {
    inner: Arc<RwLock<HashMap<PeerId, NodeId>>>,
}

impl SharedPeerDirectory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert(&self, peer: PeerId, node: NodeId) {
        self.inner.write().unwrap().insert(peer, node);
    }

    pub fn remove(&self, peer: &PeerId) -> Option<NodeId> {
        self.inner.write().unwrap().remove(peer)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

impl Default for SharedPeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerDirectory for SharedPeerDirectory {
    fn resolve_peer_node(&self, peer: &PeerId) -> Option<NodeId> {
        self.inner.read().unwrap().get(peer).copied()
    }
}

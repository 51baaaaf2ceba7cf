use log::info;
use std::io;
use std::net::TcpStream;
use std::sync::{Arc, RwLock};

use crate::config::RelocationConfig;
use crate::directory::PeerId;
use crate::endpoint::{Endpoint, PeerAddr};
use crate::errors::TransportError;
use crate::fragment::{Fragment, FragmentKind};
use crate::phase::PhaseController;
use crate::reactor::Reactor;

/// What the wire layer did with a fragment it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The fragment fully left the transport core's hands.
    Completed,
    /// The wire layer keeps working on it; the endpoint holds it as the
    /// in-flight send until `complete_inflight` is called.
    Pending,
}

/// Data-movement capability. The coordination core never packs or writes
/// wire bytes itself; it only hands fragments over in order.
pub trait WireSender: Send + Sync {
    fn send_fragment(
        &self,
        peer: &PeerId,
        fragment: &Fragment,
    ) -> Result<SendOutcome, TransportError>;
}

/// Connection-establishment capability.
pub trait Dialer: Send + Sync {
    fn dial(&self, addr: &PeerAddr) -> io::Result<TcpStream>;
}

/// Plain TCP dialer.
#[derive(Debug, Default)]
pub struct TcpDialer;

impl TcpDialer {
    pub fn new() -> Self {
        Self
    }
}

impl Dialer for TcpDialer {
    fn dial(&self, addr: &PeerAddr) -> io::Result<TcpStream> {
        TcpStream::connect(addr.addr())
    }
}

/// One communication fabric instance: the set of per-peer endpoints plus the
/// capabilities they need. Everything the migration phase machinery touches
/// goes through this module.
pub struct TransportModule {
    local_peer: PeerId,
    config: RelocationConfig,
    phase: Arc<PhaseController>,
    reactor: Arc<dyn Reactor>,
    wire: Arc<dyn WireSender>,
    dialer: Arc<dyn Dialer>,
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
}

impl TransportModule {
    pub fn new(
        local_peer: PeerId,
        config: RelocationConfig,
        phase: Arc<PhaseController>,
        reactor: Arc<dyn Reactor>,
        wire: Arc<dyn WireSender>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            local_peer,
            config,
            phase,
            reactor,
            wire,
            dialer,
            endpoints: RwLock::new(Vec::new()),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn phase(&self) -> &Arc<PhaseController> {
        &self.phase
    }

    pub fn reactor(&self) -> &Arc<dyn Reactor> {
        &self.reactor
    }

    pub fn wire(&self) -> &Arc<dyn WireSender> {
        &self.wire
    }

    pub fn dialer(&self) -> &Arc<dyn Dialer> {
        &self.dialer
    }

    /// Registers a newly reachable peer and creates its endpoint.
    ///
    /// No endpoint is created for the local process itself (no loopback
    /// connections), mirroring how peers are added when the membership
    /// layer announces them.
    pub fn add_peer(&self, peer: PeerId, addr: PeerAddr) -> Option<Arc<Endpoint>> {
        if peer == self.local_peer {
            return None;
        }
        let endpoint = Arc::new(Endpoint::new(peer, addr));
        self.endpoints.write().unwrap().push(endpoint.clone());
        Some(endpoint)
    }

    pub fn add_peers(
        &self,
        peers: impl IntoIterator<Item = (PeerId, PeerAddr)>,
    ) -> Vec<Arc<Endpoint>> {
        peers
            .into_iter()
            .filter_map(|(peer, addr)| self.add_peer(peer, addr))
            .collect()
    }

    /// Removes a peer's endpoint and tears its connection down.
    pub fn del_peer(&self, peer: &PeerId) -> bool {
        let removed = {
            let mut endpoints = self.endpoints.write().unwrap();
            let mut taken = None;
            endpoints.retain(|endpoint| {
                if endpoint.peer() == peer {
                    taken = Some(endpoint.clone());
                    false
                } else {
                    true
                }
            });
            taken
        };
        match removed {
            Some(endpoint) => {
                endpoint.shutdown(self.reactor.as_ref());
                true
            }
            None => false,
        }
    }

    pub fn endpoint_for(&self, peer: &PeerId) -> Option<Arc<Endpoint>> {
        self.endpoints
            .read()
            .unwrap()
            .iter()
            .find(|endpoint| endpoint.peer() == peer)
            .cloned()
    }

    /// Snapshot of the endpoint collection for iterate-with-safe-removal:
    /// phase fan-out acts on the snapshot while membership changes mutate
    /// the live list.
    pub fn endpoints_snapshot(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().unwrap().clone()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().unwrap().len()
    }

    /// Allocates an outbound fragment, honoring the eager/max size classes.
    /// Requests beyond the maximum send size are resource exhaustion,
    /// surfaced immediately with no retry.
    pub fn alloc(&self, kind: FragmentKind, size: usize) -> Result<Fragment, TransportError> {
        if size <= self.config.eager_limit() || size <= self.config.max_send_size() {
            Ok(Fragment::zeroed(kind, size))
        } else {
            Err(TransportError::ResourceExhausted {
                requested: size,
                limit: self.config.max_send_size(),
            })
        }
    }

    pub fn send(&self, endpoint: &Endpoint, fragment: Fragment) -> Result<(), TransportError> {
        self.submit(endpoint, fragment)
    }

    pub fn put(&self, endpoint: &Endpoint, fragment: Fragment) -> Result<(), TransportError> {
        self.submit(endpoint, fragment)
    }

    pub fn get(&self, endpoint: &Endpoint, fragment: Fragment) -> Result<(), TransportError> {
        self.submit(endpoint, fragment)
    }

    fn submit(&self, endpoint: &Endpoint, fragment: Fragment) -> Result<(), TransportError> {
        if self.phase.should_suppress(endpoint) {
            endpoint.suppress_for_migration();
        }
        endpoint.enqueue_or_send(
            fragment,
            self.dialer.as_ref(),
            self.reactor.as_ref(),
            self.wire.as_ref(),
        )
    }

    /// Tears down every endpoint and empties the collection.
    pub fn finalize(&self) {
        let endpoints: Vec<_> = {
            let mut endpoints = self.endpoints.write().unwrap();
            endpoints.drain(..).collect()
        };
        info!(
            "transport {}: finalizing {} endpoint(s)",
            self.local_peer,
            endpoints.len()
        );
        for endpoint in endpoints {
            endpoint.shutdown(self.reactor.as_ref());
        }
    }
}

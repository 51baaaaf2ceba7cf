use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Mutex;

use crate::directory::PeerId;
use crate::errors::TransportError;
use crate::fragment::Fragment;
use crate::phase::HostSpec;
use crate::reactor::{Interest, Reactor};
use crate::transport::{Dialer, SendOutcome, WireSender};

/// Connection lifecycle of a per-peer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointState {
    /// No socket, idle. The next send request reconnects naturally.
    Closed,
    /// Handshake in progress.
    Connecting,
    /// Ready for I/O.
    Connected,
    /// Migration-quiesced: socket drained or released, pending work kept.
    Frozen,
    /// Unrecoverable connection error.
    Failed,
}

/// Network identity of a peer. Replaced as one owned value on relocation so
/// a half-updated address is never observable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    hostname: String,
    addr: SocketAddr,
}

impl PeerAddr {
    pub fn new(hostname: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            hostname: hostname.into(),
            addr,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Builds the address this peer will have after relocating to
    /// `destination`: new host and IP, same port.
    pub fn relocated(&self, destination: &HostSpec) -> PeerAddr {
        PeerAddr {
            hostname: destination.qualified_name(),
            addr: SocketAddr::new(destination.addr(), self.addr.port()),
        }
    }
}

#[derive(Debug)]
struct EndpointInner {
    state: EndpointState,
    addr: PeerAddr,
    socket: Option<TcpStream>,
    recv_registration: Option<crate::reactor::Registration>,
    send_registration: Option<crate::reactor::Registration>,
    pending: VecDeque<Fragment>,
    inflight: Option<Fragment>,
}

/// Per-peer connection record.
///
/// Owned by the transport module's endpoint collection and only handed out
/// by reference (`Arc`) during migration fan-out. All mutation goes through
/// the interior lock, so a multi-threaded embedding observes each transition
/// atomically.
#[derive(Debug)]
pub struct Endpoint {
    peer: PeerId,
    inner: Mutex<EndpointInner>,
}

impl Endpoint {
    pub fn new(peer: PeerId, addr: PeerAddr) -> Self {
        Self {
            peer,
            inner: Mutex::new(EndpointInner {
                state: EndpointState::Closed,
                addr,
                socket: None,
                recv_registration: None,
                send_registration: None,
                pending: VecDeque::new(),
                inflight: None,
            }),
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn state(&self) -> EndpointState {
        self.inner.lock().unwrap().state
    }

    pub fn addr(&self) -> PeerAddr {
        self.inner.lock().unwrap().addr.clone()
    }

    pub fn pending_fragments(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn has_pending_work(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.pending.is_empty() || inner.inflight.is_some()
    }

    /// Queues a fragment or hands it to the wire layer, depending on state.
    ///
    /// A `Frozen` endpoint still accepts fragments: the freeze is a
    /// transport-level drain marker, not a rejection. Socket I/O stays
    /// suppressed until the endpoint is restored.
    pub fn enqueue_or_send(
        &self,
        fragment: Fragment,
        dialer: &dyn Dialer,
        reactor: &dyn Reactor,
        wire: &dyn WireSender,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            EndpointState::Failed => Err(TransportError::PeerUnreachable(self.peer.clone())),
            EndpointState::Closed => {
                inner.pending.push_back(fragment);
                drop(inner);
                self.start_connect(dialer, reactor, wire);
                Ok(())
            }
            EndpointState::Connecting | EndpointState::Frozen => {
                inner.pending.push_back(fragment);
                Ok(())
            }
            EndpointState::Connected => {
                inner.pending.push_back(fragment);
                self.drain_locked(&mut inner, wire)
            }
        }
    }

    /// Initiates a connection attempt to the current peer address.
    pub fn start_connect(&self, dialer: &dyn Dialer, reactor: &dyn Reactor, wire: &dyn WireSender) {
        let addr = {
            let mut inner = self.inner.lock().unwrap();
            if matches!(
                inner.state,
                EndpointState::Connecting | EndpointState::Connected
            ) {
                return;
            }
            inner.state = EndpointState::Connecting;
            inner.addr.clone()
        };
        debug!("endpoint {}: connecting to {}", self.peer, addr.addr());

        match dialer.dial(&addr) {
            Ok(socket) => self.finish_connect(socket, reactor, wire),
            Err(err) => {
                warn!(
                    "endpoint {}: connect to {} failed: {}",
                    self.peer,
                    addr.addr(),
                    err
                );
                let mut inner = self.inner.lock().unwrap();
                if inner.state == EndpointState::Connecting {
                    inner.state = EndpointState::Failed;
                }
            }
        }
    }

    /// Installs a freshly connected socket and drains queued work.
    pub fn finish_connect(&self, socket: TcpStream, reactor: &dyn Reactor, wire: &dyn WireSender) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != EndpointState::Connecting {
            // A migration fan-out won the race; queued work stays for the
            // next restore cycle.
            debug!(
                "endpoint {}: discarding connect result in state {:?}",
                self.peer, inner.state
            );
            return;
        }
        if let Err(err) = socket.set_nonblocking(true) {
            warn!("endpoint {}: set_nonblocking failed: {}", self.peer, err);
        }
        match reactor.register(socket.as_raw_fd(), Interest::Readable) {
            Ok(registration) => inner.recv_registration = Some(registration),
            Err(err) => warn!(
                "endpoint {}: read-interest registration failed: {}",
                self.peer, err
            ),
        }
        inner.socket = Some(socket);
        inner.state = EndpointState::Connected;
        if let Err(err) = self.drain_locked(&mut inner, wire) {
            warn!("endpoint {}: drain after connect failed: {}", self.peer, err);
        }
    }

    /// Called by the wire layer once the in-flight fragment has fully left
    /// the socket; continues draining the pending queue in order.
    pub fn complete_inflight(&self, wire: &dyn WireSender) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.inflight = None;
        if inner.state == EndpointState::Connected {
            self.drain_locked(&mut inner, wire)
        } else {
            Ok(())
        }
    }

    /// Called by the wire layer when a partial write leaves the socket
    /// waiting for writability.
    pub fn register_send_interest(&self, reactor: &dyn Reactor) {
        let mut inner = self.inner.lock().unwrap();
        if inner.send_registration.is_some() {
            return;
        }
        let Some(socket) = &inner.socket else { return };
        match reactor.register(socket.as_raw_fd(), Interest::Writable) {
            Ok(registration) => inner.send_registration = Some(registration),
            Err(err) => warn!(
                "endpoint {}: write-interest registration failed: {}",
                self.peer, err
            ),
        }
    }

    /// Quiesces the endpoint ahead of a migration.
    ///
    /// Half-closes the write side so bytes already queued in the kernel
    /// drain to the peer, forces the socket into blocking mode so that final
    /// drain cannot be interrupted, and removes both readiness
    /// registrations. Pending fragments and the in-flight send are kept.
    pub fn freeze(&self, reactor: &dyn Reactor) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(
            inner.state,
            EndpointState::Closed | EndpointState::Failed | EndpointState::Frozen
        ) {
            return;
        }
        if let Some(socket) = &inner.socket {
            if let Err(err) = socket.shutdown(Shutdown::Write) {
                warn!("endpoint {}: write half-close failed: {}", self.peer, err);
            }
            if let Err(err) = socket.set_nonblocking(false) {
                warn!(
                    "endpoint {}: switch to blocking mode failed: {}",
                    self.peer, err
                );
            }
        }
        Self::drop_registrations(&mut inner, reactor);
        inner.state = EndpointState::Frozen;
        debug!(
            "endpoint {}: frozen with {} pending fragment(s)",
            self.peer,
            inner.pending.len()
        );
    }

    /// Releases the socket for the disruptive migration window and, when the
    /// peer is the one relocating, swaps in its post-migration address.
    ///
    /// Teardown errors are logged, never escalated: the stale descriptor is
    /// discarded either way, exactly once.
    pub fn close_and_relocate(&self, reactor: &dyn Reactor, new_addr: Option<PeerAddr>) {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.state, EndpointState::Closed | EndpointState::Failed) {
            if let Some(socket) = inner.socket.take() {
                if let Err(err) = socket.shutdown(Shutdown::Both) {
                    warn!(
                        "endpoint {}: error while closing socket to {}: {}",
                        self.peer,
                        inner.addr.hostname(),
                        err
                    );
                }
            }
            Self::drop_registrations(&mut inner, reactor);
            inner.state = EndpointState::Frozen;
        }
        if let Some(addr) = new_addr {
            debug!(
                "endpoint {}: peer relocated, rewriting address to {}",
                self.peer,
                addr.addr()
            );
            inner.addr = addr;
        }
    }

    /// Concludes a migration for this endpoint: `Frozen` becomes `Closed`,
    /// and a reconnect is started immediately when queued or in-flight work
    /// is waiting. Endpoints with nothing pending stay `Closed` until the
    /// next send request.
    pub fn restore(&self, dialer: &dyn Dialer, reactor: &dyn Reactor, wire: &dyn WireSender) {
        let reconnect = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != EndpointState::Frozen {
                return;
            }
            // A failed attempt can settle straight from Preparing, with the
            // half-closed socket from freeze still held.
            if let Some(socket) = inner.socket.take() {
                let _ = socket.shutdown(Shutdown::Both);
            }
            Self::drop_registrations(&mut inner, reactor);
            // An interrupted in-flight send restarts from scratch, ahead of
            // everything queued behind it.
            if let Some(fragment) = inner.inflight.take() {
                inner.pending.push_front(fragment);
            }
            inner.state = EndpointState::Closed;
            !inner.pending.is_empty()
        };
        if reconnect {
            self.start_connect(dialer, reactor, wire);
        }
    }

    /// Send-path marker used while a migration is in progress: the endpoint
    /// is flagged `Frozen` so freshly submitted fragments queue instead of
    /// touching a socket that is about to disappear.
    pub fn suppress_for_migration(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = EndpointState::Frozen;
    }

    /// Permanent teardown when the peer leaves the computation or the
    /// module finalizes.
    pub(crate) fn shutdown(&self, reactor: &dyn Reactor) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(socket) = inner.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        Self::drop_registrations(&mut inner, reactor);
        inner.state = EndpointState::Closed;
    }

    fn drain_locked(
        &self,
        inner: &mut EndpointInner,
        wire: &dyn WireSender,
    ) -> Result<(), TransportError> {
        while inner.inflight.is_none() {
            let Some(fragment) = inner.pending.pop_front() else {
                break;
            };
            match wire.send_fragment(&self.peer, &fragment) {
                Ok(SendOutcome::Completed) => continue,
                Ok(SendOutcome::Pending) => inner.inflight = Some(fragment),
                Err(err) => {
                    inner.pending.push_front(fragment);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn drop_registrations(inner: &mut EndpointInner, reactor: &dyn Reactor) {
        if let Some(registration) = inner.recv_registration.take() {
            reactor.deregister(registration);
        }
        if let Some(registration) = inner.send_registration.take() {
            reactor.deregister(registration);
        }
    }

    #[cfg(test)]
    pub(crate) fn install_socket_for_test(&self, socket: TcpStream, state: EndpointState) {
        let mut inner = self.inner.lock().unwrap();
        inner.socket = Some(socket);
        inner.state = state;
    }

    #[cfg(test)]
    pub(crate) fn has_socket(&self) -> bool {
        self.inner.lock().unwrap().socket.is_some()
    }
}

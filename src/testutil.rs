//! Mock capability implementations shared by the unit tests.

use bytes::Bytes;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::directory::PeerId;
use crate::endpoint::PeerAddr;
use crate::errors::TransportError;
use crate::fragment::Fragment;
use crate::reactor::{Interest, Reactor, Registration};
use crate::transport::{Dialer, SendOutcome, WireSender};

/// Reactor that records registrations and poll passes.
pub(crate) struct RecordingReactor {
    next_token: AtomicU64,
    registered: Mutex<Vec<(u64, Interest)>>,
    deregistered: Mutex<Vec<u64>>,
    polls: AtomicUsize,
}

impl RecordingReactor {
    pub(crate) fn new() -> Self {
        Self {
            next_token: AtomicU64::new(0),
            registered: Mutex::new(Vec::new()),
            deregistered: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn active_registrations(&self) -> usize {
        self.registered.lock().unwrap().len() - self.deregistered.lock().unwrap().len()
    }

    pub(crate) fn poll_passes(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl Reactor for RecordingReactor {
    fn register(&self, _fd: RawFd, interest: Interest) -> io::Result<Registration> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.registered.lock().unwrap().push((token, interest));
        Ok(Registration::new(token, interest))
    }

    fn deregister(&self, registration: Registration) {
        self.deregistered.lock().unwrap().push(registration.token());
    }

    fn poll_once(&self) -> io::Result<()> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

enum WireMode {
    Complete,
    PendingOnce,
    Fail,
}

/// Wire layer that records dispatched fragments in order.
pub(crate) struct RecordingWire {
    sent: Mutex<Vec<(PeerId, Bytes)>>,
    mode: Mutex<WireMode>,
}

impl RecordingWire {
    pub(crate) fn completing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            mode: Mutex::new(WireMode::Complete),
        }
    }

    /// First dispatch stays in flight, later ones complete immediately.
    pub(crate) fn pending_once() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            mode: Mutex::new(WireMode::PendingOnce),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            mode: Mutex::new(WireMode::Fail),
        }
    }

    pub(crate) fn sent_payloads(&self) -> Vec<Bytes> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl WireSender for RecordingWire {
    fn send_fragment(
        &self,
        peer: &PeerId,
        fragment: &Fragment,
    ) -> Result<SendOutcome, TransportError> {
        let mut mode = self.mode.lock().unwrap();
        match *mode {
            WireMode::Fail => {
                return Err(TransportError::Wire {
                    peer: peer.clone(),
                    reason: "injected failure".to_string(),
                })
            }
            WireMode::PendingOnce => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((peer.clone(), fragment.payload().clone()));
                *mode = WireMode::Complete;
                return Ok(SendOutcome::Pending);
            }
            WireMode::Complete => {}
        }
        self.sent
            .lock()
            .unwrap()
            .push((peer.clone(), fragment.payload().clone()));
        Ok(SendOutcome::Completed)
    }
}

/// Dialer that fabricates a real loopback socket pair per dial, keeping the
/// remote end so tests can observe half-close behavior.
pub(crate) struct PairDialer {
    dialed: Mutex<Vec<PeerAddr>>,
    remotes: Mutex<Vec<TcpStream>>,
}

impl PairDialer {
    pub(crate) fn new() -> Self {
        Self {
            dialed: Mutex::new(Vec::new()),
            remotes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dialed.lock().unwrap().len()
    }

    pub(crate) fn dialed_addrs(&self) -> Vec<PeerAddr> {
        self.dialed.lock().unwrap().clone()
    }
}

impl Dialer for PairDialer {
    fn dial(&self, addr: &PeerAddr) -> io::Result<TcpStream> {
        self.dialed.lock().unwrap().push(addr.clone());
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let stream = TcpStream::connect(listener.local_addr()?)?;
        let (remote, _) = listener.accept()?;
        self.remotes.lock().unwrap().push(remote);
        Ok(stream)
    }
}

/// Dialer whose every attempt is refused.
pub(crate) struct RefusingDialer {
    dialed: Mutex<Vec<PeerAddr>>,
}

impl RefusingDialer {
    pub(crate) fn new() -> Self {
        Self {
            dialed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dialed.lock().unwrap().len()
    }
}

impl Dialer for RefusingDialer {
    fn dial(&self, addr: &PeerAddr) -> io::Result<TcpStream> {
        self.dialed.lock().unwrap().push(addr.clone());
        Err(io::Error::from(io::ErrorKind::ConnectionRefused))
    }
}

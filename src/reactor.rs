use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

/// Readiness condition an endpoint socket can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Handle for one readiness registration.
///
/// An endpoint holds at most one registration per interest; dropping the
/// handle back into [`Reactor::deregister`] stops the event loop from
/// servicing the descriptor.
#[derive(Debug)]
pub struct Registration {
    token: u64,
    interest: Interest,
}

impl Registration {
    pub fn new(token: u64, interest: Interest) -> Self {
        Self { token, interest }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }
}

/// Event-loop capability consumed by the coordination core.
///
/// The core never implements readiness dispatch itself; it only needs to
/// add and remove descriptors and to request a single non-blocking pass so
/// that callbacks pending at the start of the disruptive migration window
/// are flushed before sockets are torn down.
pub trait Reactor: Send + Sync {
    fn register(&self, fd: RawFd, interest: Interest) -> io::Result<Registration>;

    fn deregister(&self, registration: Registration);

    /// Runs one non-blocking pass of the event loop.
    fn poll_once(&self) -> io::Result<()>;
}

/// Reactor for embeddings that service readiness out-of-band.
///
/// Registrations are accepted and handed back opaque tokens; `poll_once`
/// does nothing.
#[derive(Debug, Default)]
pub struct NullReactor {
    next_token: AtomicU64,
}

impl NullReactor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reactor for NullReactor {
    fn register(&self, _fd: RawFd, interest: Interest) -> io::Result<Registration> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        Ok(Registration::new(token, interest))
    }

    fn deregister(&self, _registration: Registration) {}

    fn poll_once(&self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_reactor_hands_out_distinct_tokens() {
        let reactor = NullReactor::new();
        let a = reactor.register(3, Interest::Readable).unwrap();
        let b = reactor.register(3, Interest::Writable).unwrap();
        assert_ne!(a.token(), b.token());
        assert_eq!(a.interest(), Interest::Readable);
        reactor.deregister(a);
        reactor.deregister(b);
    }

    #[test]
    fn test_null_reactor_poll_once_is_noop() {
        let reactor = NullReactor::new();
        assert!(reactor.poll_once().is_ok());
    }
}

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which transport primitive a fragment was allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentKind {
    Send,
    Put,
    Get,
}

/// A unit of queued or in-flight outbound data associated with an endpoint.
///
/// The wire-level packing of a fragment is owned by the data-movement layer;
/// the coordination core only moves fragments between the pending queue, the
/// in-flight slot, and the [`WireSender`](crate::transport::WireSender)
/// capability, and guarantees their order survives a freeze/restore cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    kind: FragmentKind,
    payload: Bytes,
}

impl Fragment {
    pub fn new(kind: FragmentKind, payload: Bytes) -> Self {
        Self { kind, payload }
    }

    /// Allocates a zero-filled fragment of `size` bytes.
    pub fn zeroed(kind: FragmentKind, size: usize) -> Self {
        Self {
            kind,
            payload: Bytes::from(vec![0u8; size]),
        }
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_fragment_has_requested_size() {
        let frag = Fragment::zeroed(FragmentKind::Send, 128);
        assert_eq!(frag.len(), 128);
        assert_eq!(frag.kind(), FragmentKind::Send);
        assert!(frag.payload().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_fragment_keeps_payload() {
        let frag = Fragment::new(FragmentKind::Put, Bytes::from_static(b"abc"));
        assert_eq!(frag.payload().as_ref(), b"abc");
        assert!(!frag.is_empty());
    }
}

//! `Responder`: a session's output port (spec §6), typically a socket write
//! wrapper. The `Session`'s responder slot is the one piece of state
//! rebindable from a different task (spec §5), so it is held behind a
//! handle rather than an owned value.

use async_trait::async_trait;

#[async_trait]
pub trait Responder: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> bool;
    async fn disconnect(&self);
    fn remote_address(&self) -> Option<std::net::SocketAddr>;
    fn local_address(&self) -> Option<std::net::SocketAddr>;
}

/// A `Responder` that records everything sent to it, for session tests
/// that assert on emitted admin messages without a real socket.
#[derive(Default)]
pub struct RecordingResponder {
    sent: tokio::sync::Mutex<Vec<Vec<u8>>>,
    disconnected: std::sync::atomic::AtomicBool,
}

impl RecordingResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.sent.lock().await.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn send(&self, bytes: &[u8]) -> bool {
        if self.is_disconnected() {
            return false;
        }
        self.sent.lock().await.push(bytes.to_vec());
        true
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn remote_address(&self) -> Option<std::net::SocketAddr> {
        None
    }

    fn local_address(&self) -> Option<std::net::SocketAddr> {
        None
    }
}

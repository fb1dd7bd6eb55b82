//! One reader task per active TCP socket (spec §4.7).
//!
//! Grounded on `demos/acceptor.rs`'s `tokio::select!` between a readable
//! socket and a 1-second `interval.tick()`, generalized from that demo's
//! hand-rolled per-message-type `match` into `Session::next`/
//! `Session::on_idle_tick`, and on
//! `original_source/src/C++/ThreadedSocketConnection.cpp`'s `readMessage`/
//! `processStream` loop for the poll-spin and routing-wait details.

use crate::parser::FixParser;
use crate::responder::Responder;
use crate::session::{DisconnectReason, Session};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, Duration};

/// Resolves the first inbound frame on an unbound (acceptor-side) connection
/// to the `Session` it belongs to. `Acceptor::get_session` is the concrete
/// implementation (spec §4.6): decode header fields, require a Logon,
/// swap Sender/Target, and look up the registry — including the 5-tick
/// wait for a draining same-`SessionId` registration to clear.
#[async_trait]
pub trait SessionRouter: Send + Sync {
    async fn route(&self, raw: &[u8]) -> Option<Arc<Session>>;
}

/// A `Responder` backed by the write half of a split `TcpStream`.
pub struct TcpResponder {
    write_half: Mutex<OwnedWriteHalf>,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl TcpResponder {
    pub fn new(write_half: OwnedWriteHalf, peer_addr: Option<SocketAddr>, local_addr: Option<SocketAddr>) -> Self {
        Self { write_half: Mutex::new(write_half), peer_addr, local_addr }
    }
}

#[async_trait]
impl Responder for TcpResponder {
    async fn send(&self, bytes: &[u8]) -> bool {
        self.write_half.lock().await.write_all(bytes).await.is_ok()
    }

    async fn disconnect(&self) {
        let _ = self.write_half.lock().await.shutdown().await;
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn local_address(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// Which session a freshly-accepted/-dialed connection belongs to.
pub enum Binding {
    /// An initiator connection: the session is already known (it dialed
    /// out), so it can be bound before the first byte arrives.
    Bound(Arc<Session>),
    /// An acceptor connection: unbound until the first inbound Logon
    /// routes it via `router`.
    Unbound(Arc<dyn SessionRouter>),
}

/// Drive one socket until it closes, the session disconnects it, or
/// `shutdown` fires. Mirrors spec §4.7's four-step loop body.
pub async fn run_connection(stream: TcpStream, binding: Binding, shutdown: watch::Receiver<bool>) {
    let peer_addr = stream.peer_addr().ok();
    let local_addr = stream.local_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let responder: Arc<dyn Responder> = Arc::new(TcpResponder::new(write_half, peer_addr, local_addr));

    let (session, router) = match binding {
        Binding::Bound(session) => {
            session.bind_responder(responder.clone()).await;
            (Some(session), None)
        }
        Binding::Unbound(router) => (None, Some(router)),
    };

    read_loop(read_half, responder, session, router, shutdown).await;
}

/// Binds `session`'s responder to `stream` and returns the still-unread
/// half, so a caller (the initiator's reconnect loop) can send the initial
/// Logon through the now-bound responder before the read loop starts
/// draining frames.
pub async fn bind(stream: TcpStream, session: Arc<Session>) -> tokio::net::tcp::OwnedReadHalf {
    let peer_addr = stream.peer_addr().ok();
    let local_addr = stream.local_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let responder: Arc<dyn Responder> = Arc::new(TcpResponder::new(write_half, peer_addr, local_addr));
    session.bind_responder(responder).await;
    read_half
}

/// Continue a connection whose responder is already bound (via [`bind`]),
/// reading from `read_half` until it closes, the session disconnects it,
/// or `shutdown` fires.
pub async fn run_bound(read_half: tokio::net::tcp::OwnedReadHalf, session: Arc<Session>, shutdown: watch::Receiver<bool>) {
    let responder = session
        .current_responder()
        .await
        .expect("run_bound called on a session with no bound responder");
    read_loop(read_half, responder, Some(session), None, shutdown).await;
}

async fn read_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    responder: Arc<dyn Responder>,
    mut session: Option<Arc<Session>>,
    router: Option<Arc<dyn SessionRouter>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut parser = FixParser::new();
    let mut ticker = interval(Duration::from_secs(1));
    let mut read_buf = [0u8; 16 * 1024];

    'outer: loop {
        let poll_spin = session.as_ref().map(|s| s.config.poll_spin).unwrap_or(0);
        let mut spun = false;
        for _ in 0..poll_spin {
            match read_half.try_read(&mut read_buf) {
                Ok(0) => break 'outer,
                Ok(n) => {
                    parser.extend(&read_buf[..n]);
                    spun = true;
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(_) => break 'outer,
            }
        }

        if !spun {
            use tokio::io::AsyncReadExt;
            tokio::select! {
                result = read_half.read(&mut read_buf) => {
                    match result {
                        Ok(0) => break 'outer,
                        Ok(n) => parser.extend(&read_buf[..n]),
                        Err(_) => break 'outer,
                    }
                }
                _ = ticker.tick() => {
                    if let Some(s) = &session {
                        if s.on_idle_tick().await.is_err() {
                            break 'outer;
                        }
                    }
                    continue;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break 'outer;
                    }
                    continue;
                }
            }
        }

        let (frames, errors) = parser.drain();
        for reason in errors {
            if let Some(s) = &session {
                tracing::warn!(session = %s.id, %reason, "malformed frame discarded");
            }
        }

        for frame in frames {
            if session.is_none() {
                if let Some(router) = &router {
                    match router.route(&frame).await {
                        Some(resolved) => {
                            resolved.bind_responder(responder.clone()).await;
                            session = Some(resolved);
                        }
                        None => break 'outer,
                    }
                }
            }
            if let Some(s) = &session {
                let _ = s.next(frame).await;
            }
        }
    }

    if let Some(s) = &session {
        s.disconnect(DisconnectReason::PeerClosed).await;
    } else {
        responder.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::NullApplication;
    use crate::dictionary::DataDictionary;
    use crate::field::UtcTimestampConvertor;
    use crate::log::TracingLog;
    use crate::message::Message;
    use crate::session::{SessionConfig, SessionRole};
    use crate::session_id::SessionId;
    use crate::store::InMemoryMessageStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn inbound_logon(sender: &str, target: &str) -> bytes::Bytes {
        let mut msg = Message::new();
        msg.set(35, "A").set(34, "1").set(49, sender).set(56, target).set(108, "30");
        msg.set(52, UtcTimestampConvertor::encode(&crate::time::now_naive(), false));
        msg.encode("FIX.4.4")
    }

    #[tokio::test]
    async fn bound_connection_answers_logon_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let id = SessionId::new("FIX.4.4", "US", "THEM");
        let config = SessionConfig { role: SessionRole::Acceptor, ..SessionConfig::default() };
        let session = Arc::new(Session::new(
            id,
            config,
            Arc::new(DataDictionary::empty()),
            Arc::new(DataDictionary::empty()),
            Arc::new(InMemoryMessageStore::new()),
            Box::new(TracingLog),
            Arc::new(NullApplication),
        ));

        let (_tx, rx) = watch::channel(false);
        let server_session = session.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            run_connection(stream, Binding::Bound(server_session), rx).await;
        });

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(&inbound_logon("THEM", "US")).await.unwrap();

        let mut buf = [0u8; 4096];
        let n = tokio::time::timeout(Duration::from_secs(2), peer.read(&mut buf)).await.unwrap().unwrap();
        let reply = Message::decode(&buf[..n], &std::collections::BTreeMap::new()).unwrap();
        assert_eq!(reply.msg_type(), Some("A"));
        assert!(session.is_logged_on().await);
    }
}

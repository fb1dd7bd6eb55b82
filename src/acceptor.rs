//! Owns acceptor-role sessions, listens for inbound connections, and routes
//! the first Logon on each to its matching `Session` (spec §4.6).
//!
//! Grounded on `original_source/src/C++/Acceptor.cpp`'s `getSession`
//! (decode header only, require Logon, swap Sender/Target, registry
//! lookup) and `start`/`block`/`poll`/`stop`, and on
//! `demos/acceptor.rs`'s one-`TcpListener`-per-port accept loop.

use crate::connection::{run_connection, Binding, SessionRouter};
use crate::message::Message;
use crate::registry::SessionRegistry;
use crate::session::{DisconnectReason, Session};
use crate::session_id::SessionId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

struct AcceptorRouter {
    registry: Arc<SessionRegistry>,
}

#[async_trait]
impl SessionRouter for AcceptorRouter {
    /// `original_source/src/C++/Acceptor.cpp::getSession`: decode header
    /// fields only, require a Logon, swap Sender/Target to the local
    /// session's identity, then wait up to 5 one-second ticks for a
    /// draining same-`SessionId` connection to release its responder.
    async fn route(&self, raw: &[u8]) -> Option<Arc<Session>> {
        let header = Message::decode(raw, &BTreeMap::new()).ok()?;
        if header.msg_type() != Some("A") {
            return None;
        }
        let begin_string = header.begin_string()?;
        let sender = header.sender_comp_id()?;
        let target = header.target_comp_id()?;
        let local_id = SessionId::new(begin_string, target, sender);
        let session = self.registry.get(&local_id).await?;

        // spec §4.4: "future inbound connections are rejected until the
        // window reopens" — a Logon arriving while the configured
        // SessionTime window is closed is dropped before it ever binds.
        if !session.is_in_session_time() {
            return None;
        }

        for _ in 0..5 {
            if !session.has_responder().await {
                return Some(session);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        if session.has_responder().await {
            None
        } else {
            Some(session)
        }
    }
}

/// Listens on one `TcpListener` per distinct `(host, port)` its configured
/// sessions name, and binds each inbound connection to its session once
/// the first Logon routes it.
pub struct Acceptor {
    registry: Arc<SessionRegistry>,
    bind_addrs: Mutex<Vec<SocketAddr>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Acceptor {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self { registry, bind_addrs: Mutex::new(Vec::new()), shutdown_tx, shutdown_rx, workers: Mutex::new(Vec::new()) }
    }

    /// Registers `session` and records `bind_addr` as one of the ports
    /// this acceptor must listen on.
    pub async fn add_session(&self, bind_addr: SocketAddr, session: Arc<Session>) {
        self.registry.register(session).await;
        let mut addrs = self.bind_addrs.lock().await;
        if !addrs.contains(&bind_addr) {
            addrs.push(bind_addr);
        }
    }

    /// Bind every configured port and spawn its accept loop as a
    /// background task.
    pub async fn start(&self) -> std::io::Result<()> {
        let addrs = self.bind_addrs.lock().await.clone();
        let mut workers = self.workers.lock().await;
        for addr in addrs {
            let listener = TcpListener::bind(addr).await?;
            let registry = self.registry.clone();
            let shutdown_rx = self.shutdown_rx.clone();
            workers.push(tokio::spawn(accept_loop(listener, registry, shutdown_rx)));
        }
        Ok(())
    }

    /// Run the worker(s) on the caller's task, returning once every
    /// listener has stopped (used for embedding without a separate
    /// `start()` call).
    pub async fn block(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Single-step drive for embedding: yields control for up to `timeout`
    /// so an embedding event loop can interleave other work between calls,
    /// since this acceptor otherwise drives itself from spawned tasks.
    pub async fn poll(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }

    /// `stop(false)`: logs out every still-logged-on session, unregisters
    /// it, waits up to 10 one-second ticks for all of them to go quiet,
    /// then tears down the listeners. `stop(true)` skips straight to
    /// teardown. Per spec.md §4.6's redesign, stop is terminal — sessions
    /// are not re-registered or re-logged-on afterward.
    pub async fn stop(&self, force: bool) {
        if !force {
            let sessions = self.registry.all().await;
            for session in &sessions {
                if session.is_logged_on().await {
                    let _ = session.initiate_logout(Some("acceptor stopping")).await;
                }
            }
            for _ in 0..10 {
                let mut any_logged_on = false;
                for session in &sessions {
                    if session.is_logged_on().await {
                        any_logged_on = true;
                        break;
                    }
                }
                if !any_logged_on {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            for session in &sessions {
                session.disconnect(DisconnectReason::ApplicationRequested).await;
                self.registry.unregister(&session.id).await;
            }
        }
        let _ = self.shutdown_tx.send(true);
        self.block().await;
    }
}

async fn accept_loop(listener: TcpListener, registry: Arc<SessionRegistry>, mut shutdown_rx: watch::Receiver<bool>) {
    let router: Arc<dyn SessionRouter> = Arc::new(AcceptorRouter { registry });
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, _addr)) = accepted else { break };
                let router = router.clone();
                let conn_shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    run_connection(stream, Binding::Unbound(router), conn_shutdown).await;
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::NullApplication;
    use crate::dictionary::DataDictionary;
    use crate::field::UtcTimestampConvertor;
    use crate::log::TracingLog;
    use crate::session::{SessionConfig, SessionRole};
    use crate::store::InMemoryMessageStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn inbound_logon(sender: &str, target: &str) -> bytes::Bytes {
        let mut msg = Message::new();
        msg.set(35, "A").set(34, "1").set(49, sender).set(56, target).set(108, "30");
        msg.set(52, UtcTimestampConvertor::encode(&crate::time::now_naive(), false));
        msg.encode("FIX.4.4")
    }

    #[tokio::test]
    async fn routes_inbound_logon_to_matching_session() {
        let registry = Arc::new(SessionRegistry::new());
        let acceptor = Acceptor::new(registry.clone());

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

        let addr: SocketAddr = "127.0.0.1:18756".parse().unwrap();
        acceptor.add_session(addr, session.clone()).await;
        acceptor.start().await.unwrap();

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(&inbound_logon("THEM", "US")).await.unwrap();

        let mut buf = [0u8; 4096];
        let n = tokio::time::timeout(Duration::from_secs(2), peer.read(&mut buf)).await.unwrap().unwrap();
        let reply = Message::decode(&buf[..n], &BTreeMap::new()).unwrap();
        assert_eq!(reply.msg_type(), Some("A"));
        assert!(session.is_logged_on().await);

        acceptor.stop(true).await;
    }

    #[tokio::test]
    async fn drops_inbound_logon_when_session_time_window_is_closed() {
        use crate::config::{TimeRange, Weekday};

        let today = crate::time::today_weekday(false);
        const ALL: [Weekday; 7] = [
            Weekday::Sunday,
            Weekday::Monday,
            Weekday::Tuesday,
            Weekday::Wednesday,
            Weekday::Thursday,
            Weekday::Friday,
            Weekday::Saturday,
        ];
        let other_day = ALL[(ALL.iter().position(|d| *d == today).unwrap() + 1) % 7];

        let registry = Arc::new(SessionRegistry::new());
        let acceptor = Acceptor::new(registry.clone());

        let id = SessionId::new("FIX.4.4", "US", "THEM");
        let config = SessionConfig {
            role: SessionRole::Acceptor,
            session_time: Some(TimeRange::weekly(
                chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
                other_day,
                other_day,
            )),
            ..SessionConfig::default()
        };
        let session = Arc::new(Session::new(
            id,
            config,
            Arc::new(DataDictionary::empty()),
            Arc::new(DataDictionary::empty()),
            Arc::new(InMemoryMessageStore::new()),
            Box::new(TracingLog),
            Arc::new(NullApplication),
        ));

        let addr: SocketAddr = "127.0.0.1:18757".parse().unwrap();
        acceptor.add_session(addr, session.clone()).await;
        acceptor.start().await.unwrap();

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(&inbound_logon("THEM", "US")).await.unwrap();

        let mut buf = [0u8; 4096];
        let n = tokio::time::timeout(Duration::from_secs(2), peer.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0, "connection should be closed, not answered");
        assert!(!session.is_logged_on().await);

        acceptor.stop(true).await;
    }
}

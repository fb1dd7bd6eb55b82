//! Owns initiator-role sessions and dials out to their counterparties on a
//! reconnect/backoff schedule (spec §4.6).
//!
//! Grounded on `demos/order_management.rs`'s/`demos/market_data_gateway.rs`'s
//! sleep-then-retry connection loops, generalized into a doubling backoff
//! (quickfix's `ReconnectInterval` config key, capped rather than
//! open-ended). No `original_source` file covers `Session` (the set
//! provided is `Acceptor.cpp`, `DataDictionaryProvider.h`,
//! `FieldConvertors.cpp`, `SessionFactory.cpp`,
//! `ThreadedSocketConnection.cpp`); sending Logon once a dialed socket is up
//! follows spec.md §4.4 ("on connection, the initiator sends Logon"), not a
//! cited source file.

use crate::connection::{bind, run_bound};
use crate::registry::SessionRegistry;
use crate::session::{DisconnectReason, Session};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct InitiatorEntry {
    session: Arc<Session>,
    target_addr: SocketAddr,
    bind_address: Option<SocketAddr>,
}

/// Owns initiator-role sessions, dialing each on its own reconnect loop and
/// sending the initial Logon once connected.
pub struct Initiator {
    registry: Arc<SessionRegistry>,
    entries: Mutex<Vec<InitiatorEntry>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Initiator {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self { registry, entries: Mutex::new(Vec::new()), shutdown_tx, shutdown_rx, workers: Mutex::new(Vec::new()) }
    }

    pub async fn add_session(&self, target_addr: SocketAddr, session: Arc<Session>, bind_address: Option<SocketAddr>) {
        self.registry.register(session.clone()).await;
        self.entries.lock().await.push(InitiatorEntry { session, target_addr, bind_address });
    }

    pub async fn start(&self) {
        let entries_guard = self.entries.lock().await;
        let mut workers = self.workers.lock().await;
        for entry in entries_guard.iter() {
            let session = entry.session.clone();
            let target_addr = entry.target_addr;
            let bind_address = entry.bind_address;
            let shutdown_rx = self.shutdown_rx.clone();
            workers.push(tokio::spawn(reconnect_loop(session, target_addr, bind_address, shutdown_rx)));
        }
    }

    pub async fn block(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn poll(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }

    /// `stop(false)`: logs out every still-logged-on session, waits up to
    /// 10 one-second ticks for all of them to go quiet, then stops dialing.
    /// `stop(true)` skips straight to stopping. Stop is terminal (spec
    /// §4.6's redesign note) — entries are not re-dialed afterward.
    pub async fn stop(&self, force: bool) {
        if !force {
            let sessions: Vec<Arc<Session>> = self.entries.lock().await.iter().map(|e| e.session.clone()).collect();
            for session in &sessions {
                if session.is_logged_on().await {
                    let _ = session.initiate_logout(Some("initiator stopping")).await;
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

async fn reconnect_loop(
    session: Arc<Session>,
    target_addr: SocketAddr,
    bind_address: Option<SocketAddr>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        match dial(target_addr, bind_address).await {
            Ok(stream) => {
                backoff = INITIAL_BACKOFF;
                let read_half = bind(stream, session.clone()).await;
                if session.initiate_logon().await.is_err() {
                    session.unbind_responder().await;
                    continue;
                }
                run_bound(read_half, session.clone(), shutdown_rx.clone()).await;
            }
            Err(err) => {
                session_log_connect_failure(&session, target_addr, &err);
            }
        }

        if *shutdown_rx.borrow() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn dial(target_addr: SocketAddr, bind_address: Option<SocketAddr>) -> std::io::Result<tokio::net::TcpStream> {
    let socket = if target_addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    if let Some(bind_address) = bind_address {
        socket.bind(bind_address)?;
    }
    socket.connect(target_addr).await
}

fn session_log_connect_failure(session: &Session, target_addr: SocketAddr, err: &std::io::Error) {
    tracing::warn!(session = %session.id, %target_addr, %err, "initiator connect failed, will retry");
}

//! The session state machine: logon handshake, sequence tracking, gap
//! fill, resend, heartbeat/test-request, logout, and the four reset
//! policies (spec §4.4).
//!
//! No `original_source` file covers `Session` (the set provided is
//! `Acceptor.cpp`, `DataDictionaryProvider.h`, `FieldConvertors.cpp`,
//! `SessionFactory.cpp`, `ThreadedSocketConnection.cpp`); the full
//! transition table implemented here — logon handshake, the sequence gate,
//! resend/gap-fill, heartbeat/test-request timeouts, the four reset
//! policies, SessionTime enforcement — is built from spec.md §4.4 plus
//! general quickfix/FIX domain knowledge, not a cited source file. The
//! `Session`/`DisconnectReason`/`SessionConfig` shape in this file is
//! grounded on the teacher's original `Session` (a thin `mpsc`-backed send
//! handle, a builder-style config), generalized from the teacher's thin
//! send-only handle to the full state machine the spec calls for.

use crate::application::Application;
use crate::config::ResetPolicy;
use crate::dictionary::DataDictionary;
use crate::error::{FixError, Result};
use crate::field::UtcTimestampConvertor;
use crate::log::Log;
use crate::message::Message;
use crate::messages;
use crate::responder::Responder;
use crate::session_id::SessionId;
use crate::store::MessageStore;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Acceptor,
    Initiator,
}

/// The six states of spec §4.4, unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStateKind {
    Disconnected,
    LogonSent,
    LogonReceived,
    LoggedOn,
    LogoutSent,
    ResendRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    PeerClosed,
    ProtocolError,
    Timeout,
    ApplicationRequested,
    SessionTimeExpired,
}

/// Per-session configuration of spec §3's "Config" group, realized as a
/// plain value (immutable after `SessionFactory::create`).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: SessionRole,
    pub heart_bt_int: u32,
    pub logon_timeout_secs: u32,
    pub logout_timeout_secs: u32,
    pub max_latency_secs: u32,
    pub check_comp_id: bool,
    pub check_latency: bool,
    pub validate_length_and_checksum: bool,
    pub persist_messages: bool,
    pub reset: ResetPolicy,
    pub send_redundant_resend_requests: bool,
    pub milliseconds_in_timestamp: bool,
    pub default_appl_ver_id: Option<String>,
    pub poll_spin: u32,
    pub session_time: Option<crate::config::TimeRange>,
    pub use_local_time: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: SessionRole::Initiator,
            heart_bt_int: 30,
            logon_timeout_secs: 10,
            logout_timeout_secs: 2,
            max_latency_secs: 120,
            check_comp_id: true,
            check_latency: true,
            validate_length_and_checksum: true,
            persist_messages: true,
            reset: ResetPolicy::default(),
            send_redundant_resend_requests: false,
            milliseconds_in_timestamp: false,
            default_appl_ver_id: None,
            poll_spin: 0,
            session_time: None,
            use_local_time: false,
        }
    }
}

struct RuntimeState {
    kind: SessionStateKind,
    last_received: chrono::NaiveDateTime,
    last_sent: chrono::NaiveDateTime,
    pending_test_req_id: Option<String>,
    /// `[low, high]` of the gap currently outstanding via our own
    /// ResendRequest, per spec §4.4's sequence gap recovery.
    resend_range: Option<(u64, u64)>,
    /// Messages received beyond a gap, queued until the gap closes
    /// (spec §4.4: "queue the current message for post-gap processing").
    queued: BTreeMap<u64, Bytes>,
    logout_initiated_at: Option<std::time::Instant>,
    logon_initiated_at: Option<std::time::Instant>,
}

impl RuntimeState {
    fn fresh() -> Self {
        let now = crate::time::now_naive();
        Self {
            kind: SessionStateKind::Disconnected,
            last_received: now,
            last_sent: now,
            pending_test_req_id: None,
            resend_range: None,
            queued: BTreeMap::new(),
            logout_initiated_at: None,
            logon_initiated_at: None,
        }
    }
}

/// One FIX session: the state machine of spec §4.4 bound to a single
/// `SessionId`, with at most one active `Responder` (invariant 3).
pub struct Session {
    pub id: SessionId,
    pub config: SessionConfig,
    pub transport_dictionary: Arc<DataDictionary>,
    pub application_dictionary: Arc<DataDictionary>,
    store: Arc<dyn MessageStore>,
    log: Box<dyn Log>,
    application: Arc<dyn Application>,
    responder: Mutex<Option<Arc<dyn Responder>>>,
    runtime: Mutex<RuntimeState>,
}

impl Session {
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        transport_dictionary: Arc<DataDictionary>,
        application_dictionary: Arc<DataDictionary>,
        store: Arc<dyn MessageStore>,
        log: Box<dyn Log>,
        application: Arc<dyn Application>,
    ) -> Self {
        Self {
            id,
            config,
            transport_dictionary,
            application_dictionary,
            store,
            log,
            application,
            responder: Mutex::new(None),
            runtime: Mutex::new(RuntimeState::fresh()),
        }
    }

    pub async fn state(&self) -> SessionStateKind {
        self.runtime.lock().await.kind
    }

    pub async fn is_logged_on(&self) -> bool {
        matches!(self.state().await, SessionStateKind::LoggedOn)
    }

    pub async fn has_responder(&self) -> bool {
        self.responder.lock().await.is_some()
    }

    /// Bind a fresh connection as this session's `Responder`. Rebinding is
    /// explicit: a prior responder, if any, is simply replaced (invariant 3
    /// — callers must ensure the old connection is actually gone first).
    pub async fn bind_responder(&self, responder: Arc<dyn Responder>) {
        *self.responder.lock().await = Some(responder);
    }

    pub async fn unbind_responder(&self) {
        *self.responder.lock().await = None;
    }

    /// The `Responder` currently bound to this session, if any. Lets a
    /// caller that already bound a connection (e.g. the initiator, via
    /// `connection::bind`) hand the same responder to the read loop without
    /// re-splitting the stream.
    pub async fn current_responder(&self) -> Option<Arc<dyn Responder>> {
        self.responder.lock().await.clone()
    }

    async fn send_bytes(&self, bytes: &[u8]) -> bool {
        let responder = self.responder.lock().await.clone();
        match responder {
            Some(r) => r.send(bytes).await,
            None => false,
        }
    }

    fn is_admin_msg_type(msg_type: &str) -> bool {
        matches!(msg_type, "0" | "1" | "2" | "3" | "4" | "5" | "A")
    }

    /// Stamp, run through `toAdmin`/`toApp`, persist (if configured), and
    /// physically send one outbound message. `DoNotSend` silently
    /// suppresses the send without touching sequence numbers (spec §7).
    async fn send(&self, mut msg: Message) -> Result<()> {
        let is_admin = Self::is_admin_msg_type(msg.msg_type().unwrap_or(""));
        let seq = self.store.get_next_sender_msg_seq_num().await;
        msg.set(34, seq.to_string());
        msg.set(49, self.id.sender_comp_id.clone());
        msg.set(56, self.id.target_comp_id.clone());
        msg.set(52, UtcTimestampConvertor::encode(&crate::time::now_naive(), self.config.milliseconds_in_timestamp));

        let callback = if is_admin {
            self.application.to_admin(&mut msg, &self.id).await
        } else {
            self.application.to_app(&mut msg, &self.id).await
        };
        match callback {
            Err(FixError::DoNotSend) => return Ok(()),
            other => other?,
        }

        let bytes = msg.encode(&self.id.begin_string);
        self.log.on_outgoing(&self.id, &bytes);

        if self.config.persist_messages {
            self.store.set(seq, &bytes).await;
        }
        self.store.incr_next_sender_msg_seq_num().await;
        self.runtime.lock().await.last_sent = crate::time::now_naive();

        if !self.send_bytes(&bytes).await {
            return Err(FixError::Transport("responder rejected send".into()));
        }
        Ok(())
    }

    /// Send the initial Logon as an initiator (spec §4.4: "on connection,
    /// the initiator sends Logon").
    pub async fn initiate_logon(&self) -> Result<()> {
        if self.config.reset.on_logon {
            self.store.reset().await;
        }
        let msg = messages::logon(self.config.heart_bt_int, "", "", self.config.reset.on_logon);
        self.send(msg).await?;
        let mut runtime = self.runtime.lock().await;
        runtime.kind = SessionStateKind::LogonSent;
        runtime.logon_initiated_at = Some(std::time::Instant::now());
        Ok(())
    }

    /// Process one complete inbound frame (the exact byte range
    /// `FixParser::parse` returned). Drives the whole state machine.
    pub async fn next(&self, raw: Bytes) -> Result<()> {
        self.log.on_incoming(&self.id, &raw);
        self.runtime.lock().await.last_received = crate::time::now_naive();

        if self.config.validate_length_and_checksum && !crate::message::verify_checksum(&raw) {
            let seq = extract_seq_num(&raw).unwrap_or(0);
            self.reply_reject(seq, 5, "checksum mismatch").await?;
            return Ok(());
        }

        let flat = Message::decode(&raw, &BTreeMap::new())?;
        let msg_type = flat.msg_type().ok_or(FixError::FieldNotFound(35))?.to_string();
        let dict = if Self::is_admin_msg_type(&msg_type) { &self.transport_dictionary } else { &self.application_dictionary };
        let msg = flat.with_groups(&dict.repeating_groups(&msg_type));

        if self.config.check_comp_id
            && (msg.sender_comp_id() != Some(self.id.target_comp_id.as_str())
                || msg.target_comp_id() != Some(self.id.sender_comp_id.as_str()))
        {
            self.reply_reject(msg.msg_seq_num().unwrap_or(0), 9, "CompID mismatch").await?;
            self.do_logout(Some("CompID mismatch")).await?;
            return Ok(());
        }

        if self.config.check_latency {
            if let Some(sending_time) = msg.get(52).and_then(UtcTimestampConvertor::decode) {
                let now = crate::time::now_naive();
                let drift = (now - sending_time).num_seconds().unsigned_abs();
                if drift > self.config.max_latency_secs as u64 {
                    self.reply_reject(msg.msg_seq_num().unwrap_or(0), 10, "SendingTime accuracy problem").await?;
                    return Ok(());
                }
            }
        }

        self.dispatch(msg, dict).await
    }

    async fn dispatch(&self, msg: Message, dict: &Arc<DataDictionary>) -> Result<()> {
        let seq = msg.msg_seq_num().ok_or(FixError::FieldNotFound(34))?;
        let msg_type = msg.msg_type().unwrap_or("").to_string();

        // A Logon carrying ResetOnLogon resets sequence bookkeeping before
        // the gate below evaluates it, so the handshake isn't itself seen
        // as a stale or out-of-sequence message against pre-reset state.
        if msg_type == "A" && self.config.reset.on_logon {
            self.store.reset().await;
        }

        let expected = self.store.get_next_target_msg_seq_num().await;
        let poss_dup = msg.poss_dup();

        if seq < expected {
            if !poss_dup {
                self.log.on_event(&self.id, &format!("MsgSeqNumTooLow without PossDup: expected {expected}, got {seq}; disconnecting"));
                self.disconnect(DisconnectReason::ProtocolError).await;
                return Err(FixError::SequenceTooLow { expected, got: seq });
            }
            // A flagged duplicate of an already-processed message: ignore.
            return Ok(());
        }

        if seq > expected {
            self.handle_gap(seq, msg).await?;
            return Ok(());
        }

        // seq == expected: process in place, then drain any messages that
        // queued up while a gap was outstanding.
        self.process_in_sequence(msg, dict).await?;
        self.drain_queue(dict).await
    }

    async fn handle_gap(&self, seq: u64, msg: Message) -> Result<()> {
        let expected = self.store.get_next_target_msg_seq_num().await;
        let msg_type = msg.msg_type().unwrap_or("").to_string();

        // A Logon arriving with a higher-than-expected seqnum: the logon
        // itself is still processed (we must answer it) before entering
        // ResendRequested, per spec §4.4.
        if msg_type == "A" {
            self.process_logon(&msg).await?;
            self.store.incr_next_target_msg_seq_num().await;
        } else {
            self.runtime.lock().await.queued.insert(seq, msg.encode(&self.id.begin_string));
        }

        let already_outstanding = self.runtime.lock().await.resend_range;
        let should_request = match already_outstanding {
            Some((lo, hi)) => self.config.send_redundant_resend_requests || !(lo == expected && hi == seq - 1),
            None => true,
        };
        if should_request {
            let req = messages::resend_request(expected, seq - 1, "", "");
            self.send(req).await?;
            let mut runtime = self.runtime.lock().await;
            runtime.resend_range = Some((expected, seq - 1));
            runtime.kind = SessionStateKind::ResendRequested;
        }
        Ok(())
    }

    async fn drain_queue(&self, dict: &Arc<DataDictionary>) -> Result<()> {
        loop {
            let expected = self.store.get_next_target_msg_seq_num().await;
            let queued_bytes = self.runtime.lock().await.queued.remove(&expected);
            let Some(bytes) = queued_bytes else { break };
            let flat = Message::decode(&bytes, &BTreeMap::new())?;
            let msg_type = flat.msg_type().unwrap_or("").to_string();
            let msg = flat.with_groups(&dict.repeating_groups(&msg_type));
            self.process_in_sequence(msg, dict).await?;
        }
        let mut runtime = self.runtime.lock().await;
        if runtime.queued.is_empty() {
            if runtime.kind == SessionStateKind::ResendRequested {
                runtime.kind = SessionStateKind::LoggedOn;
            }
            runtime.resend_range = None;
        }
        Ok(())
    }

    /// Handle one message known to be exactly `expected` — the core
    /// per-msg-type behavior of spec §4.4, applied either live or while
    /// draining the post-gap queue. Advances `NextTargetMsgSeqNum` itself,
    /// since `SequenceReset` jumps to a specific value rather than +1.
    async fn process_in_sequence(&self, msg: Message, dict: &Arc<DataDictionary>) -> Result<()> {
        if let Err(err) = dict.validate(&msg) {
            if let FixError::SessionReject { reason, text } = &err {
                self.reply_reject(msg.msg_seq_num().unwrap_or(0), *reason, text).await?;
                self.store.incr_next_target_msg_seq_num().await;
                return Ok(());
            }
            return Err(err);
        }

        match msg.msg_type().unwrap_or("") {
            "A" => {
                self.process_logon(&msg).await?;
                self.store.incr_next_target_msg_seq_num().await;
            }
            "0" => {
                self.process_heartbeat(&msg).await?;
                self.store.incr_next_target_msg_seq_num().await;
            }
            "1" => {
                self.process_test_request(&msg).await?;
                self.store.incr_next_target_msg_seq_num().await;
            }
            "2" => {
                self.process_resend_request(&msg).await?;
                self.store.incr_next_target_msg_seq_num().await;
            }
            "4" => self.process_sequence_reset(&msg).await?,
            "5" => {
                self.process_logout(&msg).await?;
                self.store.incr_next_target_msg_seq_num().await;
            }
            "3" => {
                self.log.on_event(&self.id, "received session-level Reject");
                self.store.incr_next_target_msg_seq_num().await;
            }
            other => {
                self.process_application_message(other, &msg).await?;
                self.store.incr_next_target_msg_seq_num().await;
            }
        }
        Ok(())
    }

    async fn process_logon(&self, msg: &Message) -> Result<()> {
        if !self.is_in_session_time() {
            self.log.on_event(&self.id, "logon refused: outside configured SessionTime window");
            let logout = messages::logout(Some("session time window closed"), "", "");
            self.send(logout).await?;
            self.disconnect(DisconnectReason::SessionTimeExpired).await;
            return Ok(());
        }

        if let Err(FixError::RejectLogon(reason)) = self.application.from_admin(msg, &self.id).await {
            self.log.on_event(&self.id, &format!("logon refused by application: {reason}"));
            let logout = messages::logout(Some(&reason), "", "");
            self.send(logout).await?;
            self.disconnect(DisconnectReason::ApplicationRequested).await;
            return Ok(());
        }

        if self.config.reset.refresh_on_logon {
            self.store.refresh().await;
        }

        if self.config.role == SessionRole::Acceptor {
            let heart_bt_int = msg.get_int(108).map(|v| v as u32).unwrap_or(self.config.heart_bt_int);
            let response = messages::logon(heart_bt_int, "", "", self.config.reset.on_logon);
            self.send(response).await?;
        }

        {
            let mut runtime = self.runtime.lock().await;
            runtime.kind = SessionStateKind::LoggedOn;
        }
        self.application.on_logon(&self.id).await;
        Ok(())
    }

    async fn process_heartbeat(&self, msg: &Message) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if let (Some(pending), Some(got)) = (&runtime.pending_test_req_id, msg.get(112)) {
            if pending == got {
                runtime.pending_test_req_id = None;
            }
        }
        Ok(())
    }

    async fn process_test_request(&self, msg: &Message) -> Result<()> {
        let test_req_id = msg.get(112).unwrap_or("").to_string();
        let response = messages::heartbeat(Some(&test_req_id), "", "");
        self.send(response).await
    }

    /// Satisfies an inbound ResendRequest. Simplification noted in
    /// DESIGN.md: rather than detecting per-sequence-number persistence
    /// gaps, a persisted session resends every stored message in range
    /// verbatim (PossDup=Y); a non-persisted session always answers with a
    /// single GapFill, matching spec §4.4's persist-policy split at the
    /// whole-session granularity it's described at.
    async fn process_resend_request(&self, msg: &Message) -> Result<()> {
        let begin = msg.get_int(7).unwrap_or(1) as u64;
        let requested_end = msg.get_int(16).unwrap_or(0) as u64;
        let current = self.store.get_next_sender_msg_seq_num().await;
        let end = if requested_end == 0 { current.saturating_sub(1) } else { requested_end };

        if !self.config.persist_messages || begin > end {
            let gap_fill = messages::sequence_reset(end + 1, true, "", "");
            return self.send(gap_fill).await;
        }

        let mut stored = Vec::new();
        self.store.get(begin, end, &mut stored).await;
        if stored.len() as u64 != end - begin + 1 {
            let gap_fill = messages::sequence_reset(end + 1, true, "", "");
            return self.send(gap_fill).await;
        }

        for bytes in stored {
            if let Ok(mut original) = Message::decode(&bytes, &BTreeMap::new()) {
                original.set(43, "Y"); // PossDupFlag
                let orig_sending_time = original.get(52).unwrap_or("").to_string();
                original.set(122, orig_sending_time); // OrigSendingTime
                self.resend_verbatim(original).await?;
            }
        }
        Ok(())
    }

    /// Resend a previously-sent message without consuming a fresh
    /// outbound sequence number (it keeps its original MsgSeqNum).
    async fn resend_verbatim(&self, msg: Message) -> Result<()> {
        let bytes = msg.encode(&self.id.begin_string);
        self.log.on_outgoing(&self.id, &bytes);
        self.send_bytes(&bytes).await;
        Ok(())
    }

    async fn process_sequence_reset(&self, msg: &Message) -> Result<()> {
        let new_seq_no = msg.get_int(36).unwrap_or(0) as u64;
        let gap_fill = msg.get(123) == Some("Y");
        let current = self.store.get_next_target_msg_seq_num().await;

        if new_seq_no > current {
            self.store.set_next_target_msg_seq_num(new_seq_no).await;
            self.runtime.lock().await.queued.retain(|seq, _| *seq >= new_seq_no);
        } else if gap_fill {
            self.store.incr_next_target_msg_seq_num().await;
        } else {
            self.log.on_event(&self.id, &format!("SequenceReset NewSeqNo {new_seq_no} <= current {current}; ignored"));
            self.store.incr_next_target_msg_seq_num().await;
        }
        Ok(())
    }

    async fn process_logout(&self, msg: &Message) -> Result<()> {
        self.application.from_admin(msg, &self.id).await?;
        let already_sent_logout = self.state().await == SessionStateKind::LogoutSent;
        if !already_sent_logout {
            let response = messages::logout(None, "", "");
            self.send(response).await?;
        }
        self.apply_disconnect_reset_policy().await;
        self.disconnect(DisconnectReason::ApplicationRequested).await;
        Ok(())
    }

    async fn process_application_message(&self, msg_type: &str, msg: &Message) -> Result<()> {
        match self.application.from_app(msg, &self.id).await {
            Ok(()) => Ok(()),
            Err(FixError::UnsupportedMessageType(_)) => {
                self.reply_reject(msg.msg_seq_num().unwrap_or(0), 35, &format!("unsupported message type {msg_type}")).await
            }
            Err(FixError::FieldNotFound(tag)) => {
                self.reply_reject(msg.msg_seq_num().unwrap_or(0), 1, &format!("required tag {tag} missing")).await
            }
            Err(FixError::IncorrectDataFormat { tag, reason }) => {
                self.reply_reject(msg.msg_seq_num().unwrap_or(0), 6, &format!("tag {tag}: {reason}")).await
            }
            Err(FixError::IncorrectTagValue { tag, value }) => {
                self.reply_reject(msg.msg_seq_num().unwrap_or(0), 5, &format!("tag {tag} has bad value {value}")).await
            }
            Err(other) => Err(other),
        }
    }

    async fn reply_reject(&self, ref_seq_num: u64, reason: u32, text: &str) -> Result<()> {
        let msg = messages::reject(ref_seq_num, reason, Some(text), "", "");
        self.send(msg).await
    }

    /// Send Logout and transition to `LogoutSent`, per spec §4.4.
    pub async fn initiate_logout(&self, text: Option<&str>) -> Result<()> {
        let msg = messages::logout(text, "", "");
        self.send(msg).await?;
        let mut runtime = self.runtime.lock().await;
        runtime.kind = SessionStateKind::LogoutSent;
        runtime.logout_initiated_at = Some(std::time::Instant::now());
        Ok(())
    }

    async fn do_logout(&self, text: Option<&str>) -> Result<()> {
        self.initiate_logout(text).await?;
        self.apply_disconnect_reset_policy().await;
        self.disconnect(DisconnectReason::ProtocolError).await;
        Ok(())
    }

    async fn apply_disconnect_reset_policy(&self) {
        if self.config.reset.on_logout || self.config.reset.on_disconnect {
            self.store.reset().await;
        }
    }

    /// Tear the session down: unbind the responder, mark disconnected, and
    /// notify the application. Does not touch the registry — that is the
    /// connection/acceptor's job (spec §7: a transport error disconnects
    /// the one affected session without touching the registry).
    pub async fn disconnect(&self, reason: DisconnectReason) {
        if matches!(reason, DisconnectReason::Timeout | DisconnectReason::PeerClosed) && self.config.reset.on_disconnect {
            self.store.reset().await;
        }
        if let Some(responder) = self.responder.lock().await.take() {
            responder.disconnect().await;
        }
        let was_logged_on = {
            let mut runtime = self.runtime.lock().await;
            let was = runtime.kind != SessionStateKind::Disconnected;
            runtime.kind = SessionStateKind::Disconnected;
            runtime.pending_test_req_id = None;
            was
        };
        if was_logged_on {
            self.application.on_logout(&self.id).await;
        }
    }

    /// Is "now" (session's configured clock) inside the permitted
    /// session-time window? Always `true` if none is configured.
    pub fn is_in_session_time(&self) -> bool {
        match &self.config.session_time {
            None => true,
            Some(range) => {
                let day = crate::time::today_weekday(self.config.use_local_time);
                let time = crate::time::now_time(self.config.use_local_time);
                range.is_in_range(day, time)
            }
        }
    }

    /// Called on each 1-second connection-reader tick (spec §4.7): emits
    /// heartbeats/test-requests, watches for unresponsive peers, and
    /// enforces the session-time window.
    pub async fn on_idle_tick(&self) -> Result<()> {
        if !self.is_in_session_time() {
            if self.is_logged_on().await {
                self.initiate_logout(Some("session time window closed")).await?;
            }
            return Ok(());
        }

        let state = self.state().await;

        if state == SessionStateKind::LogonSent {
            let started = self.runtime.lock().await.logon_initiated_at;
            if let Some(started) = started {
                if started.elapsed().as_secs() >= self.config.logon_timeout_secs as u64 {
                    self.disconnect(DisconnectReason::Timeout).await;
                }
            }
            return Ok(());
        }

        if state == SessionStateKind::LogoutSent {
            let started = self.runtime.lock().await.logout_initiated_at;
            if let Some(started) = started {
                if started.elapsed().as_secs() >= self.config.logout_timeout_secs as u64 {
                    self.disconnect(DisconnectReason::Timeout).await;
                }
            }
            return Ok(());
        }

        if !matches!(state, SessionStateKind::LoggedOn | SessionStateKind::ResendRequested) {
            return Ok(());
        }

        let now = crate::time::now_naive();
        let (last_sent, last_received, pending_test_req_id) = {
            let runtime = self.runtime.lock().await;
            (runtime.last_sent, runtime.last_received, runtime.pending_test_req_id.clone())
        };

        let since_sent = (now - last_sent).num_seconds();
        if since_sent >= self.config.heart_bt_int as i64 {
            self.send(messages::heartbeat(None, "", "")).await?;
        }

        let since_received = (now - last_received).num_seconds();
        let timeout_window = (self.config.heart_bt_int + self.config.max_latency_secs) as i64;

        if pending_test_req_id.is_none() && since_received >= timeout_window {
            let token = format!("TEST-{}", uuid::Uuid::new_v4());
            self.send(messages::test_request(&token, "", "")).await?;
            self.runtime.lock().await.pending_test_req_id = Some(token);
        } else if pending_test_req_id.is_some() && since_received >= timeout_window + self.config.heart_bt_int as i64 {
            self.disconnect(DisconnectReason::Timeout).await;
        }

        Ok(())
    }
}

fn extract_seq_num(raw: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(raw).ok()?;
    text.split('\u{1}').find_map(|field| field.strip_prefix("34=")).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::NullApplication;
    use crate::log::TracingLog;
    use crate::responder::RecordingResponder;
    use crate::store::InMemoryMessageStore;

    async fn new_test_session(role: SessionRole) -> (Arc<Session>, Arc<RecordingResponder>) {
        let id = SessionId::new("FIX.4.4", "US", "THEM");
        let config = SessionConfig { role, ..SessionConfig::default() };
        let session = Arc::new(Session::new(
            id,
            config,
            Arc::new(DataDictionary::empty()),
            Arc::new(DataDictionary::empty()),
            Arc::new(InMemoryMessageStore::new()),
            Box::new(TracingLog),
            Arc::new(NullApplication),
        ));
        let responder = Arc::new(RecordingResponder::new());
        session.bind_responder(responder.clone()).await;
        (session, responder)
    }

    fn inbound_logon(seq: u64, sender: &str, target: &str, heart_bt_int: u32) -> Bytes {
        let mut msg = Message::new();
        msg.set(35, "A").set(34, seq.to_string()).set(49, sender).set(56, target).set(108, heart_bt_int.to_string());
        msg.set(52, UtcTimestampConvertor::encode(&crate::time::now_naive(), false));
        msg.encode("FIX.4.4")
    }

    #[tokio::test]
    async fn clean_logon_transitions_to_logged_on_and_replies() {
        let (session, responder) = new_test_session(SessionRole::Acceptor).await;
        let raw = inbound_logon(1, "THEM", "US", 30);
        session.next(raw).await.unwrap();

        assert!(session.is_logged_on().await);
        let sent = responder.sent_messages().await;
        assert_eq!(sent.len(), 1);
        let reply = Message::decode(&sent[0], &BTreeMap::new()).unwrap();
        assert_eq!(reply.msg_type(), Some("A"));
        assert_eq!(reply.get(108), Some("30"));
    }

    #[tokio::test]
    async fn gap_triggers_resend_request() {
        let (session, responder) = new_test_session(SessionRole::Acceptor).await;
        session.next(inbound_logon(1, "THEM", "US", 30)).await.unwrap();

        let mut msg = Message::new();
        msg.set(35, "D").set(34, "8").set(49, "THEM").set(56, "US");
        msg.set(52, UtcTimestampConvertor::encode(&crate::time::now_naive(), false));
        session.next(msg.encode("FIX.4.4")).await.unwrap();

        assert_eq!(session.state().await, SessionStateKind::ResendRequested);
        let sent = responder.sent_messages().await;
        let resend = Message::decode(&sent[1], &BTreeMap::new()).unwrap();
        assert_eq!(resend.msg_type(), Some("2"));
        assert_eq!(resend.get(7), Some("2"));
        assert_eq!(resend.get(16), Some("7"));
    }

    #[tokio::test]
    async fn gap_fill_catches_up_and_drains_queued_message() {
        let (session, _responder) = new_test_session(SessionRole::Acceptor).await;
        session.next(inbound_logon(1, "THEM", "US", 30)).await.unwrap();

        let mut d_msg = Message::new();
        d_msg.set(35, "D").set(34, "8").set(49, "THEM").set(56, "US");
        d_msg.set(52, UtcTimestampConvertor::encode(&crate::time::now_naive(), false));
        session.next(d_msg.encode("FIX.4.4")).await.unwrap();
        assert_eq!(session.state().await, SessionStateKind::ResendRequested);

        let mut gap_fill = Message::new();
        gap_fill.set(35, "4").set(34, "2").set(49, "THEM").set(56, "US").set(36, "8").set(123, "Y");
        gap_fill.set(52, UtcTimestampConvertor::encode(&crate::time::now_naive(), false));
        session.next(gap_fill.encode("FIX.4.4")).await.unwrap();

        assert_eq!(session.store.get_next_target_msg_seq_num().await, 9);
        assert_eq!(session.state().await, SessionStateKind::LoggedOn);
    }

    #[tokio::test]
    async fn bad_checksum_sends_reject_without_advancing_sequence() {
        let (session, responder) = new_test_session(SessionRole::Acceptor).await;
        session.next(inbound_logon(1, "THEM", "US", 30)).await.unwrap();

        let mut msg = Message::new();
        msg.set(35, "0").set(34, "2").set(49, "THEM").set(56, "US");
        let mut bytes = msg.encode("FIX.4.4").to_vec();
        let len = bytes.len();
        bytes[len - 4] = if bytes[len - 4] == b'9' { b'8' } else { b'9' };

        session.next(Bytes::from(bytes)).await.unwrap();

        assert_eq!(session.store.get_next_target_msg_seq_num().await, 2);
        let sent = responder.sent_messages().await;
        let reject = Message::decode(sent.last().unwrap(), &BTreeMap::new()).unwrap();
        assert_eq!(reject.msg_type(), Some("3"));
        assert_eq!(reject.get(373), Some("5"));
    }

    #[tokio::test]
    async fn comp_id_mismatch_rejects_and_logs_out() {
        let (session, responder) = new_test_session(SessionRole::Acceptor).await;
        let mut msg = Message::new();
        msg.set(35, "A").set(34, "1").set(49, "WRONG").set(56, "US").set(108, "30");
        msg.set(52, UtcTimestampConvertor::encode(&crate::time::now_naive(), false));
        session.next(msg.encode("FIX.4.4")).await.unwrap();

        let sent = responder.sent_messages().await;
        let reject = Message::decode(&sent[0], &BTreeMap::new()).unwrap();
        assert_eq!(reject.get(373), Some("9"));
        assert_eq!(session.state().await, SessionStateKind::Disconnected);
    }

    struct RejectingApplication;

    #[async_trait::async_trait]
    impl Application for RejectingApplication {
        async fn on_create(&self, _session_id: &SessionId) {}
        async fn on_logon(&self, _session_id: &SessionId) {}
        async fn on_logout(&self, _session_id: &SessionId) {}
        async fn from_admin(&self, _msg: &Message, _session_id: &SessionId) -> Result<()> {
            Err(FixError::RejectLogon("not entitled".into()))
        }
    }

    #[tokio::test]
    async fn application_reject_logon_sends_logout_and_disconnects() {
        let id = SessionId::new("FIX.4.4", "US", "THEM");
        let config = SessionConfig { role: SessionRole::Acceptor, ..SessionConfig::default() };
        let session = Arc::new(Session::new(
            id,
            config,
            Arc::new(DataDictionary::empty()),
            Arc::new(DataDictionary::empty()),
            Arc::new(InMemoryMessageStore::new()),
            Box::new(TracingLog),
            Arc::new(RejectingApplication),
        ));
        let responder = Arc::new(RecordingResponder::new());
        session.bind_responder(responder.clone()).await;

        session.next(inbound_logon(1, "THEM", "US", 30)).await.unwrap();

        assert_eq!(session.state().await, SessionStateKind::Disconnected);
        let sent = responder.sent_messages().await;
        let reply = Message::decode(sent.last().unwrap(), &BTreeMap::new()).unwrap();
        assert_eq!(reply.msg_type(), Some("5"));
    }

    #[tokio::test]
    async fn reset_on_logon_forces_sequences_to_two_after_handshake() {
        let id = SessionId::new("FIX.4.4", "US", "THEM");
        let config = SessionConfig {
            role: SessionRole::Acceptor,
            reset: ResetPolicy { on_logon: true, ..Default::default() },
            ..SessionConfig::default()
        };
        let store = Arc::new(InMemoryMessageStore::new());
        store.set_next_sender_msg_seq_num(50).await;
        store.set_next_target_msg_seq_num(50).await;
        let session = Session::new(
            id,
            config,
            Arc::new(DataDictionary::empty()),
            Arc::new(DataDictionary::empty()),
            store.clone(),
            Box::new(TracingLog),
            Arc::new(NullApplication),
        );
        session.bind_responder(Arc::new(RecordingResponder::new())).await;

        session.next(inbound_logon(1, "THEM", "US", 30)).await.unwrap();

        assert_eq!(store.get_next_target_msg_seq_num().await, 2);
        assert_eq!(store.get_next_sender_msg_seq_num().await, 2);
    }

    #[tokio::test]
    async fn test_request_receives_matching_heartbeat() {
        let (session, responder) = new_test_session(SessionRole::Acceptor).await;
        session.next(inbound_logon(1, "THEM", "US", 30)).await.unwrap();

        let mut msg = Message::new();
        msg.set(35, "1").set(34, "2").set(49, "THEM").set(56, "US").set(112, "TEST-123");
        msg.set(52, UtcTimestampConvertor::encode(&crate::time::now_naive(), false));
        session.next(msg.encode("FIX.4.4")).await.unwrap();

        let sent = responder.sent_messages().await;
        let reply = Message::decode(sent.last().unwrap(), &BTreeMap::new()).unwrap();
        assert_eq!(reply.msg_type(), Some("0"));
        assert_eq!(reply.get(112), Some("TEST-123"));
    }

    /// A day other than `today` — deterministic regardless of when the test
    /// suite runs, unlike picking a fixed calendar day.
    fn a_day_other_than(today: crate::config::Weekday) -> crate::config::Weekday {
        use crate::config::Weekday::*;
        const ALL: [crate::config::Weekday; 7] = [Sunday, Monday, Tuesday, Wednesday, Thursday, Friday, Saturday];
        let idx = ALL.iter().position(|d| *d == today).unwrap();
        ALL[(idx + 1) % 7]
    }

    #[tokio::test]
    async fn logon_outside_session_time_window_is_refused() {
        let today = crate::time::today_weekday(false);
        let other_day = a_day_other_than(today);
        let config = SessionConfig {
            role: SessionRole::Acceptor,
            session_time: Some(crate::config::TimeRange::weekly(
                chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
                other_day,
                other_day,
            )),
            ..SessionConfig::default()
        };
        let session = Arc::new(Session::new(
            SessionId::new("FIX.4.4", "US", "THEM"),
            config,
            Arc::new(DataDictionary::empty()),
            Arc::new(DataDictionary::empty()),
            Arc::new(InMemoryMessageStore::new()),
            Box::new(TracingLog),
            Arc::new(NullApplication),
        ));
        let responder = Arc::new(RecordingResponder::new());
        session.bind_responder(responder.clone()).await;

        assert!(!session.is_in_session_time());
        session.next(inbound_logon(1, "THEM", "US", 30)).await.unwrap();

        assert!(!session.is_logged_on().await);
        let sent = responder.sent_messages().await;
        assert_eq!(sent.len(), 1);
        let reply = Message::decode(&sent[0], &BTreeMap::new()).unwrap();
        assert_eq!(reply.msg_type(), Some("5"));
    }
}

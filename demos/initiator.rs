//! A minimal FIX initiator: dials a single configured counterparty, sends the
//! Logon, and logs every session event through `tracing`.

use async_trait::async_trait;
use fixcore::log::TracingLogFactory;
use fixcore::store::InMemoryMessageStoreFactory;
use fixcore::{
    Application, DataDictionaryProvider, Dictionary, Initiator, Message, Result, SessionFactory,
    SessionId, SessionRegistry,
};
use std::sync::Arc;

struct LoggingApplication;

#[async_trait]
impl Application for LoggingApplication {
    async fn on_create(&self, session_id: &SessionId) {
        println!("session created: {session_id}");
    }

    async fn on_logon(&self, session_id: &SessionId) {
        println!("logged on: {session_id}");
    }

    async fn on_logout(&self, session_id: &SessionId) {
        println!("logged out: {session_id}");
    }

    async fn from_app(&self, msg: &Message, session_id: &SessionId) -> Result<()> {
        println!("{session_id} <- {:?}", msg.msg_type());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let factory = SessionFactory::new(
        DataDictionaryProvider::new(),
        Arc::new(LoggingApplication),
        Arc::new(InMemoryMessageStoreFactory),
        Arc::new(TracingLogFactory),
    );

    let id = SessionId::new("FIX.4.4", "INITIATOR", "ACCEPTOR");
    let mut settings = Dictionary::new();
    settings.set("ConnectionType", "initiator").set("HeartBtInt", "30");
    let session = Arc::new(factory.create(&id, &settings).await?);

    let registry = Arc::new(SessionRegistry::new());
    let initiator = Initiator::new(registry);
    let target_addr = "127.0.0.1:9876".parse().expect("valid target address");
    initiator.add_session(target_addr, session, None).await;
    initiator.start().await;
    println!("dialing {target_addr}...");
    initiator.block().await;
    Ok(())
}

//! A minimal FIX acceptor: listens on one port, accepts a single configured
//! counterparty, and logs every session event through `tracing`.

use async_trait::async_trait;
use fixcore::log::TracingLogFactory;
use fixcore::store::InMemoryMessageStoreFactory;
use fixcore::{
    Acceptor, Application, DataDictionaryProvider, Dictionary, Message, Result, SessionFactory,
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

    let id = SessionId::new("FIX.4.4", "ACCEPTOR", "INITIATOR");
    let mut settings = Dictionary::new();
    settings.set("ConnectionType", "acceptor").set("HeartBtInt", "30");
    let session = Arc::new(factory.create(&id, &settings).await?);

    let registry = Arc::new(SessionRegistry::new());
    let acceptor = Acceptor::new(registry);
    acceptor.add_session("127.0.0.1:9876".parse().expect("valid bind address"), session).await;
    acceptor.start().await.map_err(fixcore::FixError::Io)?;
    println!("acceptor listening on 127.0.0.1:9876");
    acceptor.block().await;
    Ok(())
}

#![doc = include_str!("../README.md")]
#![warn(rustdoc::broken_intra_doc_links)]
#![deny(warnings)]

pub mod acceptor;
pub mod application;
pub mod config;
pub mod connection;
pub mod dictionary;
pub mod dictionary_provider;
pub mod error;
pub mod factory;
pub mod field;
pub mod initiator;
pub mod log;
pub mod message;
pub mod messages;
pub mod parser;
pub mod registry;
pub mod responder;
pub mod session;
pub mod session_id;
pub mod store;
pub mod time;

pub use acceptor::Acceptor;
pub use application::Application;
pub use config::{ConnectionType, Dictionary, ResetPolicy, SessionSettings, TimeRange};
pub use dictionary::{DataDictionary, ValidationFlags};
pub use dictionary_provider::DataDictionaryProvider;
pub use error::{FixError, Result};
pub use factory::SessionFactory;
pub use initiator::Initiator;
pub use log::{Log, LogFactory};
pub use message::Message;
pub use registry::SessionRegistry;
pub use responder::Responder;
pub use session::{DisconnectReason, Session, SessionConfig, SessionRole};
pub use session_id::SessionId;
pub use store::{MessageStore, MessageStoreFactory};

use thiserror::Error;

/// Crate-wide error type.
///
/// Parsing, validation, and session-stepping all return `Result<T, FixError>`
/// on their hot path; only startup misconfiguration behaves like the
/// exception-heavy original engine (fail fast, abort before any session runs).
#[derive(Debug, Error)]
pub enum FixError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("data dictionary not found for {0}")]
    DataDictionaryNotFound(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("session-level reject: reason={reason} text={text}")]
    SessionReject { reason: u32, text: String },

    #[error("MsgSeqNum too low: expected {expected}, got {got}")]
    SequenceTooLow { expected: u64, got: u64 },

    #[error("MsgSeqNum too high: expected {expected}, got {got}")]
    SequenceTooHigh { expected: u64, got: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("application declined to send the message")]
    DoNotSend,

    #[error("application refused logon: {0}")]
    RejectLogon(String),

    #[error("required field not found: {0}")]
    FieldNotFound(u32),

    #[error("incorrect data format for tag {tag}: {reason}")]
    IncorrectDataFormat { tag: u32, reason: String },

    #[error("incorrect value for tag {tag}: {value}")]
    IncorrectTagValue { tag: u32, value: String },

    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FixError>;

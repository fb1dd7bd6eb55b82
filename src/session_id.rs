//! Session identity: the `(BeginString, SenderCompID, TargetCompID)` triple
//! plus an optional initiator-only qualifier, per spec §3.
//!
//! No `original_source` file covers `SessionID` (the set provided is
//! `Acceptor.cpp`, `DataDictionaryProvider.h`, `FieldConvertors.cpp`,
//! `SessionFactory.cpp`, `ThreadedSocketConnection.cpp`); the value-type
//! identity (hashable, comparable, a `Display` rendering used in log lines)
//! is built from spec.md §3 plus quickfix's documented `SessionID` shape,
//! not a cited source file. Grounded on the teacher's `storage::SessionKey`,
//! generalized with a `BeginString` and an optional qualifier.

use std::fmt;

/// Identifies one FIX session. Two `SessionId`s related by [`SessionId::swapped`]
/// are the counterparty view of the same wire conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    pub begin_string: String,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub qualifier: Option<String>,
}

impl SessionId {
    pub fn new(
        begin_string: impl Into<String>,
        sender_comp_id: impl Into<String>,
        target_comp_id: impl Into<String>,
    ) -> Self {
        Self {
            begin_string: begin_string.into(),
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// The counterparty's view of this session: Sender and Target swapped,
    /// qualifier preserved. Used by inbound-connection routing (spec §4.6)
    /// and by `Session::is_counterparty_of`.
    pub fn swapped(&self) -> SessionId {
        SessionId {
            begin_string: self.begin_string.clone(),
            sender_comp_id: self.target_comp_id.clone(),
            target_comp_id: self.sender_comp_id.clone(),
            qualifier: self.qualifier.clone(),
        }
    }

    pub fn is_fixt(&self) -> bool {
        self.begin_string == "FIXT.1.1"
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.begin_string, self.sender_comp_id, self.target_comp_id)?;
        if let Some(q) = &self.qualifier {
            write!(f, "/{q}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapped_exchanges_sender_and_target() {
        let id = SessionId::new("FIX.4.4", "INITIATOR", "ACCEPTOR");
        let swapped = id.swapped();
        assert_eq!(swapped.sender_comp_id, "ACCEPTOR");
        assert_eq!(swapped.target_comp_id, "INITIATOR");
        assert_eq!(swapped.swapped(), id);
    }

    #[test]
    fn qualifier_is_preserved_through_swap() {
        let id = SessionId::new("FIX.4.4", "A", "B").with_qualifier("Q1");
        assert_eq!(id.swapped().qualifier.as_deref(), Some("Q1"));
    }

    #[test]
    fn fixt_detection() {
        assert!(SessionId::new("FIXT.1.1", "A", "B").is_fixt());
        assert!(!SessionId::new("FIX.4.4", "A", "B").is_fixt());
    }
}

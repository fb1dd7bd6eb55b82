//! Per-session dictionary resolution: transport dictionary (by
//! `BeginString`) and application dictionary (by `ApplVerID`), split for
//! FIXT sessions (spec §4.3).
//!
//! Grounded on `original_source/src/C++/DataDictionaryProvider.h`'s two
//! independent namespaces (`addTransportDataDictionary`/
//! `addApplicationDataDictionary`, `getSessionDataDictionary`/
//! `getApplicationDataDictionary`) and its two-tier accessor contract: the
//! plain getters fall back to a shared empty dictionary, while the
//! `require*` variants raise `DataDictionaryNotFound` on a miss.

use crate::dictionary::DataDictionary;
use crate::error::{FixError, Result};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct DataDictionaryProvider {
    transport: HashMap<String, Arc<DataDictionary>>,
    application: HashMap<String, Arc<DataDictionary>>,
    empty: Arc<DataDictionary>,
}

impl DataDictionaryProvider {
    pub fn new() -> Self {
        Self { transport: HashMap::new(), application: HashMap::new(), empty: Arc::new(DataDictionary::empty()) }
    }

    /// Register `dict` under its `BeginString` for session-layer (admin)
    /// message validation.
    pub fn add_transport_dictionary(&mut self, begin_string: impl Into<String>, dict: DataDictionary) {
        self.transport.insert(begin_string.into(), Arc::new(dict));
    }

    /// Register `dict` under an `ApplVerID` for business-message validation.
    pub fn add_application_dictionary(&mut self, appl_ver_id: impl Into<String>, dict: DataDictionary) {
        self.application.insert(appl_ver_id.into(), Arc::new(dict));
    }

    /// Convenience for non-FIXT sessions: the same dictionary answers both
    /// namespaces under the version's own string (spec §4.3: "For non-FIXT
    /// sessions, both maps hold the same dictionary under BeginString and
    /// its equivalent ApplVerID").
    pub fn add_dictionary(&mut self, begin_string: impl Into<String>, dict: DataDictionary) {
        let begin_string = begin_string.into();
        let shared = Arc::new(dict);
        self.transport.insert(begin_string.clone(), shared.clone());
        self.application.insert(begin_string, shared);
    }

    pub fn get_session_dictionary(&self, begin_string: &str) -> Arc<DataDictionary> {
        self.transport.get(begin_string).cloned().unwrap_or_else(|| self.empty.clone())
    }

    pub fn get_application_dictionary(&self, appl_ver_id: &str) -> Arc<DataDictionary> {
        self.application.get(appl_ver_id).cloned().unwrap_or_else(|| self.empty.clone())
    }

    pub fn require_session_dictionary(&self, begin_string: &str) -> Result<Arc<DataDictionary>> {
        self.transport
            .get(begin_string)
            .cloned()
            .ok_or_else(|| FixError::DataDictionaryNotFound(begin_string.to_string()))
    }

    pub fn require_application_dictionary(&self, appl_ver_id: &str) -> Result<Arc<DataDictionary>> {
        self.application
            .get(appl_ver_id)
            .cloned()
            .ok_or_else(|| FixError::DataDictionaryNotFound(appl_ver_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::DataDictionary;

    #[test]
    fn missing_lookup_falls_back_to_shared_empty() {
        let provider = DataDictionaryProvider::new();
        let dict = provider.get_session_dictionary("FIX.4.4");
        assert!(dict.is_empty());
    }

    #[test]
    fn require_variants_error_on_miss() {
        let provider = DataDictionaryProvider::new();
        assert!(matches!(
            provider.require_session_dictionary("FIX.4.4"),
            Err(FixError::DataDictionaryNotFound(_))
        ));
    }

    #[test]
    fn fixt_splits_transport_and_application_namespaces() {
        let mut provider = DataDictionaryProvider::new();
        provider.add_transport_dictionary("FIXT.1.1", DataDictionary::builder("FIXT.1.1").build());
        provider.add_application_dictionary("9", DataDictionary::builder("FIX.5.0SP2").build());

        assert!(!provider.get_session_dictionary("FIXT.1.1").version.is_empty());
        assert_eq!(provider.get_application_dictionary("9").version, "FIX.5.0SP2");
        assert!(provider.get_application_dictionary("FIXT.1.1").is_empty());
    }

    #[test]
    fn non_fixt_shares_one_dictionary_across_both_namespaces() {
        let mut provider = DataDictionaryProvider::new();
        provider.add_dictionary("FIX.4.4", DataDictionary::builder("FIX.4.4").build());
        assert_eq!(provider.get_session_dictionary("FIX.4.4").version, "FIX.4.4");
        assert_eq!(provider.get_application_dictionary("FIX.4.4").version, "FIX.4.4");
    }
}

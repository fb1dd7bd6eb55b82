//! Validates and materializes one [`Session`] per configured `SessionId`
//! (spec §4.5).
//!
//! Grounded on `original_source/src/C++/SessionFactory.cpp`'s `create`: the
//! same eight checks, in the same order, each with the same rejection.
//! `m_dictionaries` there is this module's `dictionary_cache`.

use crate::application::Application;
use crate::config::{ConnectionType, Dictionary, ResetPolicy, TimeRange};
use crate::dictionary::{DataDictionary, ValidationFlags};
use crate::dictionary_provider::DataDictionaryProvider;
use crate::error::{FixError, Result};
use crate::log::LogFactory;
use crate::session::{Session, SessionConfig, SessionRole};
use crate::session_id::SessionId;
use crate::store::MessageStoreFactory;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Builds [`Session`]s from [`Dictionary`] settings, sharing a resolved
/// [`DataDictionary`] across every session that names the same path
/// (`AppDataDictionary`/`TransportDataDictionary`/`DataDictionary` value).
pub struct SessionFactory {
    provider: DataDictionaryProvider,
    application: Arc<dyn Application>,
    store_factory: Arc<dyn MessageStoreFactory>,
    log_factory: Arc<dyn LogFactory>,
    dictionary_cache: Mutex<HashMap<String, Arc<DataDictionary>>>,
}

impl SessionFactory {
    pub fn new(
        provider: DataDictionaryProvider,
        application: Arc<dyn Application>,
        store_factory: Arc<dyn MessageStoreFactory>,
        log_factory: Arc<dyn LogFactory>,
    ) -> Self {
        Self {
            provider,
            application,
            store_factory,
            log_factory,
            dictionary_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the dictionary named by `key` (an `AppDataDictionary`,
    /// `TransportDataDictionary`, or `DataDictionary` value acting as a
    /// cache key — typically a path), falling back to `resolve` to build
    /// it from the provider on the first request.
    fn cached(&self, key: &str, resolve: impl FnOnce() -> Arc<DataDictionary>) -> Arc<DataDictionary> {
        let mut cache = self.dictionary_cache.lock().unwrap();
        cache.entry(key.to_string()).or_insert_with(resolve).clone()
    }

    pub async fn create(&self, session_id: &SessionId, settings: &Dictionary) -> Result<Session> {
        // 1. ConnectionType must be acceptor or initiator.
        let connection_type = settings.connection_type()?;
        let role = match connection_type {
            ConnectionType::Acceptor => SessionRole::Acceptor,
            ConnectionType::Initiator => SessionRole::Initiator,
        };

        // 2. acceptor + SessionQualifier is a contradiction: a qualifier
        // only disambiguates multiple initiators dialing the same
        // counterparty from one process.
        if role == SessionRole::Acceptor && session_id.qualifier.is_some() {
            return Err(FixError::InvalidConfig(format!(
                "{session_id}: acceptor sessions cannot carry a SessionQualifier"
            )));
        }

        // 3. FIXT requires DefaultApplVerID.
        let default_appl_ver_id = settings.get_string_opt("DefaultApplVerID").map(str::to_string);
        if session_id.is_fixt() && default_appl_ver_id.is_none() {
            return Err(FixError::InvalidConfig(format!("{session_id}: FIXT session missing DefaultApplVerID")));
        }

        // 4. Resolve dictionaries, private flags applied to a copy.
        let flags = self.validation_flags(settings)?;
        let (transport_dictionary, application_dictionary) =
            self.resolve_dictionaries(session_id, settings, default_appl_ver_id.as_deref(), flags)?;

        // 5. StartDay/EndDay both-or-neither.
        let start_day = settings.get_day("StartDay")?;
        let end_day = settings.get_day("EndDay")?;
        if start_day.is_some() != end_day.is_some() {
            return Err(FixError::InvalidConfig(format!("{session_id}: StartDay and EndDay must be set together")));
        }

        // 6. initiator requires HeartBtInt > 0.
        let heart_bt_int = settings.get_long_opt("HeartBtInt", 30)?;
        if role == SessionRole::Initiator && heart_bt_int <= 0 {
            return Err(FixError::InvalidConfig(format!("{session_id}: initiator requires HeartBtInt > 0")));
        }

        // 7. LogonTime/LogoutTime must fall inside StartTime/EndTime.
        let session_time = self.session_time_range(settings, start_day, end_day)?;
        if let Some(range) = &session_time {
            if let Some(logon_time) = settings.get_string_opt("LogonTime") {
                let t = parse_time(session_id, "LogonTime", logon_time)?;
                if !range.contains_time_of_day(t) {
                    return Err(FixError::InvalidConfig(format!("{session_id}: LogonTime outside StartTime/EndTime window")));
                }
            }
            if let Some(logout_time) = settings.get_string_opt("LogoutTime") {
                let t = parse_time(session_id, "LogoutTime", logout_time)?;
                if !range.contains_time_of_day(t) {
                    return Err(FixError::InvalidConfig(format!("{session_id}: LogoutTime outside StartTime/EndTime window")));
                }
            }
        }

        // 8. Remaining optional flags.
        let config = SessionConfig {
            role,
            heart_bt_int: heart_bt_int as u32,
            logon_timeout_secs: settings.get_long_opt("LogonTimeout", 10)? as u32,
            logout_timeout_secs: settings.get_long_opt("LogoutTimeout", 2)? as u32,
            max_latency_secs: settings.get_long_opt("MaxLatency", 120)? as u32,
            check_comp_id: settings.get_bool("CheckCompID", true)?,
            check_latency: settings.get_bool("CheckLatency", true)?,
            validate_length_and_checksum: settings.get_bool("ValidateLengthAndChecksum", true)?,
            persist_messages: settings.get_bool("PersistMessages", true)?,
            reset: ResetPolicy {
                on_logon: settings.get_bool("ResetOnLogon", false)?,
                on_logout: settings.get_bool("ResetOnLogout", false)?,
                on_disconnect: settings.get_bool("ResetOnDisconnect", false)?,
                refresh_on_logon: settings.get_bool("RefreshOnLogon", false)?,
            },
            send_redundant_resend_requests: settings.get_bool("SendRedundantResendRequests", false)?,
            milliseconds_in_timestamp: settings.get_bool("MillisecondsInTimeStamp", false)?,
            default_appl_ver_id,
            poll_spin: settings.get_long_opt("PollSpin", 0)? as u32,
            session_time,
            use_local_time: settings.get_bool("UseLocalTime", false)?,
        };

        let store = self.store_factory.create(session_id);
        let log = self.log_factory.create(session_id);

        let session = Session::new(
            session_id.clone(),
            config,
            transport_dictionary,
            application_dictionary,
            store,
            log,
            self.application.clone(),
        );
        self.application.on_create(session_id).await;
        Ok(session)
    }

    fn validation_flags(&self, settings: &Dictionary) -> Result<ValidationFlags> {
        let defaults = ValidationFlags::default();
        Ok(ValidationFlags {
            validate_fields_out_of_order: settings.get_bool("ValidateFieldsOutOfOrder", defaults.validate_fields_out_of_order)?,
            validate_fields_have_values: settings.get_bool("ValidateFieldsHaveValues", defaults.validate_fields_have_values)?,
            validate_user_defined_fields: settings.get_bool("ValidateUserDefinedFields", defaults.validate_user_defined_fields)?,
            validate_required_fields: settings.get_bool("ValidateRequiredFields", defaults.validate_required_fields)?,
            validate_unknown_fields: settings.get_bool("ValidateUnknownFields", defaults.validate_unknown_fields)?,
            validate_unknown_msg_type: settings.get_bool("ValidateUnknownMsgType", defaults.validate_unknown_msg_type)?,
        })
    }

    fn resolve_dictionaries(
        &self,
        session_id: &SessionId,
        settings: &Dictionary,
        default_appl_ver_id: Option<&str>,
        flags: ValidationFlags,
    ) -> Result<(Arc<DataDictionary>, Arc<DataDictionary>)> {
        if !settings.get_bool("UseDataDictionary", true)? {
            let empty = Arc::new(DataDictionary::empty());
            return Ok((empty.clone(), empty));
        }

        if session_id.is_fixt() {
            let transport_key = settings.get_string_opt("TransportDataDictionary").unwrap_or(&session_id.begin_string);
            let transport = self.cached(transport_key, || self.provider.get_session_dictionary(&session_id.begin_string));

            let appl_ver_id = default_appl_ver_id.unwrap_or_default();
            let app_key_setting = format!("AppDataDictionary.{appl_ver_id}");
            let app_key = settings.get_string_opt(&app_key_setting).or_else(|| settings.get_string_opt("AppDataDictionary")).unwrap_or(appl_ver_id);
            let application = self.cached(app_key, || self.provider.get_application_dictionary(appl_ver_id));

            Ok((Arc::new(transport.with_flags(flags)), Arc::new(application.with_flags(flags))))
        } else {
            let key = settings.get_string_opt("DataDictionary").unwrap_or(&session_id.begin_string);
            let shared = self.cached(key, || self.provider.get_session_dictionary(&session_id.begin_string));
            let private = Arc::new(shared.with_flags(flags));
            Ok((private.clone(), private))
        }
    }

    fn session_time_range(
        &self,
        settings: &Dictionary,
        start_day: Option<crate::config::Weekday>,
        end_day: Option<crate::config::Weekday>,
    ) -> Result<Option<TimeRange>> {
        let (Some(start), Some(end)) = (settings.get_string_opt("StartTime"), settings.get_string_opt("EndTime")) else {
            return Ok(None);
        };
        let start = settings_time(start)?;
        let end = settings_time(end)?;
        Ok(Some(match (start_day, end_day) {
            (Some(sd), Some(ed)) => TimeRange::weekly(start, end, sd, ed),
            _ => TimeRange::daily(start, end),
        }))
    }
}

fn settings_time(raw: &str) -> Result<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .map_err(|_| FixError::InvalidConfig(format!("not HH:MM:SS: {raw}")))
}

fn parse_time(session_id: &SessionId, key: &str, raw: &str) -> Result<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .map_err(|_| FixError::InvalidConfig(format!("{session_id}: {key} is not HH:MM:SS: {raw}")))
}

//! Versioned session record envelope.
//!
//! Records are written as `{"schema_version": N, "session": {...}}`.
//! Version 1 records were bare session objects with no envelope; they still
//! load because every field added since then has a serde default.

use serde::Serialize;
use serde_json::Value;

use snre_core::{CoreError, RefactorSession};

use crate::error::StoreResult;

/// Version written by this build.
pub const SCHEMA_VERSION: u32 = 2;

/// Version assumed for records without an envelope.
pub const LEGACY_VERSION: u32 = 1;

#[derive(Serialize)]
struct Envelope<'a> {
    schema_version: u32,
    session: &'a RefactorSession,
}

/// Serialize `session` in the current envelope.
pub fn encode(session: &RefactorSession) -> StoreResult<String> {
    Ok(serde_json::to_string_pretty(&Envelope {
        schema_version: SCHEMA_VERSION,
        session,
    })?)
}

/// Parse a record of any supported version.
pub fn decode(text: &str) -> StoreResult<RefactorSession> {
    let mut value: Value = serde_json::from_str(text)?;
    let (version, session) = match value.get_mut("session") {
        Some(session) => {
            let session = session.take();
            let version = value
                .get("schema_version")
                .and_then(Value::as_u64)
                .unwrap_or(LEGACY_VERSION as u64);
            (version, session)
        }
        None => (LEGACY_VERSION as u64, value),
    };

    if version > SCHEMA_VERSION as u64 {
        return Err(CoreError::UnsupportedSchema {
            found: version.min(u32::MAX as u64) as u32,
            supported: SCHEMA_VERSION,
        }
        .into());
    }
    Ok(serde_json::from_value(session)?)
}

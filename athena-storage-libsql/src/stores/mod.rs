//! Store trait implementations over libSQL.

mod episodic;
mod graph;
mod meta;
mod procedural;
mod prospective;
mod semantic;
mod session;
mod working;

pub use episodic::LibsqlEpisodicStore;
pub use graph::LibsqlGraphStore;
pub use meta::LibsqlMetaStore;
pub use procedural::LibsqlProceduralStore;
pub use prospective::LibsqlProspectiveStore;
pub use semantic::LibsqlSemanticStore;
pub use session::{LibsqlCursorStore, LibsqlSessionStore};
pub use working::LibsqlWorkingStore;

use athena_core::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Epoch milliseconds for storage
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Timestamp from stored epoch milliseconds
pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Parse a stored UUID column
pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Storage(format!("bad uuid in row: {e}")))
}

/// Parse an optional stored UUID column
pub(crate) fn parse_uuid_opt(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.map(|s| parse_uuid(&s)).transpose()
}

/// Parse a JSON TEXT column
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::Storage(format!("bad json in row: {e}")))
}

/// Serialize a JSON TEXT column
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Error::Serialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip() {
        let now = Utc::now();
        let back = from_millis(to_millis(now));
        assert!((now - back).num_milliseconds().abs() < 2);
    }

    #[test]
    fn test_parse_uuid_rejects_garbage() {
        assert!(parse_uuid("not-a-uuid").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid(&id.to_string()).unwrap(), id);
    }
}

//! Snapshot identifiers
//!
//! A snapshot is addressed solely by its creation time rendered as a fixed
//! width `YYYYmmddHHMMSS` string (UTC), so lexical and chronological order
//! coincide. The stored object for a snapshot is `<id>.zip`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// strftime format of a snapshot id
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Extension of stored snapshot archives
pub const ARCHIVE_EXT: &str = ".zip";

const ID_LEN: usize = 14;

/// Sortable, timestamp-derived snapshot identifier
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Build the id for a snapshot created at `ts` (sub-second precision is dropped)
    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self(ts.format(TIMESTAMP_FORMAT).to_string())
    }

    /// Parse a strict 14-digit id
    pub fn parse(s: &str) -> Result<Self, InvalidSnapshotId> {
        if s.len() != ID_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidSnapshotId(s.to_string()));
        }
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map_err(|_| InvalidSnapshotId(s.to_string()))?;
        Ok(Self(s.to_string()))
    }

    /// Parse an id that may carry the archive extension (legacy index entries)
    pub fn parse_lenient(s: &str) -> Result<Self, InvalidSnapshotId> {
        Self::parse(s.strip_suffix(ARCHIVE_EXT).unwrap_or(s))
    }

    /// Derive an id from an object key such as `20240101120000.zip`
    ///
    /// Returns `None` for keys that are not snapshot archives.
    pub fn from_key(key: &str) -> Option<Self> {
        let stem = key.strip_suffix(ARCHIVE_EXT)?;
        Self::parse(stem).ok()
    }

    /// Object key under which this snapshot is stored
    pub fn key(&self) -> String {
        format!("{}{}", self.0, ARCHIVE_EXT)
    }

    /// Creation time encoded in the id
    pub fn created_at(&self) -> DateTime<Utc> {
        // Validated on construction
        let naive = NaiveDateTime::parse_from_str(&self.0, TIMESTAMP_FORMAT)
            .unwrap_or_default();
        Utc.from_utc_datetime(&naive)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotId({})", self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = InvalidSnapshotId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = InvalidSnapshotId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        id.0
    }
}

/// A string that is not a `YYYYmmddHHMMSS` snapshot id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid snapshot id '{0}' (expected YYYYmmddHHMMSS)")]
pub struct InvalidSnapshotId(pub String);

/// One immutable point-in-time backup artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot for an archive created at `now`
    pub fn at(now: DateTime<Utc>) -> Self {
        let id = SnapshotId::from_datetime(now);
        let created_at = id.created_at();
        Self { id, created_at }
    }
}

impl From<SnapshotId> for Snapshot {
    fn from(id: SnapshotId) -> Self {
        let created_at = id.created_at();
        Self { id, created_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ts(s: &str) -> DateTime<Utc> {
        Utc.from_utc_datetime(&NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap())
    }

    #[test]
    fn test_id_from_datetime() {
        let id = SnapshotId::from_datetime(ts("20240315093000"));
        assert_eq!(id.as_str(), "20240315093000");
        assert_eq!(id.key(), "20240315093000.zip");
        assert_eq!(id.created_at(), ts("20240315093000"));
    }

    #[test]
    fn test_lexical_order_matches_time() {
        let base = ts("20231231235959");
        let a = SnapshotId::from_datetime(base);
        let b = SnapshotId::from_datetime(base + Duration::seconds(1));
        let c = SnapshotId::from_datetime(base + Duration::days(400));
        assert!(a < b && b < c);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SnapshotId::parse("2024").is_err());
        assert!(SnapshotId::parse("20241399000000").is_err());
        assert!(SnapshotId::parse("2024010100000a").is_err());
        assert!(SnapshotId::parse("20240101000000.zip").is_err());
    }

    #[test]
    fn test_parse_lenient_strips_extension() {
        let id = SnapshotId::parse_lenient("20240101000000.zip").unwrap();
        assert_eq!(id.as_str(), "20240101000000");
    }

    #[test]
    fn test_from_key() {
        assert_eq!(
            SnapshotId::from_key("20240101000000.zip").map(String::from),
            Some("20240101000000".to_string())
        );
        assert!(SnapshotId::from_key("backups_tracker.json").is_none());
        assert!(SnapshotId::from_key("20240101000000").is_none());
        assert!(SnapshotId::from_key("notatime.zip").is_none());
    }

    #[test]
    fn test_serde_validates() {
        let id: SnapshotId = serde_json::from_str("\"20240101000000\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"20240101000000\"");
        assert!(serde_json::from_str::<SnapshotId>("\"yesterday\"").is_err());
    }
}

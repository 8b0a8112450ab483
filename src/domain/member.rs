//! Member reports and the records the registry keeps for them

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Report fields the hub owns; a member cannot smuggle these in through `extra`
const RESERVED_FIELDS: &[&str] = &["task", "timestamp"];

/// Errors raised while accepting a member report at the ingestion boundary
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Malformed member report: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Member id must not be empty")]
    EmptyId,
}

/// Largest magnitude an `f64` holds as an exact integer (2^53)
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Write whole-number coordinates as JSON integers so `1` stays `1` on the wire
pub(crate) fn serialize_coord<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// A member's authoritative 3D position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "xCoord", serialize_with = "serialize_coord")]
    pub x: f64,
    #[serde(rename = "yCoord", serialize_with = "serialize_coord")]
    pub y: f64,
    #[serde(rename = "zCoord", serialize_with = "serialize_coord")]
    pub z: f64,
}

impl Location {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// 2D position of a tracked mobile
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    #[serde(serialize_with = "serialize_coord")]
    pub x: f64,
    #[serde(serialize_with = "serialize_coord")]
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// What a member sends on every report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberReport {
    pub id: String,

    pub location: Location,

    #[serde(default)]
    pub mobiles: IndexMap<String, Point2>,

    #[serde(default)]
    pub is_leader: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Fields the hub does not interpret, passed through to the policy engine
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemberReport {
    /// Create a report with no mobiles, not leading
    pub fn new(id: impl Into<String>, location: Location) -> Self {
        Self {
            id: id.into(),
            location,
            mobiles: IndexMap::new(),
            is_leader: false,
            name: None,
            extra: Map::new(),
        }
    }

    /// Builder: mark as leader
    pub fn with_leader(mut self, is_leader: bool) -> Self {
        self.is_leader = is_leader;
        self
    }

    /// Builder: set display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: add a tracked mobile
    pub fn with_mobile(mut self, id: impl Into<String>, position: Point2) -> Self {
        self.mobiles.insert(id.into(), position);
        self
    }

    /// Parse and validate a raw request body
    pub fn from_slice(body: &[u8]) -> Result<Self, IngestError> {
        let report: Self = serde_json::from_slice(body)?;
        report.validate()?;
        debug!(member_id = %report.id, mobiles = report.mobiles.len(), "MemberReport::from_slice: accepted");
        Ok(report)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.id.trim().is_empty() {
            return Err(IngestError::EmptyId);
        }
        Ok(())
    }

    /// Compact `{id, location}` view used in log lines
    pub fn brief(&self) -> Value {
        serde_json::json!({ "id": self.id, "location": self.location })
    }
}

/// The registry's view of one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub id: String,

    pub location: Location,

    #[serde(default)]
    pub mobiles: IndexMap<String, Point2>,

    #[serde(default)]
    pub is_leader: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Last policy-engine verdict; carried over by every report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Value>,

    /// Unix ms of the last upsert
    #[serde(rename = "timestamp")]
    pub last_seen: i64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemberRecord {
    /// First sighting of a member; no task yet
    pub fn from_report(report: MemberReport, now_ms: i64) -> Self {
        let mut record = Self {
            id: report.id.clone(),
            location: Location::default(),
            mobiles: IndexMap::new(),
            is_leader: false,
            name: None,
            task: None,
            last_seen: now_ms,
            extra: Map::new(),
        };
        record.apply_report(report, now_ms);
        record
    }

    /// Replace every reported field, keeping `task`
    pub fn apply_report(&mut self, report: MemberReport, now_ms: i64) {
        let MemberReport {
            id,
            location,
            mobiles,
            is_leader,
            name,
            mut extra,
        } = report;

        for field in RESERVED_FIELDS {
            extra.remove(*field);
        }

        self.id = id;
        self.location = location;
        self.mobiles = mobiles;
        self.is_leader = is_leader;
        self.name = name;
        self.extra = extra;
        self.last_seen = now_ms;
    }

    /// Milliseconds since the last report
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.last_seen
    }

    /// Whether the record has outlived `stale_after_ms`
    pub fn is_stale(&self, now_ms: i64, stale_after_ms: i64) -> bool {
        self.age_ms(now_ms) > stale_after_ms
    }

    /// Compact `{id, position}` view used in log lines
    pub fn brief(&self) -> Value {
        serde_json::json!({ "id": self.id, "position": self.location })
    }
}

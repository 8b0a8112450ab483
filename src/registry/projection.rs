//! Read-only views derived from a registry snapshot
//!
//! Recomputed on every broadcast; nothing here is cached.

use serde::{Deserialize, Serialize};

use crate::domain::{MemberRecord, serialize_coord};

/// Position as observers see it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(serialize_with = "serialize_coord")]
    pub x: f64,
    #[serde(serialize_with = "serialize_coord")]
    pub y: f64,
    #[serde(serialize_with = "serialize_coord")]
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemberState {
    pub position: Position,
}

/// One row of the `members` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub serial: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub state: MemberState,
    pub leader: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridCellKind {
    Leader,
    Member,
    Mobile,
}

/// One entry of the `grid-update` envelope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    #[serde(serialize_with = "serialize_coord")]
    pub x: f64,
    #[serde(serialize_with = "serialize_coord")]
    pub y: f64,
    #[serde(rename = "type")]
    pub kind: GridCellKind,
}

/// Member summary view: id, name, position, leader flag
pub fn member_summaries(records: &[MemberRecord]) -> Vec<MemberSummary> {
    records
        .iter()
        .map(|record| MemberSummary {
            serial: record.id.clone(),
            name: record.name.clone(),
            state: MemberState {
                position: Position {
                    x: record.location.x,
                    y: record.location.y,
                    z: record.location.z,
                },
            },
            leader: record.is_leader,
        })
        .collect()
}

/// Spatial grid view: each member's position followed by its mobiles
pub fn grid_cells(records: &[MemberRecord]) -> Vec<GridCell> {
    records
        .iter()
        .flat_map(|record| {
            let kind = if record.is_leader {
                GridCellKind::Leader
            } else {
                GridCellKind::Member
            };
            std::iter::once(GridCell {
                x: record.location.x,
                y: record.location.y,
                kind,
            })
            .chain(record.mobiles.values().map(|mobile| GridCell {
                x: mobile.x,
                y: mobile.y,
                kind: GridCellKind::Mobile,
            }))
        })
        .collect()
}

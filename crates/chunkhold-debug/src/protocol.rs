//! Debug protocol - line-delimited JSON commands and responses

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Commands sent by a debug client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum DebugCommand {
    /// Health check
    Ping,
    /// One-line residency summary
    Describe,
    /// Residency counters
    GetStats,
    /// State of one tile (if resident)
    GetTileInfo { x: i32, z: i32 },
}

/// Responses from debug server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum DebugResponse {
    #[serde(rename = "ok")]
    Ok { data: ResponseData },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    None,
    Pong { message: String },
    Summary {
        description: String,
        resident: usize,
        queued: usize,
        pending_loads: usize,
        world_time: u64,
    },
    Stats {
        world_time: u64,
        counters: BTreeMap<String, u64>,
    },
    TileInfo(TileInfo),
}

/// Snapshot of one tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileInfo {
    pub x: i32,
    pub z: i32,
    pub resident: bool,
    pub queued: bool,
    pub dirty: bool,
    pub populated: bool,
    pub neighbor_count: u32,
    pub object_count: usize,
    pub last_saved: u64,
}

impl TileInfo {
    /// Info for a tile that is not resident
    pub fn absent(x: i32, z: i32) -> Self {
        Self {
            x,
            z,
            resident: false,
            queued: false,
            dirty: false,
            populated: false,
            neighbor_count: 0,
            object_count: 0,
            last_saved: 0,
        }
    }
}

impl DebugResponse {
    pub fn ok(data: ResponseData) -> Self {
        Self::Ok { data }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error {
            message: msg.into(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(ResponseData::Pong {
            message: "pong".into(),
        })
    }

    pub fn none() -> Self {
        Self::ok(ResponseData::None)
    }
}

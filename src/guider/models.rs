// Wire shapes of the PHD2 JSON-RPC protocol and the values the bridge hands out.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Outgoing JSON-RPC request, one per line.
#[derive(Serialize, Debug)]
pub struct RpcRequest<'a> {
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

/// Response to a request. PHD2 sets exactly one of `result` and `error`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Option<u64>,
}

impl RpcResponse {
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        Self {
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    pub message: String,
}

// `get_star_image` result body.
#[derive(Deserialize, Debug, Clone)]
pub(super) struct StarImageResult {
    #[serde(default)]
    pub frame: u64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub star_pos: Option<[f64; 2]>,
    #[serde(default)]
    pub pixels: Option<String>,
}

// `save_image` result body.
#[derive(Deserialize, Debug, Clone)]
pub(super) struct SaveImageResult {
    pub filename: Option<PathBuf>,
}

/// Frame fetched straight from the guider's memory.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveFrame {
    pub frame: u64,
    pub width: u32,
    pub height: u32,
    pub star_position: Option<[f64; 2]>,
    pub pixels_base64: String,
}

impl From<StarImageResult> for LiveFrame {
    fn from(value: StarImageResult) -> Self {
        Self {
            frame: value.frame,
            width: value.width,
            height: value.height,
            star_position: value.star_pos,
            pixels_base64: value.pixels.unwrap_or_default(),
        }
    }
}

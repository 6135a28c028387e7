// Request and response models for the web server

use serde::{Deserialize, Serialize};

/// Every endpoint answers `{"success": bool, ...}` with the body's fields inlined.
#[derive(Serialize, Debug)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(flatten)]
    pub body: T,
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Serialize, Debug)]
pub struct StateBody {
    pub state: String,
}

#[derive(Serialize, Debug)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct ImageBody {
    pub width: u32,
    pub height: u32,
    /// Base64 PNG; clients display it as `data:image/png;base64,...`.
    pub image: String,
}

// Query values are parsed leniently: anything unparsable falls back to the default.

/// Query parameters for /phd2/save-image
#[derive(Deserialize, Debug, Default)]
pub struct SaveImageQuery {
    pub black: Option<String>,
    pub midtone: Option<String>,
}

/// Query parameters for /phd2/set_exposure
#[derive(Deserialize, Debug, Default)]
pub struct ExposureQuery {
    pub ms: Option<String>,
}

pub fn parse_lenient<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

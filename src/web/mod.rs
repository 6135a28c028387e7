// Web server module
// HTTP API endpoints bridging to PHD2, plus optional static serving of the client app

mod app;
mod error;
mod handlers;
mod listeners;
mod models;

pub use app::{api_router, create_app, router};
pub use error::ApiError;
pub use listeners::create_listener;

use crate::pipeline::ImagePipeline;

/// Shared state handed to every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: ImagePipeline,
}

impl AppState {
    pub fn new(pipeline: ImagePipeline) -> Self {
        Self { pipeline }
    }
}

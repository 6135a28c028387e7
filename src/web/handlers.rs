// API handlers for the PHD2 endpoints

use super::{AppState, error::ApiError, models::*};
use crate::guider::GuiderError;
use crate::imaging::{EncodedImage, StretchParameters};
use crate::pipeline::PipelineError;
use axum::{
    Json,
    extract::{OriginalUri, Query, State},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_EXPOSURE_MS: u32 = 2000;

fn success<T: Serialize>(body: T) -> Response {
    Json(Envelope {
        success: true,
        body,
    })
    .into_response()
}

fn failure(error: impl ToString) -> Response {
    Json(Envelope {
        success: false,
        body: ErrorBody {
            error: error.to_string(),
        },
    })
    .into_response()
}

// Guider-side failures are reported in the body; transport trouble is a 500.
fn guider_failure(err: GuiderError, message: &'static str) -> Result<Response, ApiError> {
    match err {
        GuiderError::NotConnected | GuiderError::Rpc(_) | GuiderError::EmptyResponse => {
            Ok(failure(err))
        }
        other => Err(ApiError::Internal {
            message,
            cause: other.to_string(),
        }),
    }
}

fn image_result(result: Result<EncodedImage, PipelineError>) -> Result<Response, ApiError> {
    match result {
        Ok(image) => Ok(success(ImageBody {
            width: image.width,
            height: image.height,
            image: image.base64,
        })),
        Err(PipelineError::Internal(cause)) => Err(ApiError::Internal {
            message: "internal error during image retrieval",
            cause,
        }),
        Err(err) => Ok(failure(err)),
    }
}

// --- GET /phd2/state ---
pub async fn get_state(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.pipeline.bridge().app_state().await {
        Ok(app_state) => Ok(success(StateBody { state: app_state })),
        Err(err) => guider_failure(err, "failed to retrieve PHD2 state"),
    }
}

// --- GET /phd2/stop ---
pub async fn stop_guiding(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.pipeline.bridge().stop_guiding().await {
        Ok(()) => Ok(success(MessageBody {
            message: "Guiding stopped.".to_string(),
        })),
        Err(err) => guider_failure(err, "internal error while stopping guiding"),
    }
}

// --- GET /phd2/set_exposure?ms=N ---
pub async fn set_exposure(
    State(state): State<AppState>,
    Query(query): Query<ExposureQuery>,
) -> Result<Response, ApiError> {
    let exposure_ms = parse_lenient(query.ms.as_deref()).unwrap_or(DEFAULT_EXPOSURE_MS);
    debug!("Set exposure request: {} ms", exposure_ms);

    match state.pipeline.bridge().set_exposure(exposure_ms).await {
        Ok(()) => Ok(success(MessageBody {
            message: format!("Exposure set to {} ms.", exposure_ms),
        })),
        Err(err) => guider_failure(err, "failed to set exposure"),
    }
}

// --- GET /phd2/starimage ---
// Current star image from PHD2's memory, stretched and PNG encoded
pub async fn star_image(State(state): State<AppState>) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    info!("Star image request: request_id={}", request_id);

    let result = state.pipeline.live_preview().await;
    info!(
        "Star image request finished: request_id={}, success={}",
        request_id,
        result.is_ok()
    );
    image_result(result)
}

// --- GET /phd2/save-image?black=F&midtone=F ---
// Has PHD2 save the current frame, then returns it stretched and PNG encoded
pub async fn save_image(
    State(state): State<AppState>,
    Query(query): Query<SaveImageQuery>,
) -> Result<Response, ApiError> {
    let params = StretchParameters::new(
        parse_lenient(query.black.as_deref()),
        parse_lenient(query.midtone.as_deref()),
    );

    let request_id = Uuid::new_v4();
    info!(
        "Save image request: request_id={}, black={}, midtone={}",
        request_id, params.black_point, params.midtone
    );

    let result = state.pipeline.saved_frame(params).await;
    info!(
        "Save image request finished: request_id={}, success={}",
        request_id,
        result.is_ok()
    );
    image_result(result)
}

pub async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(format!("No API endpoint at {}", uri.path()))
}

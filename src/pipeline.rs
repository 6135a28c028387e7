// Guide-frame retrieval: guider bridge -> pixel decoding -> stretch -> PNG.
//
// Both operations make exactly one guider call and never retry. Outcomes are folded
// into `PipelineError` so the HTTP layer only has to pick a status code.

use crate::guider::{GuiderBridge, GuiderError};
use crate::imaging::{
    CodecError, EncodedImage, RawFrame, StretchParameters, decode_base64, encode_png_base64,
    stretch,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The selected guider is missing or is not PHD2.
    NotConnected,
    /// PHD2 produced no usable live frame.
    NoImageData,
    /// PHD2 could not save a frame, or the saved file could not be read.
    SaveFailed,
    /// Transport failure, timeout or a decode/stretch/encode failure.
    Internal(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "PHD2 not connected"),
            Self::NoImageData => write!(f, "no image data"),
            Self::SaveFailed => write!(f, "could not save or load image"),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<CodecError> for PipelineError {
    fn from(err: CodecError) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

/// Single-slot record of the last frame file PHD2 saved for us.
///
/// The lock is held for the whole save -> read -> delete sequence, so concurrent
/// save requests run one after another instead of deleting each other's files.
#[derive(Clone, Default, Debug)]
pub struct LastSavedFrame(Arc<Mutex<Option<PathBuf>>>);

impl LastSavedFrame {
    pub async fn path(&self) -> Option<PathBuf> {
        self.0.lock().await.clone()
    }
}

#[derive(Clone, Debug)]
pub struct ImagePipeline {
    bridge: GuiderBridge,
    last_saved: LastSavedFrame,
}

impl ImagePipeline {
    pub fn new(bridge: GuiderBridge, last_saved: LastSavedFrame) -> Self {
        Self { bridge, last_saved }
    }

    pub fn bridge(&self) -> &GuiderBridge {
        &self.bridge
    }

    pub fn last_saved(&self) -> &LastSavedFrame {
        &self.last_saved
    }

    /// Fetches PHD2's current star image and renders it with the live-preview stretch.
    pub async fn live_preview(&self) -> Result<EncodedImage, PipelineError> {
        let frame = self.bridge.live_frame().await.map_err(|err| match err {
            GuiderError::NotConnected => PipelineError::NotConnected,
            GuiderError::Rpc(_) | GuiderError::EmptyResponse => {
                info!("PHD2 returned no star image: {}", err);
                PipelineError::NoImageData
            }
            other => PipelineError::Internal(other.to_string()),
        })?;

        if frame.pixels_base64.trim_end_matches('\0').is_empty() {
            info!(
                "PHD2 star image {} ({}x{}) carries no pixel data",
                frame.frame, frame.width, frame.height
            );
            return Err(PipelineError::NoImageData);
        }

        debug!(
            "Star image {}: {}x{}, star at {:?}",
            frame.frame, frame.width, frame.height, frame.star_position
        );

        run_blocking(move || {
            let bytes = decode_base64(&frame.pixels_base64)?;
            let raw = RawFrame::from_le_bytes(&bytes, frame.width, frame.height)?;
            render(&raw, StretchParameters::LIVE_PREVIEW)
        })
        .await
    }

    /// Has PHD2 save its current frame, then renders the file and deletes it.
    ///
    /// The file carries no dimensions, so the frame is assumed to be square
    /// (see [`RawFrame::square_from_le_bytes`]).
    pub async fn saved_frame(
        &self,
        params: StretchParameters,
    ) -> Result<EncodedImage, PipelineError> {
        let mut last_saved = self.last_saved.0.lock().await;

        let path = match self.bridge.save_frame().await {
            Ok(Some(path)) => path,
            Ok(None) => {
                info!("PHD2 did not report a saved file name");
                return Err(PipelineError::SaveFailed);
            }
            Err(GuiderError::NotConnected) => return Err(PipelineError::NotConnected),
            Err(err @ (GuiderError::Rpc(_) | GuiderError::EmptyResponse)) => {
                info!("PHD2 could not save the current frame: {}", err);
                return Err(PipelineError::SaveFailed);
            }
            Err(other) => return Err(PipelineError::Internal(other.to_string())),
        };

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            info!("Saved frame {} does not exist", path.display());
            return Err(PipelineError::SaveFailed);
        }
        *last_saved = Some(path.clone());

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.len() >= 2 => bytes,
            Ok(_) => {
                info!("Saved frame {} holds no pixels", path.display());
                remove_frame_file(&path).await;
                return Err(PipelineError::SaveFailed);
            }
            Err(e) => {
                info!("Failed to read saved frame {}: {}", path.display(), e);
                remove_frame_file(&path).await;
                return Err(PipelineError::SaveFailed);
            }
        };

        let encoded = run_blocking(move || {
            let raw = RawFrame::square_from_le_bytes(&bytes);
            render(&raw, params)
        })
        .await;

        remove_frame_file(&path).await;
        encoded
    }
}

fn render(frame: &RawFrame, params: StretchParameters) -> Result<EncodedImage, CodecError> {
    let image = stretch(frame, params)?;
    encode_png_base64(&image)
}

// Stretch and PNG encoding are CPU-bound; keep them off the async workers.
async fn run_blocking<F>(job: F) -> Result<EncodedImage, PipelineError>
where
    F: FnOnce() -> Result<EncodedImage, CodecError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| PipelineError::Internal(format!("image task failed: {}", e)))?
        .map_err(PipelineError::from)
}

// Failing to clean up never fails the request.
async fn remove_frame_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Could not delete saved frame {}: {}", path.display(), e);
    }
}

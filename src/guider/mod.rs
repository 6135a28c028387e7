// Bridge to the external guiding process.
//
// The host can have any guider selected, but only PHD2 speaks the protocol used here.
// Every other selection answers with `GuiderError::NotConnected`.

mod models;
mod phd2;

pub use models::{LiveFrame, RpcError, RpcRequest, RpcResponse};
pub use phd2::{Phd2Client, Phd2Config};

use async_trait::async_trait;
use serde_json::{Value, json};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Request/response channel to a PHD2 instance.
#[async_trait]
pub trait Phd2Transport: Send + Sync {
    async fn call(&self, method: &str, params: Option<Value>) -> Result<RpcResponse, GuiderError>;
}

/// The guider currently selected on the host.
#[derive(Clone)]
pub enum GuiderDevice {
    Phd2(Arc<dyn Phd2Transport>),
    /// A guider driver that does not speak PHD2 JSON-RPC.
    Other(String),
    Disconnected,
}

impl GuiderDevice {
    /// Picks the device variant from a configured guider name.
    pub fn from_name(name: &str, phd2: impl FnOnce() -> Arc<dyn Phd2Transport>) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "phd2" => GuiderDevice::Phd2(phd2()),
            "" | "none" => GuiderDevice::Disconnected,
            _ => GuiderDevice::Other(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GuiderDevice::Phd2(_) => "PHD2",
            GuiderDevice::Other(name) => name,
            GuiderDevice::Disconnected => "none",
        }
    }
}

impl fmt::Debug for GuiderDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GuiderDevice").field(&self.name()).finish()
    }
}

#[derive(Debug)]
pub enum GuiderError {
    /// No guider selected, or the selected one is not PHD2.
    NotConnected,
    /// PHD2 answered with an error payload.
    Rpc(RpcError),
    /// PHD2 answered with neither a result nor an error.
    EmptyResponse,
    Transport(std::io::Error),
    Malformed(serde_json::Error),
    Timeout(Duration),
}

impl fmt::Display for GuiderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "PHD2 not connected"),
            Self::Rpc(e) => write!(f, "{}", e.message),
            Self::EmptyResponse => write!(f, "no response from PHD2"),
            Self::Transport(e) => write!(f, "PHD2 connection error: {}", e),
            Self::Malformed(e) => write!(f, "malformed PHD2 message: {}", e),
            Self::Timeout(d) => write!(f, "PHD2 did not answer within {:?}", d),
        }
    }
}

impl std::error::Error for GuiderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GuiderError {
    fn from(err: std::io::Error) -> Self {
        GuiderError::Transport(err)
    }
}

impl From<serde_json::Error> for GuiderError {
    fn from(err: serde_json::Error) -> Self {
        GuiderError::Malformed(err)
    }
}

/// Typed PHD2 operations with a bounded wait on every call.
#[derive(Clone, Debug)]
pub struct GuiderBridge {
    device: GuiderDevice,
    call_timeout: Duration,
}

impl GuiderBridge {
    pub fn new(device: GuiderDevice, call_timeout: Duration) -> Self {
        Self {
            device,
            call_timeout,
        }
    }

    pub fn device(&self) -> &GuiderDevice {
        &self.device
    }

    // Returns the `result` member, or the error payload as `GuiderError::Rpc`.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, GuiderError> {
        let GuiderDevice::Phd2(transport) = &self.device else {
            return Err(GuiderError::NotConnected);
        };

        debug!("PHD2 call: {}", method);
        let response = tokio::time::timeout(self.call_timeout, transport.call(method, params))
            .await
            .map_err(|_| GuiderError::Timeout(self.call_timeout))??;

        match response.error {
            Some(error) => Err(GuiderError::Rpc(error)),
            None => Ok(response.result),
        }
    }

    pub async fn app_state(&self) -> Result<String, GuiderError> {
        match self.call("get_app_state", None).await? {
            Some(Value::String(state)) => Ok(state),
            Some(Value::Null) | None => Err(GuiderError::EmptyResponse),
            Some(other) => Ok(other.to_string()),
        }
    }

    pub async fn stop_guiding(&self) -> Result<(), GuiderError> {
        self.call("stop_capture", None).await.map(|_| ())
    }

    pub async fn set_exposure(&self, milliseconds: u32) -> Result<(), GuiderError> {
        self.call("set_exposure", Some(json!([milliseconds])))
            .await
            .map(|_| ())
    }

    pub async fn live_frame(&self) -> Result<LiveFrame, GuiderError> {
        let result = self
            .call("get_star_image", None)
            .await?
            .ok_or(GuiderError::EmptyResponse)?;
        let image: models::StarImageResult = serde_json::from_value(result)?;
        Ok(image.into())
    }

    /// Asks PHD2 to write the current guide frame to a temporary file.
    /// Returns the path PHD2 reports, which may be empty.
    pub async fn save_frame(&self) -> Result<Option<PathBuf>, GuiderError> {
        let result = self
            .call("save_image", None)
            .await?
            .ok_or(GuiderError::EmptyResponse)?;
        let saved: models::SaveImageResult = serde_json::from_value(result)?;
        Ok(saved.filename.filter(|path| !path.as_os_str().is_empty()))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StubPhd2;
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn disconnected(device: GuiderDevice) -> GuiderBridge {
        GuiderBridge::new(device, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_non_phd2_devices_are_not_connected() {
        for device in [
            GuiderDevice::Disconnected,
            GuiderDevice::Other("Direct Guider".into()),
        ] {
            let bridge = disconnected(device);
            assert!(matches!(
                bridge.app_state().await,
                Err(GuiderError::NotConnected)
            ));
            assert!(matches!(
                bridge.live_frame().await,
                Err(GuiderError::NotConnected)
            ));
            assert!(matches!(
                bridge.save_frame().await,
                Err(GuiderError::NotConnected)
            ));
        }
    }

    #[tokio::test]
    async fn test_app_state() {
        let bridge = StubPhd2::new()
            .respond("get_app_state", RpcResponse::success(json!("Guiding")))
            .into_bridge();
        assert_eq!(bridge.app_state().await.unwrap(), "Guiding");
    }

    #[tokio::test]
    async fn test_app_state_without_result() {
        let bridge = StubPhd2::new()
            .respond("get_app_state", RpcResponse::default())
            .into_bridge();
        assert!(matches!(
            bridge.app_state().await,
            Err(GuiderError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn test_error_payload_is_kept_verbatim() {
        let bridge = StubPhd2::new()
            .respond(
                "stop_capture",
                RpcResponse::failure(1, "cannot stop while calibrating"),
            )
            .into_bridge();
        let err = assert_err!(bridge.stop_guiding().await);
        assert_eq!(err.to_string(), "cannot stop while calibrating");
    }

    #[tokio::test]
    async fn test_set_exposure_sends_milliseconds() {
        let stub = Arc::new(
            StubPhd2::new().respond("set_exposure", RpcResponse::success(json!(0))),
        );
        let bridge = GuiderBridge::new(GuiderDevice::Phd2(stub.clone()), Duration::from_secs(1));

        assert_ok!(bridge.set_exposure(2000).await);
        let calls = stub.calls.lock().unwrap();
        assert_eq!(calls[0], ("set_exposure".to_string(), Some(json!([2000]))));
    }

    #[tokio::test]
    async fn test_live_frame_parses_star_image() {
        let bridge = StubPhd2::new()
            .respond(
                "get_star_image",
                RpcResponse::success(json!({
                    "frame": 7,
                    "width": 4,
                    "height": 2,
                    "star_pos": [1.5, 0.5],
                    "pixels": "AAAAAA=="
                })),
            )
            .into_bridge();

        let frame = bridge.live_frame().await.unwrap();
        assert_eq!(frame.frame, 7);
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.star_position, Some([1.5, 0.5]));
        assert_eq!(frame.pixels_base64, "AAAAAA==");
    }

    #[tokio::test]
    async fn test_save_frame_empty_filename() {
        let bridge = StubPhd2::new()
            .respond("save_image", RpcResponse::success(json!({ "filename": "" })))
            .into_bridge();
        assert_eq!(bridge.save_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_calls_are_not_retried() {
        let stub = Arc::new(
            StubPhd2::new().respond("stop_capture", RpcResponse::failure(1, "not guiding")),
        );
        let bridge = GuiderBridge::new(GuiderDevice::Phd2(stub.clone()), Duration::from_secs(1));

        assert_err!(bridge.stop_guiding().await);
        assert_err!(bridge.app_state().await);
        assert_err!(bridge.live_frame().await);
        assert_err!(bridge.save_frame().await);

        for method in ["stop_capture", "get_app_state", "get_star_image", "save_image"] {
            assert_eq!(stub.call_count(method), 1, "{}", method);
        }
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let stub = StubPhd2::with_delay(Duration::from_secs(5))
            .respond("get_app_state", RpcResponse::success(json!("Looping")));
        let bridge = GuiderBridge::new(
            GuiderDevice::Phd2(Arc::new(stub)),
            Duration::from_millis(50),
        );
        assert!(matches!(
            bridge.app_state().await,
            Err(GuiderError::Timeout(_))
        ));
    }

    #[test]
    fn test_device_from_name() {
        let phd2 = || Arc::new(StubPhd2::new()) as Arc<dyn Phd2Transport>;
        assert!(matches!(
            GuiderDevice::from_name("PHD2", phd2),
            GuiderDevice::Phd2(_)
        ));
        assert!(matches!(
            GuiderDevice::from_name("none", phd2),
            GuiderDevice::Disconnected
        ));
        assert_eq!(GuiderDevice::from_name("MGEN", phd2).name(), "MGEN");
    }
}

// Server lifecycle: owns the HTTP listener task and the discovery broadcaster.

use crate::discovery::{DiscoveryBroadcaster, DiscoveryConfig};
use crate::pipeline::ImagePipeline;
use crate::web::{AppState, create_app, create_listener};
use axum::Router;
use axum::routing::IntoMakeService;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long `stop` waits for in-flight requests before dropping the listener task.
pub const LISTENER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host; `*` for every interface.
    pub host: String,
    pub port: u16,
    /// Directory of the client web app, served at `/`.
    pub app_dir: Option<PathBuf>,
    /// Discovery settings; `None` disables the broadcast. The advertised port is
    /// always the one actually bound.
    pub discovery: Option<DiscoveryConfig>,
}

#[derive(Debug)]
pub enum ServerError {
    AlreadyRunning(SocketAddr),
    Bind(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning(addr) => write!(f, "server already running on {}", addr),
            Self::Bind(e) => write!(f, "failed to bind web server: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(e) => Some(e),
            Self::AlreadyRunning(_) => None,
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Bind(err)
    }
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    listener_task: JoinHandle<()>,
    broadcaster: Option<DiscoveryBroadcaster>,
}

/// Start/stop handle for the whole service. Start and stop may be repeated.
pub struct Server {
    config: ServerConfig,
    pipeline: ImagePipeline,
    running: Mutex<Option<RunningServer>>,
}

impl Server {
    pub fn new(config: ServerConfig, pipeline: ImagePipeline) -> Self {
        Self {
            config,
            pipeline,
            running: Mutex::new(None),
        }
    }

    /// Binds the listener, spawns it and starts the discovery broadcast.
    ///
    /// A second `start` without `stop` is refused with `AlreadyRunning` rather than
    /// attempting a second bind.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(server) = running.as_ref() {
            return Err(ServerError::AlreadyRunning(server.local_addr));
        }

        debug!("Creating web server");
        let app = create_app(
            AppState::new(self.pipeline.clone()),
            self.config.app_dir.as_deref(),
        );

        let (bind_addr, listener) = create_listener(&self.config.host, self.config.port).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "Server successfully bound to {}. Listening on {}",
            bind_addr, local_addr
        );

        let shutdown = CancellationToken::new();
        let listener_task = tokio::spawn(serve(listener, app, shutdown.clone()));

        let broadcaster = self.config.discovery.as_ref().map(|discovery| {
            DiscoveryBroadcaster::start(DiscoveryConfig {
                service_port: local_addr.port(),
                ..discovery.clone()
            })
        });

        *running = Some(RunningServer {
            local_addr,
            shutdown,
            listener_task,
            broadcaster,
        });

        Ok(local_addr)
    }

    /// Stops the listener and the broadcaster. Does nothing when not running.
    pub async fn stop(&self) {
        let Some(server) = self.running.lock().await.take() else {
            debug!("Stop requested but the server is not running");
            return;
        };

        // Request every cancellation before waiting on any task.
        server.shutdown.cancel();
        if let Some(broadcaster) = &server.broadcaster {
            broadcaster.cancel();
        }

        if let Some(broadcaster) = server.broadcaster {
            broadcaster.stop().await;
        }

        let mut listener_task = server.listener_task;
        match tokio::time::timeout(LISTENER_JOIN_TIMEOUT, &mut listener_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Web server task failed: {}", e),
            Err(_) => {
                warn!(
                    "Web server did not drain within {:?}, dropping open connections",
                    LISTENER_JOIN_TIMEOUT
                );
                listener_task.abort();
            }
        }

        info!("Web server on {} stopped", server.local_addr);
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|s| s.local_addr)
    }
}

async fn serve(listener: TcpListener, app: IntoMakeService<Router>, shutdown: CancellationToken) {
    info!("Web server starting");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        error!("Server run error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guider::{GuiderBridge, GuiderDevice};
    use crate::pipeline::LastSavedFrame;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpStream, UdpSocket};
    use tokio_test::{assert_err, assert_ok};

    fn server(discovery: Option<DiscoveryConfig>) -> Server {
        Server::new(
            ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                app_dir: None,
                discovery,
            },
            ImagePipeline::new(
                GuiderBridge::new(GuiderDevice::Disconnected, Duration::from_secs(1)),
                LastSavedFrame::default(),
            ),
        )
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            path, addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_start_serves_api() {
        let server = server(None);
        let addr = server.start().await.unwrap();
        assert!(server.is_running().await);
        assert_eq!(server.local_addr().await, Some(addr));

        let response = http_get(addr, "/api/phd2/state").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.contains("PHD2 not connected"));

        server.stop().await;
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_closes_listener() {
        let server = server(None);
        let addr = server.start().await.unwrap();
        server.stop().await;

        assert_err!(TcpStream::connect(addr).await);
    }

    #[tokio::test]
    async fn test_restart_cycle() {
        let server = server(None);
        for _ in 0..3 {
            let addr = assert_ok!(server.start().await);
            let response = http_get(addr, "/api/phd2/state").await;
            assert!(response.starts_with("HTTP/1.1 200"));
            server.stop().await;
        }
    }

    #[tokio::test]
    async fn test_double_start_is_refused() {
        let server = server(None);
        let addr = server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning(running)) if running == addr
        ));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let server = server(None);
        server.stop().await;
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn test_broadcast_advertises_bound_port() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = server(Some(DiscoveryConfig {
            target: receiver.local_addr().unwrap(),
            hostname: Some("scope".into()),
            ip_address: Some(Ipv4Addr::new(10, 0, 0, 7)),
            ..Default::default()
        }));
        let addr = server.start().await.unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..len]).unwrap(),
            format!("NINA-TouchNStars|Port:{}|Host:scope|IP:10.0.0.7", addr.port())
        );

        let stopping = std::time::Instant::now();
        server.stop().await;
        assert!(stopping.elapsed() < Duration::from_secs(2));
    }
}

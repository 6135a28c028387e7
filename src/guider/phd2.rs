// PHD2 JSON-RPC client over its TCP event-server socket.
//
// PHD2 streams asynchronous event notifications on the same connection that carries
// RPC responses, one JSON object per line. Responses are matched to requests by id
// and every line carrying an "Event" member is skipped.

use super::models::{RpcRequest, RpcResponse};
use super::{GuiderError, Phd2Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_PHD2_PORT: u16 = 4400;

#[derive(Debug, Clone)]
pub struct Phd2Config {
    pub host: String,
    pub port: u16,
}

impl Default for Phd2Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PHD2_PORT,
        }
    }
}

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, GuiderError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        info!("Connected to PHD2 at {}", addr);

        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    async fn exchange(&mut self, request: &RpcRequest<'_>) -> Result<RpcResponse, GuiderError> {
        let mut line = serde_json::to_string(request)?;
        line.push_str("\r\n");
        self.writer.write_all(line.as_bytes()).await?;

        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Err(GuiderError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "PHD2 closed the connection",
                )));
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message: Value = serde_json::from_str(line)?;
            if let Some(event) = message.get("Event") {
                trace!("PHD2 event: {}", event);
                continue;
            }

            match message.get("id").and_then(Value::as_u64) {
                Some(id) if id == request.id => return Ok(serde_json::from_value(message)?),
                other => debug!(
                    "Ignoring PHD2 response with id {:?} while waiting for {}",
                    other, request.id
                ),
            }
        }
    }
}

/// Lazily connected PHD2 client. Calls are serialized over one connection; any
/// transport or framing failure drops the connection and the next call reconnects.
pub struct Phd2Client {
    addr: String,
    next_id: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

impl Phd2Client {
    pub fn new(config: &Phd2Config) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            next_id: AtomicU64::new(1),
            connection: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Phd2Transport for Phd2Client {
    async fn call(&self, method: &str, params: Option<Value>) -> Result<RpcResponse, GuiderError> {
        let request = RpcRequest {
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let mut slot = self.connection.lock().await;
        let mut connection = match slot.take() {
            Some(connection) => connection,
            // Nothing listening means PHD2 is not running, not that the bridge broke.
            None => Connection::open(&self.addr).await.map_err(|e| {
                debug!("PHD2 unavailable at {}: {}", self.addr, e);
                GuiderError::NotConnected
            })?,
        };

        match connection.exchange(&request).await {
            Ok(response) => {
                *slot = Some(connection);
                Ok(response)
            }
            Err(e) => {
                warn!("PHD2 call '{}' failed, dropping connection: {}", method, e);
                Err(e)
            }
        }
    }
}

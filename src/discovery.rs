// LAN discovery: periodic UDP announcement of the server's address and port.
//
// Clients listen on the discovery port and pick up datagrams of the form
// `<IDENTIFIER>|Port:<port>|Host:<hostname>|IP:<ipv4>`. Broadcasting is best-effort:
// a failed send is logged and retried on the next tick.

use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub const DISCOVERY_PORT: u16 = 37020;
pub const DEFAULT_IDENTIFIER: &str = "NINA-TouchNStars";
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on how long `stop` waits for the loop to finish.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub identifier: String,
    /// HTTP port advertised to clients.
    pub service_port: u16,
    /// Where datagrams are sent; the limited broadcast address by default.
    pub target: SocketAddr,
    pub interval: Duration,
    /// Advertised host name; detected when unset.
    pub hostname: Option<String>,
    /// Advertised address; detected when unset.
    pub ip_address: Option<Ipv4Addr>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            identifier: DEFAULT_IDENTIFIER.to_string(),
            service_port: 0,
            target: SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT)),
            interval: BROADCAST_INTERVAL,
            hostname: None,
            ip_address: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub identifier: String,
    pub port: u16,
    pub hostname: String,
    pub ip_address: Ipv4Addr,
}

impl fmt::Display for BroadcastMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|Port:{}|Host:{}|IP:{}",
            self.identifier, self.port, self.hostname, self.ip_address
        )
    }
}

/// Handle to a running announcement loop. Dropping it without `stop` leaves the
/// loop running until the runtime shuts down.
pub struct DiscoveryBroadcaster {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl DiscoveryBroadcaster {
    /// Resolves the advertised identity once and spawns the loop.
    pub fn start(config: DiscoveryConfig) -> Self {
        info!("Starting network discovery broadcast on {}", config.target);

        let hostname = config.hostname.clone().unwrap_or_else(local_hostname);
        let ip_address = config.ip_address.unwrap_or_else(local_ipv4);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(broadcast_loop(
            config,
            hostname,
            ip_address,
            shutdown.clone(),
        ));

        Self { shutdown, task }
    }

    /// Requests cancellation without waiting.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Cancels the loop and waits at most [`JOIN_TIMEOUT`] for it to exit.
    pub async fn stop(self) {
        self.cancel();

        let mut task = self.task;
        match tokio::time::timeout(JOIN_TIMEOUT, &mut task).await {
            Ok(Ok(())) => info!("Network discovery broadcast stopped"),
            Ok(Err(e)) => error!("Discovery broadcast task failed: {}", e),
            Err(_) => {
                warn!(
                    "Discovery broadcast did not stop within {:?}, aborting",
                    JOIN_TIMEOUT
                );
                task.abort();
            }
        }
    }
}

async fn broadcast_loop(
    config: DiscoveryConfig,
    hostname: String,
    ip_address: Ipv4Addr,
    shutdown: CancellationToken,
) {
    let mut socket = None;

    while !shutdown.is_cancelled() {
        let message = BroadcastMessage {
            identifier: config.identifier.clone(),
            port: config.service_port,
            hostname: hostname.clone(),
            ip_address,
        }
        .to_string();

        match send_announcement(&mut socket, config.target, message.as_bytes()).await {
            Ok(()) => trace!("Broadcast sent: {}", message),
            Err(e) => error!("Error during broadcast: {}", e),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }

    debug!("Discovery broadcast loop exited");
}

// Opens the socket on first use and keeps it across ticks.
async fn send_announcement(
    slot: &mut Option<UdpSocket>,
    target: SocketAddr,
    payload: &[u8],
) -> io::Result<()> {
    let socket = match slot.take() {
        Some(socket) => socket,
        None => open_broadcast_socket()?,
    };

    let result = socket.send_to(payload, target).await.map(|_| ());
    *slot = Some(socket);
    result
}

fn open_broadcast_socket() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;

    // Make it non-blocking for tokio
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

fn local_hostname() -> String {
    let name = gethostname::gethostname();
    let name = name.to_string_lossy();
    let name = name.trim();
    if name.is_empty() {
        warn!("System host name is empty, advertising localhost");
        "localhost".to_string()
    } else {
        name.to_string()
    }
}

// Address of the interface that carries the default route. Connecting a UDP socket
// sends nothing; it only makes the kernel pick a source address.
fn local_ipv4() -> Ipv4Addr {
    let probe = || -> io::Result<Ipv4Addr> {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        match socket.local_addr()?.ip() {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(ip) => Err(io::Error::other(format!("unexpected IPv6 source {}", ip))),
        }
    };

    probe().unwrap_or_else(|e| {
        warn!("Could not detect local IPv4 address, advertising loopback: {}", e);
        Ipv4Addr::LOCALHOST
    })
}

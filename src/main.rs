// Main entry point for tns-server.
// Parses configuration, initializes logging, selects the guider and runs the
// web server plus discovery broadcast until Ctrl-C/SIGTERM.

use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tns_server::discovery::{
    BROADCAST_INTERVAL, DEFAULT_IDENTIFIER, DISCOVERY_PORT, DiscoveryConfig,
};
use tns_server::guider::{GuiderBridge, GuiderDevice, Phd2Client, Phd2Config, Phd2Transport};
use tns_server::pipeline::{ImagePipeline, LastSavedFrame};
use tns_server::server::{Server, ServerConfig};
use tns_server::shutdown_signal::shutdown_signal;
use tracing::Level;

/// Command line arguments for tns-server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct AppConfig {
    /// Hostname/IP to bind the server to.
    /// "*" (also used when the option is given without a value) listens on all interfaces.
    #[arg(long, env = "TNS_SERVER_HOST", default_value = "*", num_args = 0..=1, default_missing_value = "*")]
    host: String,

    /// Port number to listen on.
    #[arg(short, long, env = "TNS_SERVER_PORT", default_value_t = 5000)]
    port: u16,

    /// Directory of the client web app to serve at "/".
    #[arg(long, env = "TNS_SERVER_APP_DIR")]
    app_dir: Option<PathBuf>,

    /// Selected guider: "phd2", "none", or the name of another guider driver.
    #[arg(long, env = "TNS_SERVER_GUIDER", default_value = "phd2")]
    guider: String,

    /// Host of the PHD2 event server.
    #[arg(long, env = "TNS_SERVER_PHD2_HOST", default_value = "127.0.0.1")]
    phd2_host: String,

    /// Port of the PHD2 event server (4400 for the first PHD2 instance).
    #[arg(long, env = "TNS_SERVER_PHD2_PORT", default_value_t = 4400)]
    phd2_port: u16,

    /// Seconds to wait for any single PHD2 call.
    #[arg(long, env = "TNS_SERVER_GUIDER_TIMEOUT_SECS", default_value_t = 30)]
    guider_timeout_secs: u64,

    /// Disable the LAN discovery broadcast.
    #[arg(long, env = "TNS_SERVER_NO_DISCOVERY", action = clap::ArgAction::SetTrue)]
    no_discovery: bool,

    /// UDP port the discovery datagrams are sent to.
    #[arg(long, env = "TNS_SERVER_DISCOVERY_PORT", default_value_t = DISCOVERY_PORT)]
    discovery_port: u16,

    /// Identifier clients look for at the start of a discovery datagram.
    #[arg(long, env = "TNS_SERVER_DISCOVERY_IDENTIFIER", default_value = DEFAULT_IDENTIFIER)]
    discovery_identifier: String,

    /// Host name to advertise instead of the detected one.
    #[arg(long, env = "TNS_SERVER_ADVERTISE_HOST")]
    advertise_host: Option<String>,

    /// IPv4 address to advertise instead of the detected one.
    #[arg(long, env = "TNS_SERVER_ADVERTISE_IP")]
    advertise_ip: Option<Ipv4Addr>,

    /// Log at DEBUG instead of INFO.
    #[arg(short, long, env = "TNS_SERVER_VERBOSE", action = clap::ArgAction::SetTrue)]
    verbose: bool,
}

impl AppConfig {
    fn server_config(&self) -> ServerConfig {
        let discovery = (!self.no_discovery).then(|| DiscoveryConfig {
            identifier: self.discovery_identifier.clone(),
            service_port: self.port,
            target: SocketAddr::from((Ipv4Addr::BROADCAST, self.discovery_port)),
            interval: BROADCAST_INTERVAL,
            hostname: self.advertise_host.clone(),
            ip_address: self.advertise_ip,
        });

        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            app_dir: self.app_dir.clone(),
            discovery,
        }
    }

    fn guider_bridge(&self) -> GuiderBridge {
        let phd2_config = Phd2Config {
            host: self.phd2_host.clone(),
            port: self.phd2_port,
        };
        let device = GuiderDevice::from_name(&self.guider, || {
            Arc::new(Phd2Client::new(&phd2_config)) as Arc<dyn Phd2Transport>
        });

        match &device {
            GuiderDevice::Phd2(_) => tracing::info!(
                "Guider: PHD2 at {}:{}",
                phd2_config.host,
                phd2_config.port
            ),
            GuiderDevice::Other(name) => tracing::warn!(
                "Guider '{}' does not support PHD2 operations; /phd2 endpoints will report it as not connected",
                name
            ),
            GuiderDevice::Disconnected => tracing::info!("No guider selected"),
        }

        GuiderBridge::new(device, Duration::from_secs(self.guider_timeout_secs))
    }
}

#[tokio::main]
async fn main() {
    // Parse command line args and environment variables
    let config = AppConfig::parse();

    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_max_level(if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(true) // Include module path in logs
        .with_file(true) // Include source file name
        .with_line_number(true) // Include line numbers
        .init();

    tracing::info!("Starting tns-server...");

    let pipeline = ImagePipeline::new(config.guider_bridge(), LastSavedFrame::default());
    let server = Server::new(config.server_config(), pipeline);

    if let Err(e) = server.start().await {
        tracing::error!("FATAL: {}", e);
        eprintln!("FATAL: Could not start server. Error: {}. Exiting.", e);
        std::process::exit(1);
    }

    shutdown_signal().await;

    server.stop().await;
    tracing::info!("tns-server has shut down.");
}

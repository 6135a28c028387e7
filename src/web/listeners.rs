use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;

/// Binds the HTTP listener. `*` means every interface: IPv6 dual-stack when the
/// host supports it, IPv4 only otherwise.
pub async fn create_listener(host: &str, port: u16) -> std::io::Result<(String, TcpListener)> {
    if host == "*" {
        return create_wildcard_listener(port);
    }

    let addr = format!("{}:{}", host, port);
    tracing::info!("Attempting to bind server to {}...", addr);

    let listener = TcpListener::bind(&addr).await?;

    Ok((addr, listener))
}

fn create_wildcard_listener(port: u16) -> std::io::Result<(String, TcpListener)> {
    let ipv6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    match bind_socket(ipv6) {
        Ok(listener) => return Ok((ipv6.to_string(), listener)),
        Err(e) => tracing::warn!(
            "Failed to bind IPv6 listener ({}). Attempting IPv4 only.",
            e
        ),
    }

    let ipv4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    bind_socket(ipv4).map(|listener| (ipv4.to_string(), listener))
}

fn bind_socket(addr: SocketAddr) -> std::io::Result<TcpListener> {
    tracing::info!("Attempting to bind server to {}...", addr);

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if addr.is_ipv6() {
        // Accept IPv4 clients on the same socket where the platform allows it
        if let Err(e) = socket.set_only_v6(false) {
            tracing::warn!(
                "Failed to set dual-stack mode for IPv6 socket: {}. Continuing anyway.",
                e
            );
        }
    }

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    // Make it non-blocking for tokio
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

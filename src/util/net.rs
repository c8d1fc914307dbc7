//! Socket setup: listener construction and per-connection TCP tuning

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Build the listening socket shared by all workers.
///
/// Goes through `socket2` so that `SO_REUSEADDR` and `SO_REUSEPORT` are set
/// before bind. The backlog tracks the worker count.
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    TcpListener::from_std(socket.into())
}

/// Tune one side of a session (best-effort): negotiation frames are a
/// handful of bytes, so Nagle only adds latency, and keepalive probes are
/// the only way a quiet hop learns its peer is gone once the relay holds the
/// connection open untimed.
pub fn configure_tcp_stream(stream: &TcpStream, role: &str) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!("could not disable Nagle on the {role} socket: {err}");
    }

    #[cfg(any(unix, windows))]
    {
        use socket2::{SockRef, TcpKeepalive};

        // Probe before typical NAT/middlebox idle limits drop the mapping.
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(20));

        if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            debug!("could not arm TCP keepalive on the {role} socket: {err}");
        }
    }
}

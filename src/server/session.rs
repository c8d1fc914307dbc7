//! Per-client session: authenticate the client, pick an upstream, walk its
//! chain, then hand both sockets to the relay.

use crate::proxy::{RotationPool, Upstream};
use crate::server::relay;
use crate::server::server::ServerConfig;
use crate::socks5;
use crate::util::{Result, configure_tcp_stream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

/// Drive one accepted client from negotiation to relay shutdown.
///
/// Client auth failures are terminal for the session. Upstream failures
/// rotate to the next pool entry when retry is enabled, capped at one full
/// pool cycle so a dead pool cannot stall a session forever.
pub async fn run_session(
    mut client: TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
    pool: &RotationPool,
) -> Result<()> {
    timeout(
        config.io_timeout,
        socks5::server::negotiate(&mut client, &config.auth),
    )
    .await??;

    let (upstream_conn, upstream) = acquire_upstream(
        pool,
        config.retry_on_upstream_failure,
        config.io_timeout,
    )
    .await?;

    info!("{peer} -> {}", upstream.log_label());

    relay::bridge(client, upstream_conn).await
}

/// Pick upstreams round-robin until one yields a fully established path.
async fn acquire_upstream(
    pool: &RotationPool,
    retry: bool,
    io_timeout: Duration,
) -> Result<(TcpStream, Arc<Upstream>)> {
    let attempts = if retry { pool.len() } else { 1 };
    let mut attempt = 0;

    loop {
        attempt += 1;
        let upstream = pool.next();
        match connect_and_walk(&upstream, io_timeout).await {
            Ok(conn) => return Ok((conn, upstream)),
            Err(err) if attempt < attempts => {
                warn!(
                    "upstream {} failed: {err}; rotating to the next one",
                    upstream.log_label()
                );
            }
            Err(err) => return Err(err),
        }
    }
}

/// Open the TCP connection to the head hop and walk the whole chain.
///
/// The connect and each step of the walk run under their own negotiation
/// timeout. The timeout is not carried into the relay; an established
/// bridge runs untimed.
async fn connect_and_walk(upstream: &Upstream, io_timeout: Duration) -> Result<TcpStream> {
    let mut conn = timeout(
        io_timeout,
        TcpStream::connect((upstream.host.as_str(), upstream.port)),
    )
    .await??;

    configure_tcp_stream(&conn, "upstream");

    socks5::client::establish_chain(&mut conn, upstream, io_timeout).await?;

    Ok(conn)
}

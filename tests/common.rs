//! Common test utilities and helpers

use anyhow::Result;
use socksrot::proxy::{RotationPool, parse_proxy_list};
use socksrot::server::{Server, ServerConfig};
use socksrot::socks5::server::AuthPolicy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Server configuration for tests: ephemeral port, two workers, short
/// negotiation timeout, no-auth accepted.
#[allow(dead_code)]
pub fn test_config() -> ServerConfig {
    ServerConfig {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        workers: 2,
        io_timeout: Duration::from_secs(5),
        retry_on_upstream_failure: false,
        auth: AuthPolicy {
            allow_no_auth: true,
            ..AuthPolicy::default()
        },
    }
}

/// Proxy-list record pointing at a test upstream.
#[allow(dead_code)]
pub fn upstream_line(addr: SocketAddr) -> String {
    format!("socks5h {} {}", addr.ip(), addr.port())
}

/// An ephemeral port nothing listens on.
#[allow(dead_code)]
pub fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener
        .local_addr()
        .expect("get local addr")
        .port()
}

/// Start a rotator over the given proxy-list lines; returns the server, its
/// bound address, and the handle of the running worker pool.
#[allow(dead_code)]
pub async fn start_server(
    config: ServerConfig,
    lines: &[String],
) -> Result<(Arc<Server>, SocketAddr, JoinHandle<socksrot::Result<()>>)> {
    let pool = RotationPool::new(parse_proxy_list(lines)?)?;
    let server = Arc::new(Server::bind(config, pool).await?);
    let addr = server.local_addr()?;

    let runner = Arc::clone(&server);
    let handle = tokio::spawn(async move { runner.run().await });

    Ok((server, addr, handle))
}

/// Mock upstream SOCKS5 proxy: accepts connections in a loop, performs the
/// no-auth greeting on each, then echoes every byte back.
#[allow(dead_code)]
pub async fn spawn_echo_upstream() -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut stream, _peer)) => {
                    tokio::spawn(async move {
                        if upstream_greeting(&mut stream).await.is_ok() {
                            echo(&mut stream).await;
                        }
                    });
                }
                Err(e) => {
                    eprintln!("[Test Upstream] Accept error: {e}");
                    break;
                }
            }
        }
    });

    Ok((addr, handle))
}

/// Mock upstream that, after the greeting, sends a fixed tag and closes.
/// Lets a test see which pool entry served its session.
#[allow(dead_code)]
pub async fn spawn_tagged_upstream(tag: &'static [u8]) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut stream, _peer)) => {
                    if upstream_greeting(&mut stream).await.is_ok() {
                        let _ = stream.write_all(tag).await;
                        let _ = stream.shutdown().await;
                    }
                }
                Err(_) => break,
            }
        }
    });

    Ok((addr, handle))
}

/// The upstream side of a no-auth SOCKS5 greeting.
#[allow(dead_code)]
pub async fn upstream_greeting(stream: &mut TcpStream) -> Result<()> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    anyhow::ensure!(header[0] == 0x05, "unexpected greeting version");

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;
    anyhow::ensure!(methods.contains(&0x00), "no-auth not offered");

    stream.write_all(&[0x05, 0x00]).await?;
    Ok(())
}

/// Echo until EOF or error.
#[allow(dead_code)]
pub async fn echo(stream: &mut TcpStream) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Connect to the rotator and complete a no-auth greeting.
#[allow(dead_code)]
pub async fn connect_no_auth(addr: SocketAddr) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&[0x05, 0x01, 0x00]).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    anyhow::ensure!(reply == [0x05, 0x00], "unexpected method reply {reply:?}");

    Ok(stream)
}

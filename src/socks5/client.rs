//! SOCKS5 client half: negotiation with upstream proxies and the CONNECT
//! requests that stitch chain hops together.

use crate::proxy::Upstream;
use crate::socks5::{
    ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_NO_AUTHENTICATION, AUTH_NOT_ACCEPTABLE,
    AUTH_USERNAME_PASSWORD, CMD_CONNECT, SOCKS5_VERSION, STATUS_SUCCESS, USERPASS_VERSION,
};
use crate::util::{Result, SocksRotError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Greet an upstream proxy and authenticate with its configured credentials.
///
/// Advertises `{userpass, no-auth}` when the hop carries a user, `{no-auth}`
/// otherwise, and follows whichever method the upstream selects.
pub async fn greet<S>(stream: &mut S, upstream: &Upstream) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting: &[u8] = if upstream.user.is_some() {
        &[
            SOCKS5_VERSION,
            2,
            AUTH_USERNAME_PASSWORD,
            AUTH_NO_AUTHENTICATION,
        ]
    } else {
        &[SOCKS5_VERSION, 1, AUTH_NO_AUTHENTICATION]
    };
    stream.write_all(greeting).await?;
    stream.flush().await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;

    if reply[0] != SOCKS5_VERSION {
        return Err(SocksRotError::Protocol(format!(
            "upstream {} answered greeting with version {:#04x}",
            upstream.endpoint(),
            reply[0]
        )));
    }

    match reply[1] {
        AUTH_NO_AUTHENTICATION => Ok(()),
        AUTH_USERNAME_PASSWORD => userpass_subnegotiation(stream, upstream).await,
        AUTH_NOT_ACCEPTABLE => Err(SocksRotError::Auth(format!(
            "upstream {} accepts none of our auth methods",
            upstream.endpoint()
        ))),
        other => Err(SocksRotError::Protocol(format!(
            "upstream {} selected unknown auth method {:#04x}",
            upstream.endpoint(),
            other
        ))),
    }
}

/// RFC 1929 from the client side. Missing credentials are sent as
/// zero-length fields.
async fn userpass_subnegotiation<S>(stream: &mut S, upstream: &Upstream) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = upstream.user.as_deref().unwrap_or_default().as_bytes();
    let pass = upstream.pass.as_deref().unwrap_or_default().as_bytes();
    if user.len() > 255 || pass.len() > 255 {
        return Err(SocksRotError::Protocol(format!(
            "credentials for upstream {} exceed 255 bytes",
            upstream.endpoint()
        )));
    }

    let mut request = Vec::with_capacity(3 + user.len() + pass.len());
    request.push(USERPASS_VERSION);
    request.push(user.len() as u8);
    request.extend_from_slice(user);
    request.push(pass.len() as u8);
    request.extend_from_slice(pass);
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;

    if reply[0] != USERPASS_VERSION {
        return Err(SocksRotError::Protocol(format!(
            "upstream {} answered auth with version {:#04x}",
            upstream.endpoint(),
            reply[0]
        )));
    }
    if reply[1] != STATUS_SUCCESS {
        return Err(SocksRotError::Auth(format!(
            "upstream {} rejected credentials (status {:#04x})",
            upstream.endpoint(),
            reply[1]
        )));
    }
    Ok(())
}

/// Ask an already-authenticated hop to open a TCP connection to the next
/// hop.
///
/// Always uses domain addressing (`ATYP=0x03`) so the hop resolves the name
/// itself; nothing is resolved locally. The reply's bound address is read
/// and discarded.
pub async fn connect_hop<S>(stream: &mut S, host: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if host.is_empty() || host.len() > 255 {
        return Err(SocksRotError::Protocol(format!(
            "hop hostname `{host}` does not fit a domain address"
        )));
    }

    let mut request = Vec::with_capacity(6 + host.len());
    request.push(SOCKS5_VERSION);
    request.push(CMD_CONNECT);
    request.push(0x00); // RSV
    request.push(ATYP_DOMAIN);
    request.push(host.len() as u8);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;
    stream.flush().await?;

    // Reply: [VER | REP | RSV | ATYP | BND.ADDR | BND.PORT]
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(SocksRotError::Protocol(format!(
            "hop answered CONNECT with version {:#04x}",
            header[0]
        )));
    }
    if header[1] != 0x00 {
        return Err(SocksRotError::Chain(format!(
            "hop refused connection to {host}:{port} (reply {:#04x})",
            header[1]
        )));
    }

    discard_bound_address(stream, header[3]).await
}

/// Walk a hop chain: authenticate with each hop and ask it to connect to the
/// next one.
///
/// Every greet and every CONNECT runs under its own `io_timeout`, so a slow
/// early hop cannot eat a later hop's budget. The terminal hop is
/// authenticated but receives no CONNECT from us; the client's own request
/// flows to it through the relay afterwards.
pub async fn establish_chain<S>(stream: &mut S, head: &Upstream, io_timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut hop = head;
    loop {
        timeout(io_timeout, greet(stream, hop)).await??;
        match &hop.chain {
            Some(next) => {
                timeout(io_timeout, connect_hop(stream, &next.host, next.port)).await??;
                hop = next;
            }
            None => return Ok(()),
        }
    }
}

/// Consume the BND.ADDR/BND.PORT tail of a CONNECT reply.
async fn discard_bound_address<S>(stream: &mut S, atyp: u8) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let addr_len = match atyp {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(SocksRotError::Protocol(format!(
                "unknown address type {:#04x} in CONNECT reply",
                other
            )));
        }
    };

    // Longest possible tail: 255-byte domain plus the port.
    let mut discard = [0u8; 255 + 2];
    stream.read_exact(&mut discard[..addr_len + 2]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Upstream;
    use tokio::io::duplex;

    fn hop(line: &str) -> Upstream {
        Upstream::parse_line(line).unwrap().unwrap()
    }

    #[tokio::test]
    async fn greeting_without_credentials() {
        let (mut ours, mut upstream) = duplex(256);
        upstream.write_all(&[0x05, 0x00]).await.unwrap();

        greet(&mut ours, &hop("socks5h proxy.example 1080"))
            .await
            .unwrap();

        let mut sent = [0u8; 3];
        upstream.read_exact(&mut sent).await.unwrap();
        assert_eq!(sent, [0x05, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn greeting_with_credentials_runs_subnegotiation() {
        let (mut ours, mut upstream) = duplex(256);
        upstream.write_all(&[0x05, 0x02]).await.unwrap();
        upstream.write_all(&[0x01, 0x00]).await.unwrap();

        greet(&mut ours, &hop("socks5 proxy.example 1080 alice s3cret"))
            .await
            .unwrap();

        let mut sent_greeting = [0u8; 4];
        upstream.read_exact(&mut sent_greeting).await.unwrap();
        assert_eq!(sent_greeting, [0x05, 0x02, 0x02, 0x00]);

        let mut sent_auth = [0u8; 3 + 5 + 6];
        upstream.read_exact(&mut sent_auth).await.unwrap();
        let mut expected = vec![0x01, 0x05];
        expected.extend_from_slice(b"alice");
        expected.push(0x06);
        expected.extend_from_slice(b"s3cret");
        assert_eq!(sent_auth.as_slice(), expected.as_slice());
    }

    #[tokio::test]
    async fn missing_password_is_sent_as_empty_field() {
        let (mut ours, mut upstream) = duplex(256);
        upstream.write_all(&[0x05, 0x02]).await.unwrap();
        upstream.write_all(&[0x01, 0x00]).await.unwrap();

        greet(&mut ours, &hop("socks5 proxy.example 1080 alice"))
            .await
            .unwrap();

        let mut sent = [0u8; 4 + 3 + 5];
        upstream.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent[4..], &[0x01, 0x05, b'a', b'l', b'i', b'c', b'e', 0x00]);
    }

    #[tokio::test]
    async fn upstream_rejecting_methods_is_an_auth_error() {
        let (mut ours, mut upstream) = duplex(256);
        upstream.write_all(&[0x05, 0xFF]).await.unwrap();

        let result = greet(&mut ours, &hop("socks5h proxy.example 1080")).await;
        assert!(matches!(result, Err(SocksRotError::Auth(_))));
    }

    #[tokio::test]
    async fn upstream_rejecting_credentials_is_an_auth_error() {
        let (mut ours, mut upstream) = duplex(256);
        upstream.write_all(&[0x05, 0x02]).await.unwrap();
        upstream.write_all(&[0x01, 0x01]).await.unwrap();

        let result = greet(&mut ours, &hop("socks5 proxy.example 1080 u p")).await;
        assert!(matches!(result, Err(SocksRotError::Auth(_))));
    }

    #[tokio::test]
    async fn chain_connect_is_byte_exact() {
        let (mut ours, mut upstream) = duplex(256);
        upstream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        connect_hop(&mut ours, "B", 1080).await.unwrap();

        let mut sent = [0u8; 8];
        upstream.read_exact(&mut sent).await.unwrap();
        assert_eq!(sent, [0x05, 0x01, 0x00, 0x03, 0x01, b'B', 0x04, 0x38]);
    }

    #[tokio::test]
    async fn chain_refusal_is_a_chain_error() {
        let (mut ours, mut upstream) = duplex(256);
        // REP = 0x05: connection refused
        upstream
            .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        let result = connect_hop(&mut ours, "next.example", 1080).await;
        assert!(matches!(result, Err(SocksRotError::Chain(_))));
    }

    #[tokio::test]
    async fn connect_reply_with_domain_address_is_discarded() {
        let (mut ours, mut upstream) = duplex(256);
        let mut reply = vec![0x05, 0x00, 0x00, 0x03, 0x04];
        reply.extend_from_slice(b"next");
        reply.extend_from_slice(&1080u16.to_be_bytes());
        upstream.write_all(&reply).await.unwrap();

        connect_hop(&mut ours, "next.example", 1080).await.unwrap();
    }

    #[tokio::test]
    async fn oversized_hostname_is_rejected_before_writing() {
        let (mut ours, _upstream) = duplex(256);
        let long = "a".repeat(256);
        let result = connect_hop(&mut ours, &long, 1080).await;
        assert!(matches!(result, Err(SocksRotError::Protocol(_))));
    }

    #[tokio::test]
    async fn establish_chain_walks_both_hops() {
        let (mut ours, mut upstream) = duplex(1024);
        // Hop A: no-auth greeting, then CONNECT to B succeeds.
        upstream.write_all(&[0x05, 0x00]).await.unwrap();
        upstream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
        // Hop B answers the second greeting (tunneled through A).
        upstream.write_all(&[0x05, 0x00]).await.unwrap();

        let head = hop("socks5h A 1080 | socks5h B 1080");
        establish_chain(&mut ours, &head, Duration::from_secs(5))
            .await
            .unwrap();

        let mut greeting_a = [0u8; 3];
        upstream.read_exact(&mut greeting_a).await.unwrap();
        assert_eq!(greeting_a, [0x05, 0x01, 0x00]);

        let mut connect_b = [0u8; 8];
        upstream.read_exact(&mut connect_b).await.unwrap();
        assert_eq!(connect_b, [0x05, 0x01, 0x00, 0x03, 0x01, b'B', 0x04, 0x38]);

        let mut greeting_b = [0u8; 3];
        upstream.read_exact(&mut greeting_b).await.unwrap();
        assert_eq!(greeting_b, [0x05, 0x01, 0x00]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_hop_times_out() {
        let (mut ours, _upstream) = duplex(256);

        let head = hop("socks5h quiet.example 1080");
        let result = establish_chain(&mut ours, &head, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SocksRotError::Timeout(_))));
    }

    #[tokio::test]
    async fn terminal_hop_gets_no_connect() {
        let (mut ours, mut upstream) = duplex(256);
        upstream.write_all(&[0x05, 0x00]).await.unwrap();

        let head = hop("socks5h only.example 1080");
        establish_chain(&mut ours, &head, Duration::from_secs(5))
            .await
            .unwrap();

        // Nothing besides the greeting was written.
        drop(ours);
        let mut rest = Vec::new();
        upstream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, [0x05, 0x01, 0x00]);
    }
}

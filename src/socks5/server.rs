//! SOCKS5 server half: negotiation with accepted clients.

use crate::socks5::{
    AUTH_NO_AUTHENTICATION, AUTH_NOT_ACCEPTABLE, AUTH_USERNAME_PASSWORD, SOCKS5_VERSION,
    STATUS_FAILURE, STATUS_SUCCESS, USERPASS_VERSION,
};
use crate::util::{Result, SocksRotError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Which client authentication the server half accepts.
#[derive(Debug, Clone, Default)]
pub struct AuthPolicy {
    pub allow_no_auth: bool,
    pub allow_userpass: bool,
    pub user: Option<String>,
    /// When unset, any password is accepted for a matching user.
    pub pass: Option<String>,
}

/// Run method selection and, when selected, the username/password
/// sub-negotiation with a freshly accepted client.
///
/// On success the stream is positioned right before the client's CONNECT
/// request, which is deliberately left unread: the terminal upstream proxy is
/// the one that must see it, and the relay forwards it verbatim.
pub async fn negotiate<S>(stream: &mut S, policy: &AuthPolicy) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting: [VER | NMETHODS | METHODS...]
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(SocksRotError::Protocol(format!(
            "unsupported SOCKS version {:#04x} in client greeting",
            header[0]
        )));
    }

    let nmethods = header[1] as usize;
    if nmethods == 0 {
        return Err(SocksRotError::Protocol(
            "client offered no auth methods".to_string(),
        ));
    }

    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    if policy.allow_no_auth && methods.contains(&AUTH_NO_AUTHENTICATION) {
        stream
            .write_all(&[SOCKS5_VERSION, AUTH_NO_AUTHENTICATION])
            .await?;
        stream.flush().await?;
        return Ok(());
    }

    if policy.allow_userpass && methods.contains(&AUTH_USERNAME_PASSWORD) {
        stream
            .write_all(&[SOCKS5_VERSION, AUTH_USERNAME_PASSWORD])
            .await?;
        stream.flush().await?;
        return userpass_subnegotiation(stream, policy).await;
    }

    stream
        .write_all(&[SOCKS5_VERSION, AUTH_NOT_ACCEPTABLE])
        .await?;
    stream.flush().await?;
    Err(SocksRotError::Auth(
        "client offered no acceptable auth method".to_string(),
    ))
}

/// RFC 1929: [VER | ULEN | UNAME | PLEN | PASSWD], answered with
/// [VER | STATUS]. Credentials are compared by exact byte equality.
async fn userpass_subnegotiation<S>(stream: &mut S, policy: &AuthPolicy) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut version = [0u8; 1];
    stream.read_exact(&mut version).await?;
    if version[0] != USERPASS_VERSION {
        return Err(SocksRotError::Protocol(format!(
            "unsupported auth sub-negotiation version {:#04x}",
            version[0]
        )));
    }

    let username = read_length_prefixed(stream).await?;
    let password = read_length_prefixed(stream).await?;

    let user_ok = username == policy.user.as_deref().unwrap_or_default().as_bytes();
    let pass_ok = match policy.pass.as_deref() {
        Some(expected) => password == expected.as_bytes(),
        None => true,
    };

    if user_ok && pass_ok {
        stream.write_all(&[USERPASS_VERSION, STATUS_SUCCESS]).await?;
        stream.flush().await?;
        Ok(())
    } else {
        stream.write_all(&[USERPASS_VERSION, STATUS_FAILURE]).await?;
        stream.flush().await?;
        Err(SocksRotError::Auth(
            "client presented wrong credentials".to_string(),
        ))
    }
}

async fn read_length_prefixed<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    let mut field = vec![0u8; len[0] as usize];
    stream.read_exact(&mut field).await?;
    Ok(field)
}

//! Post-negotiation byte bridge between client and upstream.

use crate::util::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Duration, sleep};

/// Relay read buffer, per direction.
const BUFFER_SIZE: usize = 4096;

/// How long one poll cycle waits for traffic before counting as idle.
const IDLE_POLL: Duration = Duration::from_secs(2);

/// Pump bytes both ways until one side closes, errors out, or the link goes
/// mutually idle for two consecutive poll windows.
///
/// EOF on either side ends the session cleanly; the idle heuristic catches
/// peers that vanished without a FIN or RST ever reaching us. The relay runs
/// without I/O timeouts: negotiation needed them to cap stalls, a live
/// bridge must not self-abort on a quiet connection that still has a
/// responsive peer behind it.
pub async fn bridge<A, B>(client: A, upstream: B) -> Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);

    let mut client_buf = [0u8; BUFFER_SIZE];
    let mut upstream_buf = [0u8; BUFFER_SIZE];

    // One idle window has already "elapsed" as far as the heuristic is
    // concerned; a second consecutive one ends the session.
    let mut idle = true;

    loop {
        tokio::select! {
            read = client_rd.read(&mut client_buf) => match read? {
                0 => return Ok(()),
                n => {
                    upstream_wr.write_all(&client_buf[..n]).await?;
                    idle = false;
                }
            },
            read = upstream_rd.read(&mut upstream_buf) => match read? {
                0 => return Ok(()),
                n => {
                    client_wr.write_all(&upstream_buf[..n]).await?;
                    idle = false;
                }
            },
            _ = sleep(IDLE_POLL) => {
                if idle {
                    return Ok(());
                }
                idle = true;
            }
        }
    }
}

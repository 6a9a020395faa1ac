/// Join handshake: nickname out, first hub datagram back.
///
/// An `ACK` and the initial `PING` both count as success; in fact any
/// datagram from the hub proves the path works. A consumed `PING` is
/// answered here so the hub gets its round-trip sample right away.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use jam_protocol::frames::{PING, PONG};

const ATTEMPTS: u32 = 5;
const RESPONSE_WAIT: Duration = Duration::from_secs(1);
const RETRY_GAP: Duration = Duration::from_millis(500);

pub(crate) async fn run(
    socket: &UdpSocket,
    server: SocketAddr,
    nickname: &str,
) -> anyhow::Result<()> {
    let mut buf = [0u8; 256];
    for attempt in 1..=ATTEMPTS {
        socket.send_to(nickname.as_bytes(), server).await?;
        debug!(attempt, "join sent");

        let deadline = Instant::now() + RESPONSE_WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(attempt, "no response from hub");
                break;
            }
            match timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) if from == server => {
                    debug!(bytes = len, "hub responded, session is up");
                    if &buf[..len] == PING {
                        let _ = socket.send_to(PONG, server).await;
                    }
                    return Ok(());
                }
                Ok(Ok((_, from))) => {
                    debug!(peer = %from, "stray datagram during handshake");
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!(attempt, "no response from hub");
                    break;
                }
            }
        }
        tokio::time::sleep(RETRY_GAP).await;
    }
    anyhow::bail!("hub did not respond after {ATTEMPTS} attempts")
}

/// UDP receive loop, datagram classification, fan-out, and liveness timers.
///
/// One socket, one registry. The receive loop classifies each datagram and
/// updates the registry; fan-out and the periodic PING emitter snapshot
/// their target lists under the registry lock and send after release, so a
/// slow or dead peer never delays anyone else.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use jam_protocol::frames::{self, classify_hub, HubFrame};
use jam_protocol::{MAX_DATAGRAM_SIZE, SOCKET_BUFFER_SIZE};

use crate::config::HubConfig;
use crate::registry::Registry;

/// Bind the hub socket with reuse-address and 64 KiB buffers.
fn bind_socket(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Whether a send error means the remote port is closed for good.
fn is_unreachable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

/// Send one datagram, evicting the peer on an unreachable-port error.
/// Other send errors are logged and the peer retained.
async fn send_checked(socket: &UdpSocket, registry: &Registry, bytes: &[u8], target: SocketAddr) {
    match socket.send_to(bytes, target).await {
        Ok(_) => {}
        Err(e) if is_unreachable(&e) => {
            if let Some(participant) = registry.remove(&target) {
                warn!(
                    nickname = %participant.nickname,
                    peer = %target,
                    error = %e,
                    "peer unreachable, evicting"
                );
            }
        }
        Err(e) => warn!(peer = %target, error = %e, "send failed"),
    }
}

pub struct HubServer {
    socket: Arc<UdpSocket>,
    registry: Arc<Registry>,
    config: HubConfig,
}

impl HubServer {
    /// Bind the configured endpoint. Must run inside a tokio runtime.
    pub fn bind(config: HubConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.network.bind, config.network.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;
        let std_socket = bind_socket(addr)?;
        let socket = UdpSocket::from_std(std_socket)?;
        info!(addr = %socket.local_addr()?, "hub listening");

        Ok(Self {
            socket: Arc::new(socket),
            registry: Arc::new(Registry::new()),
            config,
        })
    }

    /// The address the socket actually bound (port 0 resolves here).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Run the receive loop and both liveness timers until the task is
    /// cancelled. Returns only on a setup-grade socket failure.
    pub async fn serve(&self) -> anyhow::Result<()> {
        tokio::select! {
            r = self.recv_loop() => r,
            r = self.sweep_loop() => r,
            r = self.ping_loop() => r,
        }
    }

    async fn recv_loop(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, sender) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // The socket stays open no matter what a peer did.
                    warn!(error = %e, "receive error");
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    continue;
                }
            };
            self.handle_datagram(sender, &buf[..len]).await;
        }
    }

    async fn handle_datagram(&self, sender: SocketAddr, payload: &[u8]) {
        let now = Instant::now();
        let Some(frame) = classify_hub(payload) else {
            return;
        };
        debug!(
            peer = %sender,
            bytes = payload.len(),
            frame = frame_name(&frame),
            payload = %format!("{payload:02x?}"),
            "datagram"
        );

        // QUIT and CLIST never create a record.
        match frame {
            HubFrame::Quit => {
                if let Some(participant) = self.registry.remove(&sender) {
                    info!(nickname = %participant.nickname, peer = %sender, "participant left");
                }
                return;
            }
            HubFrame::RosterRequest => {
                self.registry.touch(&sender, now);
                self.send_roster(sender, now).await;
                return;
            }
            _ => {}
        }

        // Lazy creation: the first datagram from an unseen endpoint only
        // registers it and probes it, whatever the payload was. The record
        // keeps that payload as its nickname.
        if self.registry.observe(sender, payload, now) {
            let nickname = String::from_utf8_lossy(payload);
            info!(nickname = %nickname, peer = %sender, "participant joined");
            send_checked(&self.socket, &self.registry, frames::PING, sender).await;
            return;
        }

        match frame {
            HubFrame::Pong => {
                if let Some(rtt) = self.registry.record_pong(&sender, now) {
                    debug!(peer = %sender, rtt_ms = rtt, "round trip measured");
                }
            }
            HubFrame::Midi(bytes) => {
                self.registry.note_midi(&sender, bytes[0], now);
                self.fan_out(sender, bytes);
            }
            HubFrame::Join(_) => {
                debug!(peer = %sender, "duplicate join");
            }
            HubFrame::Quit | HubFrame::RosterRequest => unreachable!("handled above"),
        }
    }

    /// Forward the exact received bytes to every participant except the
    /// sender. The sends run on their own task so the receive loop is never
    /// blocked behind them, and an error on one target never delays the
    /// rest.
    fn fan_out(&self, sender: SocketAddr, payload: &[u8]) {
        let targets = self.registry.fanout_targets(&sender);
        if targets.is_empty() {
            return;
        }
        let socket = Arc::clone(&self.socket);
        let registry = Arc::clone(&self.registry);
        let bytes = payload.to_vec();
        tokio::spawn(async move {
            for target in targets {
                send_checked(&socket, &registry, &bytes, target).await;
            }
        });
    }

    async fn send_roster(&self, requester: SocketAddr, now: Instant) {
        let roster = self
            .registry
            .snapshot_roster(self.config.liveness.midi_activity_window(), now);
        match serde_json::to_vec(&roster) {
            Ok(json) => {
                debug!(peer = %requester, participants = roster.clients.len(), "roster reply");
                send_checked(&self.socket, &self.registry, &json, requester).await;
            }
            Err(e) => warn!(error = %e, "roster serialization failed"),
        }
    }

    /// Evict participants whose heartbeat aged past the liveness timeout.
    async fn sweep_loop(&self) -> anyhow::Result<()> {
        let timeout = self.config.liveness.timeout();
        let mut interval = tokio::time::interval(timeout);
        loop {
            interval.tick().await;
            for participant in self.registry.sweep(timeout, Instant::now()) {
                info!(
                    nickname = %participant.nickname,
                    peer = %participant.addr,
                    "participant timed out"
                );
            }
        }
    }

    /// Probe every participant at the heartbeat interval.
    async fn ping_loop(&self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.config.liveness.heartbeat_interval());
        loop {
            interval.tick().await;
            let targets = self.registry.stamp_pings(Instant::now());
            for target in targets {
                send_checked(&self.socket, &self.registry, frames::PING, target).await;
            }
        }
    }
}

fn frame_name(frame: &HubFrame<'_>) -> &'static str {
    match frame {
        HubFrame::Quit => "quit",
        HubFrame::RosterRequest => "clist",
        HubFrame::Pong => "pong",
        HubFrame::Midi(_) => "midi",
        HubFrame::Join(_) => "join",
    }
}

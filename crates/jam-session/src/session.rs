/// The session engine: one participant's connection to the hub.
///
/// Owns the socket, the MIDI transport, the roster cache, and the
/// background tasks. The control plane drives it with `start`/`stop` and
/// reads `state()` and `roster()`.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use jam_midi::MidiTransport;
use jam_protocol::frames::{CLIST, PONG, QUIT};
use jam_protocol::roster::Roster;
use jam_protocol::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_ROSTER_POLL_SECS, SOCKET_BUFFER_SIZE};

use crate::config::SessionConfig;
use crate::egress::{self, EgressShared};
use crate::{handshake, ingress};

/// How long the QUIT datagram gets to leave the local stack.
const QUIT_LINGER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshaking,
    Connected,
    Stopping,
    /// The last start attempt gave up. A new `start` may be issued.
    Failed,
}

struct ActiveSession {
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SessionEngine {
    config: SessionConfig,
    transport: Arc<RwLock<Box<dyn MidiTransport>>>,
    roster: Arc<RwLock<Option<Roster>>>,
    last_server_traffic: Arc<RwLock<Option<Instant>>>,
    state_tx: watch::Sender<SessionState>,
    active: Option<ActiveSession>,
}

/// Bind an ephemeral socket in the hub's address family, with the same
/// buffer sizing as the hub side.
fn bind_session_socket(server: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let domain = Domain::for_address(server);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
    let bind_addr: SocketAddr = if server.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };
    socket.bind(&bind_addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

impl SessionEngine {
    /// Take the configuration record and the MIDI transport. The engine
    /// starts Idle; nothing touches the network until `start`.
    pub fn new(config: SessionConfig, transport: Box<dyn MidiTransport>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            transport: Arc::new(RwLock::new(transport)),
            roster: Arc::new(RwLock::new(None)),
            last_server_traffic: Arc::new(RwLock::new(None)),
            state_tx,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions, for control planes that want to react.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Clone of the most recent roster snapshot, if any arrived yet.
    pub fn roster(&self) -> Option<Roster> {
        self.roster.read().unwrap().clone()
    }

    /// When the hub was last heard from, across all frame kinds.
    pub fn last_server_traffic(&self) -> Option<Instant> {
        *self.last_server_traffic.read().unwrap()
    }

    /// Whether the hub has been silent past the configured threshold.
    /// Always false when no threshold is configured: the hub alone decides
    /// who is still in the session.
    pub fn is_server_silent(&self) -> bool {
        let Some(secs) = self.config.session.silence_after_secs else {
            return false;
        };
        match self.last_server_traffic() {
            Some(last) => last.elapsed() > Duration::from_secs(secs),
            None => true,
        }
    }

    /// The engine's local socket address while connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active
            .as_ref()
            .and_then(|a| a.socket.local_addr().ok())
    }

    /// Handshake with the hub, open the MIDI ports, spawn the session
    /// tasks. On any failure nothing persists and the error surfaces to
    /// the caller.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.active.is_some() {
            anyhow::bail!("session already started");
        }
        self.config.validate()?;
        let server = self.config.server_addr()?;

        self.state_tx.send_replace(SessionState::Handshaking);

        let socket = match self.connect(server).await {
            Ok(socket) => socket,
            Err(e) => {
                self.state_tx.send_replace(SessionState::Failed);
                return Err(e);
            }
        };

        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.open_midi(ingress_tx) {
            // Release whatever did open; no partial state survives.
            if let Err(close_err) = self.transport.write().unwrap().close() {
                warn!(error = %close_err, "transport close failed");
            }
            self.state_tx.send_replace(SessionState::Failed);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let tasks = self.spawn_tasks(&socket, server, ingress_rx, &cancel);

        self.active = Some(ActiveSession {
            socket,
            server,
            cancel,
            tasks,
        });
        self.state_tx.send_replace(SessionState::Connected);
        info!(
            nickname = %self.config.session.nickname,
            server = %server,
            channel = self.config.session.channel,
            "session connected"
        );
        Ok(())
    }

    /// Leave the session. Idempotent: a second stop is a no-op.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.state_tx.send_replace(SessionState::Stopping);

        if let Err(e) = active.socket.send_to(QUIT, active.server).await {
            warn!(error = %e, "quit send failed");
        }
        // Give the datagram time to leave the local stack before the
        // socket goes away.
        tokio::time::sleep(QUIT_LINGER).await;

        active.cancel.cancel();
        for task in active.tasks {
            task.abort();
        }

        if let Err(e) = self.transport.write().unwrap().close() {
            warn!(error = %e, "transport close failed");
        }

        self.state_tx.send_replace(SessionState::Idle);
        info!("session stopped");
    }

    async fn connect(&self, server: SocketAddr) -> anyhow::Result<Arc<UdpSocket>> {
        let socket = Arc::new(UdpSocket::from_std(bind_session_socket(server)?)?);
        debug!(local = %socket.local_addr()?, server = %server, "socket bound");
        handshake::run(&socket, server, &self.config.session.nickname).await?;
        Ok(socket)
    }

    /// Open output first so the local echo works from the first event,
    /// then the input(s). Both inputs share the same ingress path.
    fn open_midi(&self, ingress_tx: mpsc::UnboundedSender<Vec<u8>>) -> anyhow::Result<()> {
        let channel = self.config.wire_channel();
        let mut transport = self.transport.write().unwrap();
        transport.open_output(self.config.midi.output)?;

        let callback =
            ingress::input_callback(channel, Arc::clone(&self.transport), ingress_tx.clone());
        transport.open_input(self.config.midi.input, callback)?;

        if let Some(second) = self.config.second_input() {
            let callback =
                ingress::input_callback(channel, Arc::clone(&self.transport), ingress_tx);
            transport.open_input(second, callback)?;
        }
        Ok(())
    }

    fn spawn_tasks(
        &self,
        socket: &Arc<UdpSocket>,
        server: SocketAddr,
        ingress_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        let shared = EgressShared {
            transport: Arc::clone(&self.transport),
            roster: Arc::clone(&self.roster),
            last_server_traffic: Arc::clone(&self.last_server_traffic),
        };
        tasks.push({
            let socket = Arc::clone(socket);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = egress::run(socket, server, shared) => {}
                    _ = cancel.cancelled() => {}
                }
            })
        });

        tasks.push({
            let socket = Arc::clone(socket);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = ingress::run_forwarder(socket, server, ingress_rx) => {}
                    _ = cancel.cancelled() => {}
                }
            })
        });

        tasks.push({
            let socket = Arc::clone(socket);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = run_keepalive(socket, server) => {}
                    _ = cancel.cancelled() => {}
                }
            })
        });

        tasks.push({
            let socket = Arc::clone(socket);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = run_roster_poll(socket, server) => {}
                    _ = cancel.cancelled() => {}
                }
            })
        });

        tasks
    }
}

/// Proactive PONG on the heartbeat interval. Keeps the hub's view of us
/// fresh even when its PINGs are lost one-way; latency stays correct
/// because the hub only measures when a PING is outstanding.
async fn run_keepalive(socket: Arc<UdpSocket>, server: SocketAddr) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS));
    loop {
        interval.tick().await;
        if let Err(e) = socket.send_to(PONG, server).await {
            warn!(error = %e, "keep-alive failed");
        }
    }
}

/// Ask for the roster on a fixed cadence; the egress loop consumes the
/// reply.
async fn run_roster_poll(socket: Arc<UdpSocket>, server: SocketAddr) {
    let mut interval = tokio::time::interval(Duration::from_secs(DEFAULT_ROSTER_POLL_SECS));
    loop {
        interval.tick().await;
        if let Err(e) = socket.send_to(CLIST, server).await {
            warn!(error = %e, "roster request failed");
        }
    }
}

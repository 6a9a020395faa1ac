//! Session engine scenarios: handshake, ingress policy on the wire, the
//! keep-alive responder, roster cache replacement, and teardown. Most
//! tests script the hub side with a bare socket; the first one runs
//! against the real relay.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use jam_midi::{MidiInputCallback, MidiTransport};
use jam_session::config::{MidiSection, ServerSection, SessionConfig, SessionSection};
use jam_session::{SessionEngine, SessionState};

// ── Scripted transport ──────────────────────────────────────────────────

#[derive(Default)]
struct TransportShared {
    callbacks: Mutex<Vec<MidiInputCallback>>,
    sent: Mutex<Vec<Vec<u8>>>,
    opened_inputs: Mutex<Vec<u32>>,
    closed: AtomicBool,
    fail_output: AtomicBool,
}

/// Test double for the device layer: records everything, lets the test
/// fire input events as if a driver thread delivered them.
struct ScriptedTransport {
    shared: Arc<TransportShared>,
}

#[derive(Clone)]
struct TransportHandle {
    shared: Arc<TransportShared>,
}

impl ScriptedTransport {
    fn new() -> (Self, TransportHandle) {
        let shared = Arc::new(TransportShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            TransportHandle { shared },
        )
    }

    fn failing_output() -> (Self, TransportHandle) {
        let (transport, handle) = Self::new();
        handle.shared.fail_output.store(true, Ordering::SeqCst);
        (transport, handle)
    }
}

impl MidiTransport for ScriptedTransport {
    fn open_input(&mut self, port: u32, callback: MidiInputCallback) -> anyhow::Result<()> {
        self.shared.opened_inputs.lock().unwrap().push(port);
        self.shared.callbacks.lock().unwrap().push(callback);
        Ok(())
    }

    fn open_output(&mut self, _port: u32) -> anyhow::Result<()> {
        if self.shared.fail_output.load(Ordering::SeqCst) {
            anyhow::bail!("output port unavailable");
        }
        Ok(())
    }

    fn send(&self, event: &[u8]) -> anyhow::Result<()> {
        self.shared.sent.lock().unwrap().push(event.to_vec());
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.callbacks.lock().unwrap().clear();
        Ok(())
    }
}

impl TransportHandle {
    /// Fire one input event into the callback registered for input `index`,
    /// the way a device-driver thread would.
    fn inject(&self, index: usize, event: &[u8]) {
        let callbacks = self.shared.callbacks.lock().unwrap();
        callbacks[index](event);
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.shared.sent.lock().unwrap().clone()
    }

    fn opened_inputs(&self) -> Vec<u32> {
        self.shared.opened_inputs.lock().unwrap().clone()
    }

    fn closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn config(server: SocketAddr, channel: u8) -> SessionConfig {
    SessionConfig {
        server: ServerSection {
            host: server.ip().to_string(),
            port: server.port(),
        },
        session: SessionSection {
            nickname: "alice".to_string(),
            channel,
            silence_after_secs: None,
        },
        midi: MidiSection::default(),
    }
}

async fn fake_hub() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

/// Accept the engine's join, reply ACK, return the engine's endpoint.
async fn accept_join(hub: &UdpSocket, expected_nickname: &str) -> SocketAddr {
    let mut buf = [0u8; 1024];
    let (len, from) = timeout(Duration::from_secs(2), hub.recv_from(&mut buf))
        .await
        .expect("no join within 2s")
        .unwrap();
    assert_eq!(&buf[..len], expected_nickname.as_bytes());
    hub.send_to(b"ACK", from).await.unwrap();
    from
}

/// Drain hub-side datagrams until one satisfies the predicate.
async fn hub_recv_matching(hub: &UdpSocket, pred: impl Fn(&[u8]) -> bool) -> Vec<u8> {
    let mut buf = [0u8; 1024];
    for _ in 0..32 {
        let (len, _) = timeout(Duration::from_millis(500), hub.recv_from(&mut buf))
            .await
            .expect("timed out waiting for a datagram")
            .unwrap();
        if pred(&buf[..len]) {
            return buf[..len].to_vec();
        }
    }
    panic!("no matching datagram within 32 receives");
}

/// Poll until the closure yields a value.
async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    for _ in 0..100 {
        if let Some(value) = probe() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 1s");
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_loop_against_the_real_hub() {
    let mut hub_config = jam_hub::config::HubConfig::default();
    hub_config.network.bind = "127.0.0.1".to_string();
    hub_config.network.port = 0;
    let hub = Arc::new(jam_hub::server::HubServer::bind(hub_config).unwrap());
    let hub_addr = hub.local_addr().unwrap();
    let hub_task = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let _ = hub.serve().await;
        })
    };

    let (transport, _handle) = ScriptedTransport::new();
    let mut engine = SessionEngine::new(config(hub_addr, 1), Box::new(transport));
    engine.start().await.expect("start");
    assert_eq!(engine.state(), SessionState::Connected);

    // The engine binds the wildcard address; the hub keys the record by
    // the loopback endpoint it observes.
    let local_port = engine.local_addr().expect("local addr").port();
    let local: SocketAddr = format!("127.0.0.1:{local_port}").parse().unwrap();
    let registry = hub.registry();
    // The handshake consumed the initial PING and answered it, so the hub
    // has a nickname and a round trip for us.
    let record = wait_for(|| registry.get(&local).filter(|r| r.latency_ms >= 0)).await;
    assert_eq!(record.nickname, "alice");

    // The roster poll fills the cache; we are our own first entry.
    let roster = wait_for(|| engine.roster()).await;
    assert!(roster.get("alice").is_some());

    engine.stop().await;
    assert_eq!(engine.state(), SessionState::Idle);
    wait_for(|| registry.get(&local).is_none().then_some(())).await;

    hub_task.abort();
}

#[tokio::test]
async fn handshake_gives_up_without_a_hub() {
    // Grab a loopback port with nothing behind it.
    let vacant = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = vacant.local_addr().unwrap();
    drop(vacant);

    let (transport, handle) = ScriptedTransport::new();
    let mut engine = SessionEngine::new(config(dead_addr, 1), Box::new(transport));

    let err = engine.start().await.expect_err("start must fail");
    assert!(err.to_string().contains("5 attempts"), "{err}");
    assert_eq!(engine.state(), SessionState::Failed);
    // No partial state: the devices were never opened.
    assert!(handle.opened_inputs().is_empty());
}

#[tokio::test]
async fn device_open_failure_aborts_the_start() {
    let (hub, hub_addr) = fake_hub().await;
    let (transport, handle) = ScriptedTransport::failing_output();
    let mut engine = SessionEngine::new(config(hub_addr, 1), Box::new(transport));

    let (result, _) = tokio::join!(engine.start(), accept_join(&hub, "alice"));
    result.expect_err("start must fail");
    assert_eq!(engine.state(), SessionState::Failed);
    assert!(handle.closed());
}

#[tokio::test]
async fn ingress_rewrites_to_the_configured_channel() {
    let (hub, hub_addr) = fake_hub().await;
    let (transport, handle) = ScriptedTransport::new();
    // Channel 6 as configured maps to wire channel 5.
    let mut engine = SessionEngine::new(config(hub_addr, 6), Box::new(transport));

    let (result, _) = tokio::join!(engine.start(), accept_join(&hub, "alice"));
    result.expect("start");

    handle.inject(0, &[0x91, 0x40, 0x64]);

    let datagram = hub_recv_matching(&hub, |d| d.first().is_some_and(|b| b & 0x80 != 0)).await;
    assert_eq!(datagram, [0x95, 0x40, 0x64]);
    // The local echo carries the adjusted event too.
    assert_eq!(handle.sent(), vec![vec![0x95, 0x40, 0x64]]);

    engine.stop().await;
}

#[tokio::test]
async fn ingress_filter_keeps_system_messages_off_the_wire() {
    let (hub, hub_addr) = fake_hub().await;
    let (transport, handle) = ScriptedTransport::new();
    let mut engine = SessionEngine::new(config(hub_addr, 1), Box::new(transport));

    let (result, _) = tokio::join!(engine.start(), accept_join(&hub, "alice"));
    result.expect("start");

    // Timing clock, program change, running-status data.
    handle.inject(0, &[0xF8]);
    handle.inject(0, &[0xC0, 0x05]);
    handle.inject(0, &[0x3C, 0x7F]);

    // Whatever arrives in the next while is keep-alive traffic, not MIDI.
    let mut buf = [0u8; 1024];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, hub.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => {
                assert!(
                    buf[..len] == *b"PONG" || buf[..len] == *b"CLIST",
                    "unexpected datagram: {:02x?}",
                    &buf[..len]
                );
            }
            _ => break,
        }
    }
    assert!(handle.sent().is_empty(), "nothing may reach the local output");

    engine.stop().await;
}

#[tokio::test]
async fn secondary_input_shares_the_ingress_path() {
    let (hub, hub_addr) = fake_hub().await;
    let (transport, handle) = ScriptedTransport::new();
    let mut cfg = config(hub_addr, 3);
    cfg.midi.input = 0;
    cfg.midi.input_2 = 1;
    let mut engine = SessionEngine::new(cfg, Box::new(transport));

    let (result, _) = tokio::join!(engine.start(), accept_join(&hub, "alice"));
    result.expect("start");
    assert_eq!(handle.opened_inputs(), vec![0, 1]);

    handle.inject(1, &[0x90, 0x3C, 0x7F]);
    let datagram = hub_recv_matching(&hub, |d| d.first().is_some_and(|b| b & 0x80 != 0)).await;
    assert_eq!(datagram, [0x92, 0x3C, 0x7F]);

    engine.stop().await;
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let (hub, hub_addr) = fake_hub().await;
    let (transport, _handle) = ScriptedTransport::new();
    let mut engine = SessionEngine::new(config(hub_addr, 1), Box::new(transport));

    let (result, engine_addr) = tokio::join!(engine.start(), accept_join(&hub, "alice"));
    result.expect("start");

    // Let the startup keep-alive and roster poll drain.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut buf = [0u8; 1024];
    while timeout(Duration::from_millis(50), hub.recv_from(&mut buf))
        .await
        .is_ok()
    {}

    hub.send_to(b"PING", engine_addr).await.unwrap();
    let reply = hub_recv_matching(&hub, |d| d == b"PONG").await;
    assert_eq!(reply, b"PONG");

    engine.stop().await;
}

#[tokio::test]
async fn remote_midi_reaches_the_local_output_verbatim() {
    let (hub, hub_addr) = fake_hub().await;
    let (transport, handle) = ScriptedTransport::new();
    let mut engine = SessionEngine::new(config(hub_addr, 1), Box::new(transport));

    let (result, engine_addr) = tokio::join!(engine.start(), accept_join(&hub, "alice"));
    result.expect("start");

    hub.send_to(&[0x9A, 0x3C, 0x7F], engine_addr).await.unwrap();
    let delivered = wait_for(|| {
        handle
            .sent()
            .into_iter()
            .find(|event| event == &[0x9A, 0x3C, 0x7F])
    })
    .await;
    assert_eq!(delivered, [0x9A, 0x3C, 0x7F]);

    engine.stop().await;
}

#[tokio::test]
async fn roster_cache_is_replaced_whole() {
    let (hub, hub_addr) = fake_hub().await;
    let (transport, _handle) = ScriptedTransport::new();
    let mut engine = SessionEngine::new(config(hub_addr, 1), Box::new(transport));

    let (result, engine_addr) = tokio::join!(engine.start(), accept_join(&hub, "alice"));
    result.expect("start");
    assert!(engine.roster().is_none());

    let first = br#"{"clients":[{"nickname":"bob","channel":3,"active":true,"latency_ms":12}]}"#;
    hub.send_to(first, engine_addr).await.unwrap();
    let roster = wait_for(|| engine.roster()).await;
    assert_eq!(roster.clients.len(), 1);
    assert_eq!(roster.get("bob").unwrap().latency_ms, 12);

    // Garbage never clobbers the cache.
    hub.send_to(b"{oops", engine_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.roster().unwrap().clients.len(), 1);

    // The next snapshot replaces the previous one wholesale.
    let second = br#"{"clients":[{"nickname":"bob","channel":3,"active":false,"latency_ms":9},{"nickname":"carol","channel":5,"active":true,"latency_ms":-1}]}"#;
    hub.send_to(second, engine_addr).await.unwrap();
    let roster = wait_for(|| engine.roster().filter(|r| r.clients.len() == 2)).await;
    assert!(!roster.get("bob").unwrap().active);
    assert_eq!(roster.get("carol").unwrap().latency_ms, -1);

    engine.stop().await;
}

#[tokio::test]
async fn stop_sends_quit_once_and_is_idempotent() {
    let (hub, hub_addr) = fake_hub().await;
    let (transport, handle) = ScriptedTransport::new();
    let mut engine = SessionEngine::new(config(hub_addr, 1), Box::new(transport));

    let (result, _) = tokio::join!(engine.start(), accept_join(&hub, "alice"));
    result.expect("start");

    engine.stop().await;
    engine.stop().await;
    assert_eq!(engine.state(), SessionState::Idle);
    assert!(handle.closed());

    let mut quits = 0;
    let mut buf = [0u8; 1024];
    while let Ok(received) = timeout(Duration::from_millis(200), hub.recv_from(&mut buf)).await {
        let (len, _) = received.unwrap();
        if &buf[..len] == b"QUIT" {
            quits += 1;
        }
    }
    assert_eq!(quits, 1, "exactly one QUIT on the wire");
}

/// Hub → local MIDI, plus the keep-alive responder and the roster cache
/// writer. A single receive loop on the engine's socket.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use jam_midi::MidiTransport;
use jam_protocol::frames::{classify_session, SessionFrame, PONG};
use jam_protocol::roster::Roster;
use jam_protocol::MAX_DATAGRAM_SIZE;

pub(crate) struct EgressShared {
    pub transport: Arc<RwLock<Box<dyn MidiTransport>>>,
    pub roster: Arc<RwLock<Option<Roster>>>,
    pub last_server_traffic: Arc<RwLock<Option<Instant>>>,
}

pub(crate) async fn run(socket: Arc<UdpSocket>, server: SocketAddr, shared: EgressShared) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, _from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "receive error");
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                continue;
            }
        };
        *shared.last_server_traffic.write().unwrap() = Some(Instant::now());

        match classify_session(&buf[..len]) {
            Some(SessionFrame::Ping) => {
                if let Err(e) = socket.send_to(PONG, server).await {
                    warn!(error = %e, "pong failed");
                }
            }
            Some(SessionFrame::Midi(bytes)) => {
                // The hub already decided these bytes should reach us;
                // forward verbatim.
                if let Err(e) = shared.transport.read().unwrap().send(bytes) {
                    warn!(error = %e, "local output failed");
                }
            }
            Some(SessionFrame::Data(bytes)) => match Roster::from_json(bytes) {
                Some(roster) => {
                    debug!(participants = roster.clients.len(), "roster updated");
                    *shared.roster.write().unwrap() = Some(roster);
                }
                None => debug!(bytes = len, "unparseable datagram dropped"),
            },
            None => {}
        }
    }
}

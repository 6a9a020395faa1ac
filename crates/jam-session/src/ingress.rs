/// Local MIDI in → hub.
///
/// The device callback runs on whatever thread the driver uses; it must
/// never touch the socket. It filters, rewrites, echoes to the local
/// output, and hands the adjusted bytes to the forwarder task through an
/// unbounded channel — the runtime's thread-safe submission path.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use jam_midi::{MidiInputCallback, MidiTransport};
use jam_protocol::midi::rewrite_channel;

/// Build the callback both input ports share.
pub(crate) fn input_callback(
    channel: u8,
    transport: Arc<RwLock<Box<dyn MidiTransport>>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> MidiInputCallback {
    Box::new(move |event| {
        let Some(adjusted) = rewrite_channel(event, channel) else {
            return;
        };
        // Local echo of the adjusted event: the player hears themselves
        // on the channel they broadcast on.
        if let Err(e) = transport.read().unwrap().send(&adjusted) {
            warn!(error = %e, "local echo failed");
        }
        let _ = tx.send(adjusted);
    })
}

/// Drain the ingress channel onto the wire. Send errors are logged and the
/// engine keeps trying; the hub may still be recovering.
pub(crate) async fn run_forwarder(
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(event) = rx.recv().await {
        match socket.send_to(&event, server).await {
            Ok(_) => debug!(bytes = event.len(), "midi sent to hub"),
            Err(e) => warn!(error = %e, "send to hub failed"),
        }
    }
}

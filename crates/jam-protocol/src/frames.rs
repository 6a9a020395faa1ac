/// ASCII control frames and first-byte datagram classification.
///
/// Every datagram on the wire is one of: an exact-bytes control frame, a
/// MIDI event (first byte has the high bit set), a roster JSON object
/// (hub to engine only), or a nickname join (anything else, client to hub
/// only). Discrimination is exact-length + exact-bytes first, then the
/// status high bit.

/// Graceful leave, client to hub.
pub const QUIT: &[u8] = b"QUIT";
/// Roster request, client to hub.
pub const CLIST: &[u8] = b"CLIST";
/// Liveness probe, hub to client.
pub const PING: &[u8] = b"PING";
/// Liveness reply or proactive keep-alive, client to hub.
pub const PONG: &[u8] = b"PONG";
/// Optional handshake confirmation, hub to client.
pub const ACK: &[u8] = b"ACK";

/// Nicknames are 1-63 printable bytes.
pub const MAX_NICKNAME_LEN: usize = 63;

/// A datagram as the hub reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubFrame<'a> {
    Quit,
    RosterRequest,
    Pong,
    /// Verbatim MIDI bytes to fan out.
    Midi(&'a [u8]),
    /// The whole payload is the nickname (possibly a duplicate join).
    Join(&'a [u8]),
}

/// Classify a hub-inbound datagram. Empty datagrams match nothing.
pub fn classify_hub(payload: &[u8]) -> Option<HubFrame<'_>> {
    if payload.is_empty() {
        return None;
    }
    if payload == QUIT {
        return Some(HubFrame::Quit);
    }
    if payload == CLIST {
        return Some(HubFrame::RosterRequest);
    }
    if payload == PONG {
        return Some(HubFrame::Pong);
    }
    if payload[0] & 0x80 != 0 {
        return Some(HubFrame::Midi(payload));
    }
    Some(HubFrame::Join(payload))
}

/// A datagram as the session engine reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFrame<'a> {
    Ping,
    /// Verbatim MIDI bytes for the local output.
    Midi(&'a [u8]),
    /// Not a control frame, not MIDI: candidate roster JSON.
    Data(&'a [u8]),
}

/// Classify an engine-inbound datagram. Empty datagrams match nothing.
pub fn classify_session(payload: &[u8]) -> Option<SessionFrame<'_>> {
    if payload.is_empty() {
        return None;
    }
    if payload == PING {
        return Some(SessionFrame::Ping);
    }
    if payload[0] & 0x80 != 0 {
        return Some(SessionFrame::Midi(payload));
    }
    Some(SessionFrame::Data(payload))
}

/// Whether `name` is usable as a join payload: 1-63 printable ASCII bytes,
/// not starting with `{` or `[` (the roster JSON discriminators), and not
/// one of the control words the hub would never read as a join.
pub fn is_valid_nickname(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_NICKNAME_LEN {
        return false;
    }
    if bytes[0] == b'{' || bytes[0] == b'[' {
        return false;
    }
    if bytes == QUIT || bytes == CLIST || bytes == PONG {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
}

/// MIDI status-byte helpers and the ingress policy.
///
/// A MIDI event is 1-3 bytes; byte 0 is the status byte (high bit set),
/// high nibble = message kind, low nibble = channel. Only a fixed set of
/// channel-voice kinds is admitted from local input; system-common and
/// realtime messages never reach the wire.

/// True for any status byte (as opposed to a data byte).
pub fn is_status_byte(byte: u8) -> bool {
    byte & 0x80 != 0
}

/// The message kind: the status high nibble.
pub fn kind(status: u8) -> u8 {
    status & 0xF0
}

/// The MIDI channel 0-15: the status low nibble.
pub fn channel(status: u8) -> u8 {
    status & 0x0F
}

/// Channel-voice kinds admitted from local input: Note Off, Note On,
/// Poly Aftertouch, Control Change, Channel Pressure.
pub fn is_accepted_kind(status: u8) -> bool {
    matches!(status & 0xF0, 0x80 | 0x90 | 0xA0 | 0xB0 | 0xD0)
}

/// Apply the ingress policy to one event from a local input.
///
/// Rejects events whose kind is outside the accepted set (including
/// running-status data bytes, whose "kind" nibble has the high bit clear).
/// Accepted events are cloned with the status low nibble rewritten to
/// `channel`, kind preserved.
pub fn rewrite_channel(event: &[u8], channel: u8) -> Option<Vec<u8>> {
    let status = *event.first()?;
    if !is_accepted_kind(status) {
        return None;
    }
    let mut adjusted = event.to_vec();
    adjusted[0] = (status & 0xF0) | (channel & 0x0F);
    Some(adjusted)
}

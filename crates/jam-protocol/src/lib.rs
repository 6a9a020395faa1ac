pub mod frames;
pub mod midi;
pub mod roster;

/// Default hub UDP port.
pub const DEFAULT_HUB_PORT: u16 = 5000;

/// Interval between hub liveness probes (and the engine's proactive PONGs).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// A participant silent for longer than this is evicted by the hub.
pub const DEFAULT_LIVENESS_TIMEOUT_SECS: u64 = 20;

/// A participant counts as "active" in the roster if it sent MIDI
/// within this window.
pub const DEFAULT_MIDI_ACTIVITY_WINDOW_MS: u64 = 2000;

/// Interval between the engine's roster requests.
pub const DEFAULT_ROSTER_POLL_SECS: u64 = 5;

/// OS-level send/receive buffer size requested on every socket.
pub const SOCKET_BUFFER_SIZE: usize = 64 * 1024;

/// Receive buffer for a single datagram. MIDI events are at most a few
/// bytes, but roster replies can run to kilobytes.
pub const MAX_DATAGRAM_SIZE: usize = 8 * 1024;

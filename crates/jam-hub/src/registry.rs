/// Participant registry: the hub's single owning map of connected peers.
///
/// Keyed by the observed datagram sender address. All mutation happens
/// under one mutex with short critical sections; callers that need to do
/// socket I/O against a set of participants (fan-out, pings) snapshot the
/// target list under the lock and send after release, so the lock is never
/// held across an await.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use jam_protocol::roster::{Roster, RosterEntry, LATENCY_UNKNOWN};

/// One connected peer.
#[derive(Debug, Clone)]
pub struct Participant {
    pub addr: SocketAddr,
    /// Taken verbatim from the first datagram this endpoint ever sent.
    pub nickname: String,
    /// Low nibble of the most recent MIDI status byte, 0 until then.
    pub channel: u8,
    /// Receive time of the most recent datagram of any kind.
    pub last_heartbeat: Instant,
    /// Receive time of the most recent MIDI-bearing datagram.
    pub last_midi_activity: Option<Instant>,
    /// Transmit time of the most recent PING to this endpoint.
    pub last_ping_sent: Option<Instant>,
    /// Most recent measured round trip, or -1.
    pub latency_ms: i64,
}

impl Participant {
    fn new(addr: SocketAddr, nickname: String, now: Instant) -> Self {
        Self {
            addr,
            nickname,
            channel: 0,
            last_heartbeat: now,
            last_midi_activity: None,
            last_ping_sent: None,
            latency_ms: LATENCY_UNKNOWN,
        }
    }
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<HashMap<SocketAddr, Participant>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create the sender's record, refreshing its heartbeat.
    ///
    /// Returns `true` when the record was newly created. Creation takes the
    /// nickname verbatim (lossy UTF-8) from the datagram payload and stamps
    /// `last_ping_sent`; the caller owes the new participant its initial
    /// PING. The entry API makes racing creations resolve to exactly one
    /// record and one `true` return.
    pub fn observe(&self, addr: SocketAddr, payload: &[u8], now: Instant) -> bool {
        let mut map = self.inner.lock().unwrap();
        match map.entry(addr) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().last_heartbeat = now;
                false
            }
            Entry::Vacant(vacant) => {
                let nickname = String::from_utf8_lossy(payload).into_owned();
                let mut participant = Participant::new(addr, nickname, now);
                participant.last_ping_sent = Some(now);
                vacant.insert(participant);
                true
            }
        }
    }

    /// Refresh the heartbeat of an existing record. Never creates.
    pub fn touch(&self, addr: &SocketAddr, now: Instant) {
        if let Some(participant) = self.inner.lock().unwrap().get_mut(addr) {
            participant.last_heartbeat = now;
        }
    }

    /// Record a PONG from `addr`: latency becomes the time since the last
    /// PING, clamped non-negative. The PING timestamp is retained, so a
    /// duplicate PONG re-measures against the same probe. Returns the new
    /// latency, or `None` when no PING is outstanding.
    pub fn record_pong(&self, addr: &SocketAddr, now: Instant) -> Option<i64> {
        let mut map = self.inner.lock().unwrap();
        let participant = map.get_mut(addr)?;
        let sent = participant.last_ping_sent?;
        let rtt = now.saturating_duration_since(sent).as_millis() as i64;
        participant.latency_ms = rtt;
        Some(rtt)
    }

    /// Record MIDI traffic: track the channel from the status low nibble
    /// and stamp the activity time.
    pub fn note_midi(&self, addr: &SocketAddr, status: u8, now: Instant) {
        if let Some(participant) = self.inner.lock().unwrap().get_mut(addr) {
            participant.channel = status & 0x0F;
            participant.last_midi_activity = Some(now);
        }
    }

    /// Remove a participant, returning the record if it existed.
    pub fn remove(&self, addr: &SocketAddr) -> Option<Participant> {
        self.inner.lock().unwrap().remove(addr)
    }

    /// Endpoints a MIDI datagram from `sender` fans out to.
    pub fn fanout_targets(&self, sender: &SocketAddr) -> Vec<SocketAddr> {
        self.inner
            .lock()
            .unwrap()
            .keys()
            .filter(|addr| *addr != sender)
            .copied()
            .collect()
    }

    /// Stamp `last_ping_sent = now` on every participant and return all
    /// endpoints, for the periodic PING emitter.
    pub fn stamp_pings(&self, now: Instant) -> Vec<SocketAddr> {
        let mut map = self.inner.lock().unwrap();
        map.values_mut()
            .map(|participant| {
                participant.last_ping_sent = Some(now);
                participant.addr
            })
            .collect()
    }

    /// Evict every participant whose heartbeat is older than `timeout`,
    /// returning the evicted records.
    pub fn sweep(&self, timeout: Duration, now: Instant) -> Vec<Participant> {
        let mut map = self.inner.lock().unwrap();
        let stale: Vec<SocketAddr> = map
            .values()
            .filter(|p| now.saturating_duration_since(p.last_heartbeat) > timeout)
            .map(|p| p.addr)
            .collect();
        stale.into_iter().filter_map(|addr| map.remove(&addr)).collect()
    }

    /// Build a roster snapshot of every participant, requester included.
    pub fn snapshot_roster(&self, activity_window: Duration, now: Instant) -> Roster {
        let map = self.inner.lock().unwrap();
        let clients = map
            .values()
            .map(|p| RosterEntry {
                nickname: p.nickname.clone(),
                channel: p.channel,
                active: p
                    .last_midi_activity
                    .is_some_and(|t| now.saturating_duration_since(t) < activity_window),
                latency_ms: p.latency_ms,
            })
            .collect();
        Roster { clients }
    }

    /// Clone a participant record, mainly for logs and tests.
    pub fn get(&self, addr: &SocketAddr) -> Option<Participant> {
        self.inner.lock().unwrap().get(addr).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

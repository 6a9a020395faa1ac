/// Roster snapshot schema, shared by the hub (producer) and the session
/// engine (consumer).

use serde::{Deserialize, Serialize};

/// Latency sentinel for "no round trip measured yet".
pub const LATENCY_UNKNOWN: i64 = -1;

/// One participant as reported by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub nickname: String,
    /// Last observed MIDI channel, 0-15.
    pub channel: u8,
    /// True iff the participant sent MIDI within the activity window.
    pub active: bool,
    /// Most recent measured round trip, or -1 if unknown.
    pub latency_ms: i64,
}

/// The hub's answer to a `CLIST` request. Includes the requester.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    #[serde(default)]
    pub clients: Vec<RosterEntry>,
}

impl Roster {
    /// Parse a datagram as a roster reply. Only a top-level JSON object is
    /// accepted; anything else is not a roster.
    pub fn from_json(data: &[u8]) -> Option<Roster> {
        if data.first() != Some(&b'{') {
            return None;
        }
        serde_json::from_slice(data).ok()
    }

    /// Find a participant by nickname (first match; names are not unique).
    pub fn get(&self, nickname: &str) -> Option<&RosterEntry> {
        self.clients.iter().find(|c| c.nickname == nickname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let roster = Roster {
            clients: vec![
                RosterEntry {
                    nickname: "alice".to_string(),
                    channel: 0,
                    active: true,
                    latency_ms: 12,
                },
                RosterEntry {
                    nickname: "bob".to_string(),
                    channel: 3,
                    active: false,
                    latency_ms: LATENCY_UNKNOWN,
                },
            ],
        };

        let json = serde_json::to_vec(&roster).unwrap();
        assert_eq!(json[0], b'{');
        let parsed = Roster::from_json(&json).unwrap();
        assert_eq!(parsed, roster);
        assert_eq!(parsed.get("bob").unwrap().latency_ms, -1);
    }

    #[test]
    fn only_objects_parse() {
        assert!(Roster::from_json(br#"{"clients":[]}"#).is_some());
        // An empty object is a roster with no clients.
        assert_eq!(Roster::from_json(b"{}").unwrap().clients.len(), 0);
        assert!(Roster::from_json(b"[1,2,3]").is_none());
        assert!(Roster::from_json(b"\"clients\"").is_none());
        assert!(Roster::from_json(b"{not json").is_none());
        assert!(Roster::from_json(b"").is_none());
    }
}

/// Hub daemon configuration.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub liveness: LivenessSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessSection {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_activity_window")]
    pub midi_activity_window_ms: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            timeout_secs: default_timeout(),
            midi_activity_window_ms: default_activity_window(),
        }
    }
}

impl LivenessSection {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn midi_activity_window(&self) -> Duration {
        Duration::from_millis(self.midi_activity_window_ms)
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    jam_protocol::DEFAULT_HUB_PORT
}
fn default_heartbeat_interval() -> u64 {
    jam_protocol::DEFAULT_HEARTBEAT_INTERVAL_SECS
}
fn default_timeout() -> u64 {
    jam_protocol::DEFAULT_LIVENESS_TIMEOUT_SECS
}
fn default_activity_window() -> u64 {
    jam_protocol::DEFAULT_MIDI_ACTIVITY_WINDOW_MS
}

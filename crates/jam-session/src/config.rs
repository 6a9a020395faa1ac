/// Session configuration: the immutable record the control plane hands
/// the engine before start.

use std::net::{SocketAddr, ToSocketAddrs};

use serde::Deserialize;

use jam_protocol::frames::is_valid_nickname;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub midi: MidiSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_nickname")]
    pub nickname: String,
    /// MIDI channel as musicians count them, 1-16.
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Treat the hub as silent after this many seconds without traffic.
    /// Unset: only the hub decides who is still in the session.
    #[serde(default)]
    pub silence_after_secs: Option<u64>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            channel: default_channel(),
            silence_after_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MidiSection {
    /// Primary input port.
    #[serde(default)]
    pub input: u32,
    /// Secondary input port, -1 for none.
    #[serde(default = "default_no_port")]
    pub input_2: i64,
    /// Output port.
    #[serde(default)]
    pub output: u32,
}

impl Default for MidiSection {
    fn default() -> Self {
        Self {
            input: 0,
            input_2: default_no_port(),
            output: 0,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    jam_protocol::DEFAULT_HUB_PORT
}
fn default_nickname() -> String {
    "player".to_string()
}
fn default_channel() -> u8 {
    1
}
fn default_no_port() -> i64 {
    -1
}

impl SessionConfig {
    /// Check the record before the engine takes it. Returns the first
    /// problem found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_valid_nickname(&self.session.nickname) {
            anyhow::bail!(
                "nickname {:?} is not usable (1-63 printable bytes, no leading '{{' or '[', \
                 not a protocol word)",
                self.session.nickname
            );
        }
        if !(1..=16).contains(&self.session.channel) {
            anyhow::bail!("channel {} out of range 1-16", self.session.channel);
        }
        match self.midi.input_2 {
            -1 => {}
            port if port < 0 || port > u32::MAX as i64 => {
                anyhow::bail!("secondary input {} is not a port (use -1 for none)", port);
            }
            port if port as u32 == self.midi.input => {
                anyhow::bail!("secondary input must differ from the primary");
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolve the hub endpoint. First address wins.
    pub fn server_addr(&self) -> anyhow::Result<SocketAddr> {
        (self.server.host.as_str(), self.server.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                anyhow::anyhow!("{}:{} resolves to nothing", self.server.host, self.server.port)
            })
    }

    /// The channel as it goes on the wire, 0-15.
    pub fn wire_channel(&self) -> u8 {
        self.session.channel - 1
    }

    /// The secondary input, if one is configured.
    pub fn second_input(&self) -> Option<u32> {
        (self.midi.input_2 >= 0).then(|| self.midi.input_2 as u32)
    }
}

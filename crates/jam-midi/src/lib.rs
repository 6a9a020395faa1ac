/// Abstract local MIDI transport.
///
/// The session engine never talks to MIDI hardware directly; it goes
/// through this trait. An implementation owns the platform device layer
/// (ALSA, CoreMIDI, ...) and delivers complete event byte sequences via
/// the input callback — possibly from a device-driver thread, so the
/// callback must not assume it runs on the async runtime.

/// Input callback: receives one complete MIDI event per invocation.
pub type MidiInputCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

pub trait MidiTransport: Send + Sync {
    /// Subscribe to a local input port. May be called twice (primary and
    /// secondary input); each subscription gets its own callback.
    fn open_input(&mut self, port: u32, callback: MidiInputCallback) -> anyhow::Result<()>;

    /// Open the local output port.
    fn open_output(&mut self, port: u32) -> anyhow::Result<()>;

    /// Deliver an event to the local output.
    fn send(&self, event: &[u8]) -> anyhow::Result<()>;

    /// Release all ports. Idempotent.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// Transport that accepts everything and delivers nothing. Used where no
/// real device layer is wired in (headless daemons, tests that only care
/// about the network side).
#[derive(Default)]
pub struct NullMidiTransport;

impl NullMidiTransport {
    pub fn new() -> Self {
        Self
    }
}

impl MidiTransport for NullMidiTransport {
    fn open_input(&mut self, port: u32, _callback: MidiInputCallback) -> anyhow::Result<()> {
        tracing::warn!(port, "null MIDI transport: input will deliver no events");
        Ok(())
    }

    fn open_output(&mut self, port: u32) -> anyhow::Result<()> {
        tracing::warn!(port, "null MIDI transport: output discards events");
        Ok(())
    }

    fn send(&self, _event: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

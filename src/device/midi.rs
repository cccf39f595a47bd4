use crossbeam::channel::Receiver;
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::info;

use super::{InputSource, KeyEvent, OutputSink};
use crate::error::{DeviceError, EngineError};

const CLIENT_NAME: &str = "canora";

/// Hardware (or virtual) MIDI output opened through midir.
pub struct MidiOutputDevice {
    conn: MidiOutputConnection,
}

impl MidiOutputDevice {
    /// Connects to the first available output port.
    pub fn open_default() -> Result<Self, EngineError> {
        Self::open_matching(None)
    }

    /// Connects to the first output port whose name contains `name`, or the
    /// first port at all when `name` is None.
    pub fn open_matching(name: Option<&str>) -> Result<Self, EngineError> {
        let out = MidiOutput::new(CLIENT_NAME).map_err(|e| EngineError::DeviceOpen(e.to_string()))?;
        let ports = out.ports();
        let port = match name {
            Some(name) => ports
                .iter()
                .find(|p| out.port_name(p).unwrap_or_default().contains(name)),
            None => ports.first(),
        }
        .ok_or(EngineError::OutputUnavailable)?;

        let port_name = out.port_name(port).unwrap_or_default();
        let conn = out
            .connect(port, "canora-out")
            .map_err(|e| EngineError::DeviceOpen(e.to_string()))?;
        info!(port = %port_name, "MIDI output connected");
        Ok(Self { conn })
    }

    fn send(&mut self, msg: &[u8]) -> Result<(), DeviceError> {
        self.conn.send(msg).map_err(|e| DeviceError::Send(e.to_string()))
    }
}

impl OutputSink for MidiOutputDevice {
    fn begin(&mut self, pitch: u8, velocity: u8, channel: u8) -> Result<(), DeviceError> {
        self.send(&[0x90 | (channel & 0x0F), pitch & 0x7F, velocity & 0x7F])
    }

    fn end(&mut self, pitch: u8, velocity: u8, channel: u8) -> Result<(), DeviceError> {
        self.send(&[0x80 | (channel & 0x0F), pitch & 0x7F, velocity & 0x7F])
    }

    fn select_program(&mut self, program: u8, channel: u8) -> Result<(), DeviceError> {
        self.send(&[0xC0 | (channel & 0x0F), program & 0x7F])
    }
}

/// Hardware MIDI input. midir delivers events on its own callback thread;
/// they are pumped into a channel so the engine can poll non-blockingly.
pub struct MidiInputDevice {
    rx: Receiver<KeyEvent>,
    _conn: MidiInputConnection<()>,
}

impl MidiInputDevice {
    pub fn open_default() -> Result<Self, EngineError> {
        Self::open_matching(None)
    }

    pub fn open_matching(name: Option<&str>) -> Result<Self, EngineError> {
        let input = MidiInput::new(CLIENT_NAME).map_err(|e| EngineError::DeviceOpen(e.to_string()))?;
        let ports = input.ports();
        let port = match name {
            Some(name) => ports
                .iter()
                .find(|p| input.port_name(p).unwrap_or_default().contains(name)),
            None => ports.first(),
        }
        .ok_or(EngineError::InputUnavailable)?
        .clone();

        let port_name = input.port_name(&port).unwrap_or_default();
        let (tx, rx) = crossbeam::channel::unbounded();
        let conn = input
            .connect(
                &port,
                "canora-in",
                move |_timestamp, msg, _| {
                    if let Some(event) = KeyEvent::from_midi(msg) {
                        let _ = tx.send(event);
                    }
                },
                (),
            )
            .map_err(|e| EngineError::DeviceOpen(e.to_string()))?;
        info!(port = %port_name, "MIDI input connected");
        Ok(Self { rx, _conn: conn })
    }
}

impl InputSource for MidiInputDevice {
    fn poll(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn read(&mut self, max: usize) -> Vec<KeyEvent> {
        self.rx.try_iter().take(max).collect()
    }
}

mod midi;

pub use midi::{MidiInputDevice, MidiOutputDevice};

use crate::error::DeviceError;

/// A key press or release read from an input device. Velocity 0 means
/// release, matching the wire convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub pitch: u8,
    pub velocity: u8,
}

impl KeyEvent {
    /// Decodes a raw MIDI message into a key event, if it is one. Running
    /// status is not handled; midir delivers complete messages.
    pub fn from_midi(msg: &[u8]) -> Option<Self> {
        if msg.len() < 3 {
            return None;
        }
        match msg[0] & 0xF0 {
            0x90 => Some(Self {
                pitch: msg[1] & 0x7F,
                velocity: msg[2] & 0x7F,
            }),
            0x80 => Some(Self {
                pitch: msg[1] & 0x7F,
                velocity: 0,
            }),
            _ => None,
        }
    }
}

/// Capability surface of an output device: note begin/end plus program
/// selection. Any call may fail at the device level; the engine reports
/// failures and keeps going.
pub trait OutputSink: Send {
    fn begin(&mut self, pitch: u8, velocity: u8, channel: u8) -> Result<(), DeviceError>;
    fn end(&mut self, pitch: u8, velocity: u8, channel: u8) -> Result<(), DeviceError>;
    fn select_program(&mut self, program: u8, channel: u8) -> Result<(), DeviceError>;
}

/// Non-blocking input device surface.
pub trait InputSource: Send {
    /// True if at least one event is waiting.
    fn poll(&mut self) -> bool;
    /// Returns at most `max` pending events.
    fn read(&mut self, max: usize) -> Vec<KeyEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_note_on_and_off() {
        assert_eq!(
            KeyEvent::from_midi(&[0x90, 60, 100]),
            Some(KeyEvent {
                pitch: 60,
                velocity: 100
            })
        );
        // note-on with velocity 0 and real note-off both decode as release
        assert_eq!(
            KeyEvent::from_midi(&[0x91, 60, 0]),
            Some(KeyEvent {
                pitch: 60,
                velocity: 0
            })
        );
        assert_eq!(
            KeyEvent::from_midi(&[0x80, 60, 64]),
            Some(KeyEvent {
                pitch: 60,
                velocity: 0
            })
        );
    }

    #[test]
    fn ignores_non_key_messages() {
        assert_eq!(KeyEvent::from_midi(&[0xB0, 1, 64]), None);
        assert_eq!(KeyEvent::from_midi(&[0xE0, 0, 64]), None);
        assert_eq!(KeyEvent::from_midi(&[0x90, 60]), None);
    }
}

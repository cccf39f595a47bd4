use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Whether a held pitch was activated by the player or by queued playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActivationSource {
    Manual,
    Auto,
}

/// A timed note. `start_offset` is seconds relative to the enqueue epoch,
/// `duration` is seconds of hold before the release fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub start_offset: f64,
    pub duration: f64,
    pub velocity: u8,
}

impl Note {
    pub fn new(pitch: u8, start_offset: f64, duration: f64, velocity: u8) -> Result<Self, EngineError> {
        let note = Self {
            pitch,
            start_offset,
            duration,
            velocity,
        };
        note.validate()?;
        Ok(note)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.pitch > 127 {
            return Err(EngineError::MalformedNote(format!(
                "pitch {} out of range 0-127",
                self.pitch
            )));
        }
        if self.velocity > 127 {
            return Err(EngineError::MalformedNote(format!(
                "velocity {} out of range 0-127",
                self.velocity
            )));
        }
        if !self.start_offset.is_finite() || self.start_offset < 0.0 {
            return Err(EngineError::MalformedNote(format!(
                "start offset {} must be finite and non-negative",
                self.start_offset
            )));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(EngineError::MalformedNote(format!(
                "duration {} must be finite and non-negative",
                self.duration
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_note() {
        assert!(Note::new(60, 0.0, 0.25, 100).is_ok());
        assert!(Note::new(0, 0.0, 0.0, 0).is_ok());
        assert!(Note::new(127, 10.0, 2.5, 127).is_ok());
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!(Note::new(128, 0.0, 0.25, 100).is_err());
        assert!(Note::new(60, 0.0, 0.25, 200).is_err());
        assert!(Note::new(60, -1.0, 0.25, 100).is_err());
        assert!(Note::new(60, 0.0, -0.25, 100).is_err());
        assert!(Note::new(60, f64::NAN, 0.25, 100).is_err());
        assert!(Note::new(60, 0.0, f64::INFINITY, 100).is_err());
    }
}

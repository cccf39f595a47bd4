use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, EngineError};

/// A fixed program (instrument patch) to select on a channel at engine start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgramAssignment {
    pub channel: u8,
    pub program: u8,
}

/// When set, every live key press also enqueues a transposed copy of the
/// played pitch as a short queued note on the given channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EchoConfig {
    pub channel: u8,
    pub transpose: i8,
    pub duration: f64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            transpose: 12, // one octave up
            duration: 0.25,
        }
    }
}

/// Channel partition and dispatch settings. The engine assigns no musical
/// meaning to a channel beyond this partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Channel driven by live input.
    pub manual_channel: u8,
    /// First channel of the contiguous auto block, one per song voice.
    pub first_auto_channel: u8,
    pub auto_channel_count: u8,
    /// Velocity used for live begins and teardown flushes.
    pub velocity: u8,
    pub programs: Vec<ProgramAssignment>,
    pub echo: Option<EchoConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            manual_channel: 0,
            first_auto_channel: 1,
            auto_channel_count: 15,
            velocity: 100,
            programs: vec![
                ProgramAssignment {
                    channel: 0,
                    program: 25, // acoustic guitar (steel)
                },
                ProgramAssignment {
                    channel: 1,
                    program: 0, // acoustic grand piano
                },
            ],
            echo: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.manual_channel > 15 {
            return Err(EngineError::BadChannel(self.manual_channel));
        }
        if self.auto_channel_count == 0 {
            return Err(EngineError::Config("auto channel block is empty".into()));
        }
        let auto_end = self.first_auto_channel as u16 + self.auto_channel_count as u16 - 1;
        if auto_end > 15 {
            return Err(EngineError::Config(format!(
                "auto channel block {}..={} exceeds the MIDI range",
                self.first_auto_channel, auto_end
            )));
        }
        let manual = self.manual_channel as u16;
        if manual >= self.first_auto_channel as u16 && manual <= auto_end {
            return Err(EngineError::Config(format!(
                "manual channel {} overlaps the auto block {}..={}",
                manual, self.first_auto_channel, auto_end
            )));
        }
        if self.velocity > 127 {
            return Err(EngineError::Config(format!(
                "velocity {} out of range 0-127",
                self.velocity
            )));
        }
        if let Some(echo) = &self.echo {
            if echo.channel > 15 {
                return Err(EngineError::BadChannel(echo.channel));
            }
            if !echo.duration.is_finite() || echo.duration < 0.0 {
                return Err(EngineError::Config(format!(
                    "echo duration {} must be finite and non-negative",
                    echo.duration
                )));
            }
        }
        Ok(())
    }

    pub fn auto_channels(&self) -> impl Iterator<Item = u8> + '_ {
        self.first_auto_channel..self.first_auto_channel + self.auto_channel_count
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        let config: EngineConfig = ron::from_str(&ron_string).map_err(ron::Error::from)?;
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlapping_partition() {
        let config = EngineConfig {
            manual_channel: 3,
            first_auto_channel: 1,
            auto_channel_count: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_auto_block_past_channel_15() {
        let config = EngineConfig {
            first_auto_channel: 10,
            auto_channel_count: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn ron_round_trip() {
        let config = EngineConfig {
            echo: Some(EchoConfig::default()),
            ..Default::default()
        };
        let text = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default()).unwrap();
        let back: EngineConfig = ron::from_str(&text).unwrap();
        assert_eq!(back.manual_channel, config.manual_channel);
        assert_eq!(back.programs.len(), config.programs.len());
        assert_eq!(back.echo.unwrap().transpose, 12);
    }
}

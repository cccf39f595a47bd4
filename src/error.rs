use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("midi send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no MIDI output device available")]
    OutputUnavailable,
    #[error("no MIDI input device available")]
    InputUnavailable,
    #[error("failed to open MIDI device: {0}")]
    DeviceOpen(String),
    #[error("device call failed on channel {channel}: {source}")]
    DeviceCall {
        channel: u8,
        #[source]
        source: DeviceError,
    },
    #[error("invalid note: {0}")]
    MalformedNote(String),
    #[error("channel {0} is outside the MIDI range 0-15")]
    BadChannel(u8),
    #[error("invalid engine config: {0}")]
    Config(String),
    #[error("engine is stopped")]
    Stopped,
}

/// Failures collected over one tick (or teardown). The tick always runs to
/// completion; a bad device call never skips the remaining due entries.
#[derive(Debug, Error)]
#[error("{} device call(s) failed", .0.len())]
pub struct TickErrors(pub Vec<EngineError>);

#[derive(Debug, Error)]
pub enum SongError {
    #[error("failed to read midi file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse midi file: {0}")]
    Parse(#[from] midly::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad config file: {0}")]
    Ron(#[from] ron::Error),
    #[error("{0}")]
    Invalid(String),
}

pub mod clock;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod live;
pub mod note;
pub mod sched;
pub mod song;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{EchoConfig, EngineConfig, ProgramAssignment};
pub use device::{InputSource, KeyEvent, MidiInputDevice, MidiOutputDevice, OutputSink};
pub use engine::{Engine, EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{ConfigError, DeviceError, EngineError, SongError, TickErrors};
pub use note::{ActivationSource, Note};
pub use song::{Song, Voice};

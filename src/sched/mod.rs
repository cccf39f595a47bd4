mod queue;
mod registry;
mod release;

pub use queue::{ChannelQueues, ScheduledEntry};
pub use registry::ActiveNoteRegistry;
pub(crate) use release::ReleaseTimer;

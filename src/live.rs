use std::time::Duration;

use tracing::debug;

use crate::config::EngineConfig;
use crate::device::InputSource;
use crate::engine::Inner;
use crate::error::EngineError;
use crate::note::{ActivationSource, Note};
use crate::sched::ChannelQueues;

/// Merges live key events into the output stream. Live notes bypass the
/// queues entirely: a press is an immediate begin on the manual channel, a
/// release an immediate end. Without an input device every tick is a no-op.
pub struct LiveInputMerger {
    input: Option<Box<dyn InputSource>>,
}

impl LiveInputMerger {
    pub fn new(input: Option<Box<dyn InputSource>>) -> Self {
        Self { input }
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    /// Reads at most one event and applies it. Called once per engine tick
    /// with the shared lock held.
    pub(crate) fn run_tick(
        &mut self,
        inner: &mut Inner,
        queues: &mut ChannelQueues,
        config: &EngineConfig,
        now: Duration,
        failures: &mut Vec<EngineError>,
    ) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        if !input.poll() {
            return;
        }
        let Some(event) = input.read(1).into_iter().next() else {
            return;
        };

        let channel = config.manual_channel;
        if event.velocity != 0 {
            debug!(pitch = event.pitch, channel, "live begin");
            match inner.sink.begin(event.pitch, config.velocity, channel) {
                Ok(()) => inner.registry.add(channel, ActivationSource::Manual, event.pitch),
                Err(e) => failures.push(EngineError::DeviceCall { channel, source: e }),
            }
            if let Some(echo) = &config.echo {
                let pitch = event.pitch as i16 + echo.transpose as i16;
                if (0..=127).contains(&pitch) {
                    let note = Note {
                        pitch: pitch as u8,
                        start_offset: 0.0,
                        duration: echo.duration,
                        velocity: config.velocity,
                    };
                    queues.enqueue(echo.channel, note, now);
                }
            }
        } else {
            debug!(pitch = event.pitch, channel, "live end");
            match inner.sink.end(event.pitch, config.velocity, channel) {
                Ok(()) => {
                    inner
                        .registry
                        .remove(channel, ActivationSource::Manual, event.pitch);
                }
                Err(e) => failures.push(EngineError::DeviceCall { channel, source: e }),
            }
        }
    }
}

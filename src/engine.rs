use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::config::EngineConfig;
use crate::device::{InputSource, MidiInputDevice, MidiOutputDevice, OutputSink};
use crate::error::{EngineError, TickErrors};
use crate::live::LiveInputMerger;
use crate::note::{ActivationSource, Note};
use crate::sched::{ActiveNoteRegistry, ChannelQueues, ReleaseTimer};
use crate::song::Song;

/// State shared between the tick loop and the release worker. The running
/// flag lives under the same lock as the registry and the sink so a release
/// can never observe teardown half-done.
pub(crate) struct Shared {
    pub(crate) inner: Mutex<Inner>,
}

pub(crate) struct Inner {
    pub(crate) running: bool,
    pub(crate) sink: Box<dyn OutputSink>,
    pub(crate) registry: ActiveNoteRegistry,
}

/// The dispatcher. Owns the channel queues, the active-note registry and the
/// deferred-release worker for its whole lifetime. Tick-driven by the caller
/// (or by `spawn_engine`); Running until `teardown`, then terminally Stopped.
pub struct Engine {
    shared: Arc<Shared>,
    queues: ChannelQueues,
    releases: ReleaseTimer,
    merger: LiveInputMerger,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        mut sink: Box<dyn OutputSink>,
        input: Option<Box<dyn InputSource>>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        for assignment in &config.programs {
            sink.select_program(assignment.program, assignment.channel)
                .map_err(|e| EngineError::DeviceCall {
                    channel: assignment.channel,
                    source: e,
                })?;
        }

        if input.is_none() {
            warn!("no MIDI input attached, live merge disabled");
        }

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                running: true,
                sink,
                registry: ActiveNoteRegistry::new(),
            }),
        });
        let releases = ReleaseTimer::spawn(shared.clone(), clock.clone());

        info!("engine running");
        Ok(Self {
            shared,
            queues: ChannelQueues::new(),
            releases,
            merger: LiveInputMerger::new(input),
            clock,
            config,
        })
    }

    /// Opens the default MIDI output (required) and input (optional; without
    /// one the engine runs queue-only).
    pub fn with_default_devices(config: EngineConfig) -> Result<Self, EngineError> {
        let sink = Box::new(MidiOutputDevice::open_default()?);
        let input: Option<Box<dyn InputSource>> = match MidiInputDevice::open_default() {
            Ok(device) => Some(Box::new(device)),
            Err(e) => {
                warn!(error = %e, "MIDI input unavailable, running queue-only");
                None
            }
        };
        Self::new(sink, input, config, Arc::new(MonotonicClock::new()))
    }

    pub fn is_running(&self) -> bool {
        self.shared.inner.lock().running
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates and appends one note to a channel queue. The note fires at
    /// `now + start_offset`.
    pub fn enqueue(&mut self, channel: u8, note: Note) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::Stopped);
        }
        if channel > 15 {
            return Err(EngineError::BadChannel(channel));
        }
        note.validate()?;
        self.queues.enqueue(channel, note, self.clock.now());
        Ok(())
    }

    /// Assigns each voice an auto channel, selects its program and enqueues
    /// its notes against a single epoch. Malformed notes are dropped with a
    /// warning; voices beyond the auto block are skipped.
    pub fn enqueue_song(&mut self, song: &Song) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::Stopped);
        }
        let epoch = self.clock.now();
        for (i, voice) in song.voices.iter().enumerate() {
            if i >= self.config.auto_channel_count as usize {
                warn!(voice = %voice.name, "no auto channel left for voice, skipping");
                continue;
            }
            let channel = self.config.first_auto_channel + i as u8;
            {
                let mut inner = self.shared.inner.lock();
                if let Err(e) = inner.sink.select_program(voice.program, channel) {
                    warn!(channel, program = voice.program, error = %e, "program select failed");
                }
            }
            let mut dropped = 0usize;
            for note in &voice.notes {
                if note.validate().is_err() {
                    dropped += 1;
                    continue;
                }
                self.queues.enqueue(channel, *note, epoch);
            }
            if dropped > 0 {
                warn!(channel, dropped, "dropped malformed notes");
            }
        }
        Ok(())
    }

    pub fn select_program(&mut self, program: u8, channel: u8) -> Result<(), EngineError> {
        let mut inner = self.shared.inner.lock();
        if !inner.running {
            return Err(EngineError::Stopped);
        }
        inner
            .sink
            .select_program(program, channel)
            .map_err(|e| EngineError::DeviceCall { channel, source: e })
    }

    /// One scheduling cycle: merge live input, then pop every due entry from
    /// every channel queue, issuing begins and arming releases. Device-call
    /// failures are collected and returned after the whole tick has run.
    pub fn tick(&mut self) -> Result<(), TickErrors> {
        let now = self.clock.now();
        let mut failures = Vec::new();

        {
            let mut inner = self.shared.inner.lock();
            if !inner.running {
                return Err(TickErrors(vec![EngineError::Stopped]));
            }
            self.merger
                .run_tick(&mut inner, &mut self.queues, &self.config, now, &mut failures);
        }

        for channel in self.queues.channels() {
            for entry in self.queues.pop_due(channel, now) {
                let note = entry.note;
                let mut inner = self.shared.inner.lock();
                if let Err(e) = inner.sink.begin(note.pitch, note.velocity, channel) {
                    failures.push(EngineError::DeviceCall { channel, source: e });
                    continue;
                }
                inner.registry.add(channel, ActivationSource::Auto, note.pitch);
                // armed under the lock: teardown cannot slip between the
                // begin and its release obligation
                self.releases.arm(
                    Duration::from_secs_f64(note.duration),
                    channel,
                    note.pitch,
                    note.velocity,
                    ActivationSource::Auto,
                    now,
                );
                debug!(channel, pitch = note.pitch, "dispatched");
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TickErrors(failures))
        }
    }

    /// Discards the pending entries of one channel without device calls.
    pub fn clear_channel(&mut self, channel: u8) {
        self.queues.clear(channel);
    }

    /// Pitches currently sounding on one (channel, source).
    pub fn held_notes(&self, channel: u8, source: ActivationSource) -> Vec<u8> {
        self.shared.inner.lock().registry.held(channel, source)
    }

    /// Pitches currently sounding anywhere for one source.
    pub fn active_notes(&self, source: ActivationSource) -> Vec<u8> {
        self.shared.inner.lock().registry.held_anywhere(source)
    }

    pub fn pending(&self, channel: u8) -> usize {
        self.queues.pending(channel)
    }

    /// Stops the engine. Every held note gets its release issued here, the
    /// queues are closed, and the release worker is joined, so no device
    /// call can happen after this returns. Idempotent.
    pub fn teardown(&mut self) -> Result<(), TickErrors> {
        let mut failures = Vec::new();
        {
            let mut inner = self.shared.inner.lock();
            if inner.running {
                inner.running = false;
                for (channel, _source, pitch) in inner.registry.drain() {
                    if let Err(e) = inner.sink.end(pitch, self.config.velocity, channel) {
                        failures.push(EngineError::DeviceCall { channel, source: e });
                    }
                }
                info!("engine stopped");
            }
        }
        self.queues.close();
        self.releases.shutdown();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TickErrors(failures))
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

#[derive(Debug, Clone)]
pub enum EngineCommand {
    LoadSong(PathBuf),
    PlaySong(Song),
    Enqueue { channel: u8, note: Note },
    ClearChannel(u8),
    Stop,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    SongQueued { voices: usize },
    ActiveNotes { manual: Vec<u8>, auto: Vec<u8> },
    Error { message: String },
    Stopped,
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
}

const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Runs the engine's tick loop on a dedicated thread, controlled over
/// channels. Dropping the command sender tears the engine down.
pub fn spawn_engine(engine: Engine) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    std::thread::spawn(move || {
        engine_thread(engine, command_rx, update_tx);
    });

    EngineHandle {
        command_tx,
        update_rx,
    }
}

fn engine_thread(
    mut engine: Engine,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) {
    let mut last_manual = Vec::new();
    let mut last_auto = Vec::new();

    loop {
        match command_rx.recv_timeout(TICK_INTERVAL) {
            Ok(EngineCommand::LoadSong(path)) => match Song::load(&path) {
                Ok(song) => queue_song(&mut engine, &song, &update_tx),
                Err(e) => {
                    let _ = update_tx.send(EngineUpdate::Error {
                        message: format!("failed to load song: {e}"),
                    });
                }
            },
            Ok(EngineCommand::PlaySong(song)) => queue_song(&mut engine, &song, &update_tx),
            Ok(EngineCommand::Enqueue { channel, note }) => {
                if let Err(e) = engine.enqueue(channel, note) {
                    let _ = update_tx.send(EngineUpdate::Error {
                        message: e.to_string(),
                    });
                }
            }
            Ok(EngineCommand::ClearChannel(channel)) => engine.clear_channel(channel),
            Ok(EngineCommand::Stop) | Err(RecvTimeoutError::Disconnected) => {
                if let Err(errors) = engine.teardown() {
                    for e in errors.0 {
                        let _ = update_tx.send(EngineUpdate::Error {
                            message: e.to_string(),
                        });
                    }
                }
                let _ = update_tx.send(EngineUpdate::Stopped);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Err(errors) = engine.tick() {
            for e in errors.0 {
                let _ = update_tx.send(EngineUpdate::Error {
                    message: e.to_string(),
                });
            }
        }

        let manual = engine.active_notes(ActivationSource::Manual);
        let auto = engine.active_notes(ActivationSource::Auto);
        if manual != last_manual || auto != last_auto {
            last_manual = manual.clone();
            last_auto = auto.clone();
            let _ = update_tx.send(EngineUpdate::ActiveNotes { manual, auto });
        }
    }
}

fn queue_song(engine: &mut Engine, song: &Song, update_tx: &Sender<EngineUpdate>) {
    match engine.enqueue_song(song) {
        Ok(()) => {
            let _ = update_tx.send(EngineUpdate::SongQueued {
                voices: song.voices.len(),
            });
        }
        Err(e) => {
            let _ = update_tx.send(EngineUpdate::Error {
                message: e.to_string(),
            });
        }
    }
}

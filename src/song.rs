use std::collections::HashMap;
use std::fs;
use std::path::Path;

use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SongError;
use crate::note::Note;

const TICKS_PER_BEAT: u16 = 480;
const DEFAULT_TEMPO: u32 = 500_000; // microseconds per beat

/// One instrument's worth of notes, ordered by start offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub program: u8,
    pub notes: Vec<Note>,
}

/// An ordered note source: what the engine enqueues, one auto channel per
/// voice. Loaded from a standard MIDI file or built programmatically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Song {
    pub voices: Vec<Voice>,
}

impl Song {
    pub fn load(path: &Path) -> Result<Self, SongError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SongError> {
        let smf = Smf::parse(bytes)?;
        Ok(Self::from_smf(&smf))
    }

    fn from_smf(smf: &Smf) -> Self {
        let tempo_map = TempoMap::build(smf);
        let mut voices = Vec::new();

        for (track_index, track) in smf.tracks.iter().enumerate() {
            let mut name = format!("track {track_index}");
            let mut program = 0u8;
            let mut notes: Vec<Note> = Vec::new();
            // per-pitch stacks so overlapping same-pitch notes pair up FIFO
            let mut open: HashMap<u8, Vec<(u64, u8)>> = HashMap::new();
            let mut tick = 0u64;

            for event in track {
                tick += event.delta.as_int() as u64;
                match event.kind {
                    TrackEventKind::Meta(MetaMessage::TrackName(bytes)) => {
                        name = String::from_utf8_lossy(bytes).into_owned();
                    }
                    TrackEventKind::Midi { message, .. } => match message {
                        MidiMessage::ProgramChange { program: p } => program = p.as_int(),
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open.entry(key.as_int())
                                .or_default()
                                .push((tick, vel.as_int()));
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let pitch = key.as_int();
                            if let Some((start_tick, velocity)) =
                                open.get_mut(&pitch).and_then(|s| (!s.is_empty()).then(|| s.remove(0)))
                            {
                                let start = tempo_map.seconds(start_tick);
                                let end = tempo_map.seconds(tick);
                                notes.push(Note {
                                    pitch,
                                    start_offset: start,
                                    duration: end - start,
                                    velocity,
                                });
                            }
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }

            let dangling: usize = open.values().map(|s| s.len()).sum();
            if dangling > 0 {
                warn!(track = track_index, dangling, "note-ons without matching note-off");
            }
            if notes.is_empty() {
                continue;
            }
            notes.sort_by(|a, b| a.start_offset.total_cmp(&b.start_offset));
            voices.push(Voice {
                name,
                program,
                notes,
            });
        }

        Song { voices }
    }

    /// A single piano voice from a flat pitch sequence: one note every
    /// `step` seconds, each held for `step`.
    pub fn from_pitch_array(pitches: &[u8], step: f64) -> Self {
        let notes = pitches
            .iter()
            .enumerate()
            .map(|(i, &pitch)| Note {
                pitch,
                start_offset: i as f64 * step,
                duration: step,
                velocity: 100,
            })
            .collect();
        Song {
            voices: vec![Voice {
                name: "Acoustic Grand Piano".into(),
                program: 0,
                notes,
            }],
        }
    }

    /// A single piano voice from `(pitch, advance, duration)` triples, where
    /// `advance` is the gap in seconds before the next note starts.
    pub fn from_note_array(entries: &[(u8, f64, f64)]) -> Self {
        let mut offset = 0.0;
        let mut notes = Vec::with_capacity(entries.len());
        for &(pitch, advance, duration) in entries {
            notes.push(Note {
                pitch,
                start_offset: offset,
                duration,
                velocity: 100,
            });
            offset += advance;
        }
        Song {
            voices: vec![Voice {
                name: "Acoustic Grand Piano".into(),
                program: 0,
                notes,
            }],
        }
    }

    /// Seconds from the first note's start to the last release.
    pub fn duration(&self) -> f64 {
        self.voices
            .iter()
            .flat_map(|v| &v.notes)
            .map(|n| n.start_offset + n.duration)
            .fold(0.0, f64::max)
    }

    pub fn save(&self, path: &Path) -> Result<(), SongError> {
        self.to_smf().save(path)?;
        Ok(())
    }

    fn to_smf(&self) -> Smf<'_> {
        let secs_per_tick = DEFAULT_TEMPO as f64 / 1e6 / TICKS_PER_BEAT as f64;
        let mut tracks = Vec::new();

        for (i, voice) in self.voices.iter().enumerate() {
            let channel = u4::new((i % 16) as u8);
            let mut track = Vec::new();

            if i == 0 {
                track.push(TrackEvent {
                    delta: u28::new(0),
                    kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(DEFAULT_TEMPO))),
                });
            }
            track.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(voice.name.as_bytes())),
            });
            track.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(voice.program & 0x7F),
                    },
                },
            });

            // (tick, is_on, pitch, velocity); offs sort before ons at the
            // same tick so adjacent repeats do not merge
            let mut moments: Vec<(u64, bool, u8, u8)> = Vec::with_capacity(voice.notes.len() * 2);
            for note in &voice.notes {
                let on = (note.start_offset / secs_per_tick).round() as u64;
                let off = ((note.start_offset + note.duration) / secs_per_tick).round() as u64;
                moments.push((on, true, note.pitch, note.velocity));
                moments.push((off, false, note.pitch, note.velocity));
            }
            moments.sort_by_key(|&(tick, is_on, pitch, _)| (tick, is_on, pitch));

            let mut last_tick = 0u64;
            for (tick, is_on, pitch, velocity) in moments {
                let delta = u28::new((tick - last_tick) as u32);
                last_tick = tick;
                let message = if is_on {
                    MidiMessage::NoteOn {
                        key: u7::new(pitch & 0x7F),
                        vel: u7::new(velocity & 0x7F),
                    }
                } else {
                    MidiMessage::NoteOff {
                        key: u7::new(pitch & 0x7F),
                        vel: u7::new(0),
                    }
                };
                track.push(TrackEvent {
                    delta,
                    kind: TrackEventKind::Midi { channel, message },
                });
            }

            track.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            });
            tracks.push(track);
        }

        if tracks.is_empty() {
            tracks.push(vec![TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            }]);
        }

        let format = if tracks.len() == 1 {
            Format::SingleTrack
        } else {
            Format::Parallel
        };
        Smf {
            header: Header::new(format, Timing::Metrical(u15::new(TICKS_PER_BEAT))),
            tracks,
        }
    }
}

/// Converts absolute ticks to seconds under the file's tempo changes.
struct TempoMap {
    // (tick, seconds at that tick, seconds per tick afterwards)
    changes: Vec<(u64, f64, f64)>,
}

impl TempoMap {
    fn build(smf: &Smf) -> Self {
        match smf.header.timing {
            Timing::Timecode(fps, ticks_per_frame) => {
                let secs_per_tick = 1.0 / (fps.as_f32() as f64 * ticks_per_frame as f64);
                Self {
                    changes: vec![(0, 0.0, secs_per_tick)],
                }
            }
            Timing::Metrical(ticks_per_beat) => {
                let tpb = ticks_per_beat.as_int() as f64;
                let mut tempo_events: Vec<(u64, u32)> = Vec::new();
                for track in &smf.tracks {
                    let mut tick = 0u64;
                    for event in track {
                        tick += event.delta.as_int() as u64;
                        if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                            tempo_events.push((tick, tempo.as_int()));
                        }
                    }
                }
                tempo_events.sort_by_key(|&(tick, _)| tick);

                let mut changes = vec![(0, 0.0, DEFAULT_TEMPO as f64 / 1e6 / tpb)];
                for (tick, tempo) in tempo_events {
                    let (last_tick, last_secs, last_spt) = *changes.last().unwrap();
                    let secs = last_secs + (tick - last_tick) as f64 * last_spt;
                    changes.push((tick, secs, tempo as f64 / 1e6 / tpb));
                }
                Self { changes }
            }
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        let index = self
            .changes
            .partition_point(|&(change_tick, _, _)| change_tick <= tick)
            - 1;
        let (change_tick, secs, secs_per_tick) = self.changes[index];
        secs + (tick - change_tick) as f64 * secs_per_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_array_steps_evenly() {
        let song = Song::from_pitch_array(&[60, 64, 67], 0.25);
        let notes = &song.voices[0].notes;
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[1].pitch, 64);
        assert!((notes[1].start_offset - 0.25).abs() < 1e-9);
        assert!((notes[2].start_offset - 0.5).abs() < 1e-9);
        assert!((song.duration() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn note_array_accumulates_offsets() {
        let song = Song::from_note_array(&[(60, 0.5, 0.25), (62, 0.25, 1.0), (64, 0.1, 0.1)]);
        let notes = &song.voices[0].notes;
        assert!((notes[0].start_offset - 0.0).abs() < 1e-9);
        assert!((notes[1].start_offset - 0.5).abs() < 1e-9);
        assert!((notes[2].start_offset - 0.75).abs() < 1e-9);
        assert!((notes[1].duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(Song::from_bytes(b"this is not a midi file").is_err());
    }

    #[test]
    fn smf_round_trip_preserves_notes() {
        let mut song = Song::from_pitch_array(&[60, 64, 67, 72], 0.25);
        song.voices.push(Voice {
            name: "bass".into(),
            program: 33,
            notes: vec![Note {
                pitch: 36,
                start_offset: 0.0,
                duration: 1.0,
                velocity: 90,
            }],
        });

        let path = std::env::temp_dir().join("canora_round_trip.mid");
        song.save(&path).unwrap();
        let loaded = Song::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.voices.len(), 2);
        assert_eq!(loaded.voices[1].program, 33);
        let melody = &loaded.voices[0].notes;
        assert_eq!(melody.len(), 4);
        assert_eq!(melody[2].pitch, 67);
        // tick quantization at 480 tpb keeps us within ~1 ms
        assert!((melody[2].start_offset - 0.5).abs() < 2e-3);
        assert!((melody[2].duration - 0.25).abs() < 2e-3);
        assert_eq!(loaded.voices[1].notes[0].velocity, 90);
    }
}

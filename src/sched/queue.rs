use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::note::Note;

/// A note waiting in a channel queue, stamped with the absolute time (in the
/// engine clock's timebase) at which it becomes due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEntry {
    pub fire_at: Duration,
    pub note: Note,
}

/// Per-channel FIFO of scheduled entries. Callers enqueue in non-decreasing
/// time order per channel; the queues never reorder.
#[derive(Debug, Default)]
pub struct ChannelQueues {
    queues: HashMap<u8, VecDeque<ScheduledEntry>>,
    closed: bool,
}

impl ChannelQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a note to the tail of `channel`'s queue, due at
    /// `enqueue_time + note.start_offset`. No-op once the queues are closed.
    pub fn enqueue(&mut self, channel: u8, note: Note, enqueue_time: Duration) {
        if self.closed {
            return;
        }
        let fire_at = enqueue_time + Duration::from_secs_f64(note.start_offset);
        self.queues
            .entry(channel)
            .or_default()
            .push_back(ScheduledEntry { fire_at, note });
    }

    /// Removes and returns every leading entry with `fire_at <= now`, in
    /// enqueue order, stopping at the first future entry.
    pub fn pop_due(&mut self, channel: u8, now: Duration) -> Vec<ScheduledEntry> {
        let mut due = Vec::new();
        if let Some(queue) = self.queues.get_mut(&channel) {
            while let Some(entry) = queue.front() {
                if entry.fire_at > now {
                    break;
                }
                due.push(queue.pop_front().unwrap());
            }
        }
        due
    }

    /// Channels that currently have pending entries.
    pub fn channels(&self) -> Vec<u8> {
        let mut channels: Vec<u8> = self
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(&c, _)| c)
            .collect();
        channels.sort_unstable();
        channels
    }

    pub fn pending(&self, channel: u8) -> usize {
        self.queues.get(&channel).map_or(0, |q| q.len())
    }

    /// Discards all pending entries on one channel, without device side
    /// effects.
    pub fn clear(&mut self, channel: u8) {
        if let Some(queue) = self.queues.get_mut(&channel) {
            queue.clear();
        }
    }

    /// Discards everything and rejects further enqueues. Used at teardown.
    pub fn close(&mut self) {
        self.queues.clear();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, start_offset: f64) -> Note {
        Note {
            pitch,
            start_offset,
            duration: 0.25,
            velocity: 100,
        }
    }

    #[test]
    fn pop_due_returns_due_prefix_in_order() {
        let mut queues = ChannelQueues::new();
        let t0 = Duration::ZERO;
        queues.enqueue(12, note(60, 0.0), t0);
        queues.enqueue(12, note(64, 0.25), t0);
        queues.enqueue(12, note(67, 0.5), t0);

        let due = queues.pop_due(12, Duration::from_millis(250));
        let pitches: Vec<u8> = due.iter().map(|e| e.note.pitch).collect();
        assert_eq!(pitches, vec![60, 64]);
        assert_eq!(queues.pending(12), 1);

        // the remainder is untouched and still due later
        let rest = queues.pop_due(12, Duration::from_millis(500));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].note.pitch, 67);
    }

    #[test]
    fn pop_due_stops_at_first_future_entry() {
        let mut queues = ChannelQueues::new();
        queues.enqueue(3, note(60, 1.0), Duration::ZERO);
        assert!(queues.pop_due(3, Duration::from_millis(999)).is_empty());
        assert_eq!(queues.pop_due(3, Duration::from_secs(1)).len(), 1);
    }

    #[test]
    fn entries_on_other_channels_are_independent() {
        let mut queues = ChannelQueues::new();
        queues.enqueue(2, note(40, 0.0), Duration::ZERO);
        queues.enqueue(5, note(50, 0.0), Duration::ZERO);
        assert_eq!(queues.channels(), vec![2, 5]);
        assert_eq!(queues.pop_due(2, Duration::ZERO).len(), 1);
        assert_eq!(queues.pending(5), 1);
    }

    #[test]
    fn clear_discards_pending_entries() {
        let mut queues = ChannelQueues::new();
        queues.enqueue(1, note(60, 0.0), Duration::ZERO);
        queues.enqueue(1, note(61, 0.0), Duration::ZERO);
        queues.clear(1);
        assert!(queues.pop_due(1, Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn enqueue_after_close_is_a_no_op() {
        let mut queues = ChannelQueues::new();
        queues.close();
        queues.enqueue(1, note(60, 0.0), Duration::ZERO);
        assert!(queues.pop_due(1, Duration::from_secs(10)).is_empty());
        assert!(queues.channels().is_empty());
    }

    #[test]
    fn fire_time_uses_enqueue_epoch() {
        let mut queues = ChannelQueues::new();
        queues.enqueue(0, note(60, 0.5), Duration::from_secs(2));
        assert!(queues.pop_due(0, Duration::from_secs(2)).is_empty());
        assert_eq!(queues.pop_due(0, Duration::from_millis(2500)).len(), 1);
    }
}

use std::collections::HashMap;

use crate::note::ActivationSource;

/// Tracks which pitches are currently sounding per (channel, source).
///
/// Holds are reference-counted rather than set-membership so that two
/// overlapping begins of the same pitch keep both release obligations: the
/// pitch stays held until the last outstanding release fires.
#[derive(Debug, Default)]
pub struct ActiveNoteRegistry {
    held: HashMap<(u8, ActivationSource), HashMap<u8, u32>>,
}

impl ActiveNoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: u8, source: ActivationSource, pitch: u8) {
        *self
            .held
            .entry((channel, source))
            .or_default()
            .entry(pitch)
            .or_insert(0) += 1;
    }

    /// Drops one hold of `pitch`. Returns true if the pitch was held.
    pub fn remove(&mut self, channel: u8, source: ActivationSource, pitch: u8) -> bool {
        let Some(pitches) = self.held.get_mut(&(channel, source)) else {
            return false;
        };
        let Some(count) = pitches.get_mut(&pitch) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            pitches.remove(&pitch);
        }
        true
    }

    pub fn is_held(&self, channel: u8, source: ActivationSource, pitch: u8) -> bool {
        self.held
            .get(&(channel, source))
            .is_some_and(|p| p.contains_key(&pitch))
    }

    /// Sorted snapshot of the pitches sounding on one (channel, source).
    pub fn held(&self, channel: u8, source: ActivationSource) -> Vec<u8> {
        let mut pitches: Vec<u8> = self
            .held
            .get(&(channel, source))
            .map(|p| p.keys().copied().collect())
            .unwrap_or_default();
        pitches.sort_unstable();
        pitches
    }

    /// Sorted, deduplicated snapshot across all channels for one source.
    pub fn held_anywhere(&self, source: ActivationSource) -> Vec<u8> {
        let mut pitches: Vec<u8> = self
            .held
            .iter()
            .filter(|((_, s), _)| *s == source)
            .flat_map(|(_, p)| p.keys().copied())
            .collect();
        pitches.sort_unstable();
        pitches.dedup();
        pitches
    }

    /// Empties the registry, yielding one entry per outstanding hold so the
    /// caller can issue the matching release for each.
    pub fn drain(&mut self) -> Vec<(u8, ActivationSource, u8)> {
        let mut out = Vec::new();
        for ((channel, source), pitches) in self.held.drain() {
            for (pitch, count) in pitches {
                for _ in 0..count {
                    out.push((channel, source, pitch));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ActivationSource::{Auto, Manual};

    #[test]
    fn add_and_remove_track_membership() {
        let mut registry = ActiveNoteRegistry::new();
        registry.add(1, Manual, 60);
        assert!(registry.is_held(1, Manual, 60));
        assert!(!registry.is_held(1, Auto, 60));
        assert!(registry.remove(1, Manual, 60));
        assert!(!registry.is_held(1, Manual, 60));
    }

    #[test]
    fn remove_of_unheld_pitch_reports_false() {
        let mut registry = ActiveNoteRegistry::new();
        assert!(!registry.remove(0, Auto, 60));
        registry.add(0, Auto, 60);
        assert!(!registry.remove(0, Auto, 61));
        assert!(!registry.remove(3, Auto, 60));
    }

    #[test]
    fn overlapping_holds_are_counted() {
        let mut registry = ActiveNoteRegistry::new();
        registry.add(12, Auto, 60);
        registry.add(12, Auto, 60);
        assert!(registry.remove(12, Auto, 60));
        // still held: one release obligation remains
        assert!(registry.is_held(12, Auto, 60));
        assert!(registry.remove(12, Auto, 60));
        assert!(!registry.is_held(12, Auto, 60));
    }

    #[test]
    fn held_snapshot_is_sorted() {
        let mut registry = ActiveNoteRegistry::new();
        registry.add(0, Auto, 67);
        registry.add(0, Auto, 60);
        registry.add(0, Auto, 64);
        assert_eq!(registry.held(0, Auto), vec![60, 64, 67]);
    }

    #[test]
    fn drain_yields_one_entry_per_hold() {
        let mut registry = ActiveNoteRegistry::new();
        registry.add(0, Auto, 60);
        registry.add(0, Auto, 60);
        registry.add(1, Manual, 72);
        let mut drained = registry.drain();
        drained.sort();
        assert_eq!(drained, vec![(0, Auto, 60), (0, Auto, 60), (1, Manual, 72)]);
        assert!(registry.held(0, Auto).is_empty());
    }
}

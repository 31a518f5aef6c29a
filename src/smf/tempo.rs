/// 120 BPM, in effect until the first set-tempo event.
pub const DEFAULT_TEMPO_USPQ: u32 = 500_000;

/// Tick to seconds conversion over every tempo change in a file.
///
/// Tempo events from all tracks share one map, following the format 1
/// convention of a conductor track.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    ticks_per_quarter: u16,
    /// (tick, seconds at that tick, microseconds per quarter from that tick)
    segments: Vec<(u64, f64, u32)>,
    /// Set-tempo events applied, including any at tick 0.
    changes: usize,
}

impl TempoMap {
    /// `changes` are (absolute tick, microseconds per quarter) in any order;
    /// for equal ticks the last one wins.
    pub fn new(ticks_per_quarter: u16, mut changes: Vec<(u64, u32)>) -> Self {
        changes.sort_by_key(|&(tick, _)| tick);
        let count = changes.len();

        let mut segments = vec![(0u64, 0.0f64, DEFAULT_TEMPO_USPQ)];
        for (tick, uspq) in changes {
            let Some(&(last_tick, last_seconds, last_uspq)) = segments.last() else {
                continue;
            };
            if tick == last_tick {
                if let Some(last) = segments.last_mut() {
                    last.2 = uspq;
                }
                continue;
            }
            let seconds = last_seconds + span(tick - last_tick, last_uspq, ticks_per_quarter);
            segments.push((tick, seconds, uspq));
        }

        Self {
            ticks_per_quarter,
            segments,
            changes: count,
        }
    }

    /// Tempo at tick 0.
    pub fn initial_uspq(&self) -> u32 {
        self.segments.first().map_or(DEFAULT_TEMPO_USPQ, |s| s.2)
    }

    pub fn changes(&self) -> usize {
        self.changes
    }

    pub fn seconds_at(&self, tick: u64) -> f64 {
        let index = self.segments.partition_point(|&(at, _, _)| at <= tick);
        let (at, seconds, uspq) = self.segments[index.saturating_sub(1)];
        seconds + span(tick - at, uspq, self.ticks_per_quarter)
    }
}

fn span(ticks: u64, uspq: u32, ticks_per_quarter: u16) -> f64 {
    ticks as f64 * (f64::from(uspq) / 1_000_000.0) / f64::from(ticks_per_quarter)
}

pub fn bpm_to_uspq(bpm: f64) -> f64 {
    60_000_000.0 / bpm
}

pub fn uspq_to_bpm(uspq: u32) -> f64 {
    60_000_000.0 / f64::from(uspq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tempo() {
        let map = TempoMap::new(480, vec![]);
        assert_eq!(map.seconds_at(0), 0.0);
        assert_eq!(map.seconds_at(480), 0.5);
        assert_eq!(map.initial_uspq(), DEFAULT_TEMPO_USPQ);
    }

    #[test]
    fn test_tempo_change_midway() {
        // One quarter at 120 BPM, then 60 BPM.
        let map = TempoMap::new(96, vec![(96, 1_000_000)]);
        assert_eq!(map.seconds_at(96), 0.5);
        assert_eq!(map.seconds_at(144), 1.0);
        assert_eq!(map.seconds_at(192), 1.5);
        assert_eq!(map.changes(), 1);
    }

    #[test]
    fn test_changes_from_several_tracks_are_ordered() {
        let map = TempoMap::new(100, vec![(200, 250_000), (0, 1_000_000), (0, 2_000_000)]);
        assert_eq!(map.initial_uspq(), 2_000_000);
        assert_eq!(map.seconds_at(200), 4.0);
        assert_eq!(map.seconds_at(300), 4.25);
        assert_eq!(map.changes(), 3);
    }

    #[test]
    fn test_tempo_at_tick_zero_is_counted() {
        let map = TempoMap::new(480, vec![(0, 600_000)]);
        assert_eq!(map.changes(), 1);
        assert_eq!(map.initial_uspq(), 600_000);
        assert_eq!(TempoMap::new(480, vec![]).changes(), 0);
    }

    #[test]
    fn test_bpm_conversions() {
        assert_eq!(bpm_to_uspq(120.0), 500_000.0);
        assert_eq!(uspq_to_bpm(400_000), 150.0);
    }
}

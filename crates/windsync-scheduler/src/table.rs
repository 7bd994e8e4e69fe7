//! Immutable event table.

use std::time::Duration;

use tracing::{debug, warn};

use crate::TimedValue;

/// Time-ordered values with strictly increasing positions and no two
/// adjacent equal values.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable<V> {
    positions: Vec<Duration>,
    values: Vec<V>,
}

impl<V: TimedValue> EventTable<V> {
    /// Sort `events` by position and collapse redundant transitions.
    ///
    /// Consecutive equal values keep only the first. When two entries share a
    /// position the later one replaces the earlier, unless it restores the
    /// value that was active before the earlier one; then both are dropped.
    pub fn new<I>(events: I, default: &V) -> Self
    where
        I: IntoIterator<Item = (Duration, V)>,
    {
        let mut ordered: Vec<(Duration, V)> = events.into_iter().collect();
        ordered.sort_by_key(|(position, _)| *position);
        warn_on_crowded_positions(&ordered);

        let mut positions: Vec<Duration> = Vec::with_capacity(ordered.len());
        let mut values: Vec<V> = Vec::with_capacity(ordered.len());
        // Position of the newest entry, or None right after a cancellation.
        let mut last_position = Some(Duration::ZERO);
        let mut last_value = default.clone();

        for (position, value) in ordered {
            let n = values.len();
            if n > 0 && last_position == Some(position) {
                let previous = if n > 1 {
                    values[n - 2].clone()
                } else {
                    default.clone()
                };
                if value == previous {
                    debug!(position_ms = position.as_millis() as u64, value = ?value, "same-position pair cancels out");
                    positions.pop();
                    values.pop();
                    last_position = None;
                    last_value = previous;
                } else {
                    debug!(position_ms = position.as_millis() as u64, value = ?value, "same-position entry replaces previous");
                    values[n - 1] = value.clone();
                    last_value = value;
                }
            } else if value != last_value {
                positions.push(position);
                values.push(value.clone());
                last_position = Some(position);
                last_value = value;
            }
        }

        Self { positions, values }
    }

    /// Index of the value active at `position`, or `None` before the first event.
    ///
    /// The search starts around `hint` (usually the previously active index),
    /// so sequential playback resolves in constant time.
    pub fn active_index(&self, position: Duration, hint: usize) -> Option<usize> {
        let first = *self.positions.first()?;
        if position < first {
            return None;
        }

        let len = self.positions.len();
        let hint = hint.min(len - 1);
        let (lo, hi) = if position >= self.positions[hint] {
            let near = (hint + 2).min(len);
            if near == len || position < self.positions[near] {
                (hint, near)
            } else {
                (near, len)
            }
        } else {
            (0, hint)
        };

        Some(lo + self.positions[lo..hi].partition_point(|p| *p <= position) - 1)
    }

    /// Position at which the value after `index` takes over.
    ///
    /// Before the first event this is the first position; at the last event
    /// it is the last event's own position.
    pub fn next_boundary(&self, index: usize, position: Duration) -> Option<Duration> {
        let last = self.positions.len().checked_sub(1)?;
        let boundary = if index == 0 && position < self.positions[0] {
            self.positions[0]
        } else if index >= last {
            self.positions[last]
        } else {
            self.positions[index + 1]
        };
        Some(boundary)
    }
}

impl<V> EventTable<V> {
    /// Number of events.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether there are no events.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Event positions in ascending order.
    pub fn positions(&self) -> &[Duration] {
        &self.positions
    }

    /// Event values, parallel to [`positions`](Self::positions).
    pub fn values(&self) -> &[V] {
        &self.values
    }
}

/// Three or more entries at one position have no well-defined outcome.
fn warn_on_crowded_positions<V>(ordered: &[(Duration, V)]) {
    for group in ordered.chunk_by(|a, b| a.0 == b.0) {
        if group.len() >= 3 {
            warn!(
                position_ms = group[0].0.as_millis() as u64,
                entries = group.len(),
                "several events share one position; only pairs collapse predictably"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn table(events: &[(u64, &'static str)]) -> EventTable<&'static str> {
        EventTable::new(events.iter().map(|(p, v)| (ms(*p), *v)), &"OFF")
    }

    fn entries(table: &EventTable<&'static str>) -> Vec<(u64, &'static str)> {
        table
            .positions()
            .iter()
            .zip(table.values())
            .map(|(p, v)| (p.as_millis() as u64, *v))
            .collect()
    }

    #[test]
    fn test_leading_default_is_dropped() {
        let t = table(&[(0, "OFF"), (2000, "1"), (5000, "OFF")]);
        assert_eq!(entries(&t), vec![(2000, "1"), (5000, "OFF")]);
    }

    #[test]
    fn test_consecutive_equal_values_keep_first() {
        let t = table(&[(1000, "A"), (2000, "A"), (3000, "B"), (4000, "B")]);
        assert_eq!(entries(&t), vec![(1000, "A"), (3000, "B")]);
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let t = table(&[(3000, "B"), (1000, "A")]);
        assert_eq!(entries(&t), vec![(1000, "A"), (3000, "B")]);
    }

    #[test]
    fn test_same_position_later_wins() {
        let t = table(&[(1000, "A"), (2000, "B"), (2000, "C")]);
        assert_eq!(entries(&t), vec![(1000, "A"), (2000, "C")]);
    }

    #[test]
    fn test_same_position_echo_cancels() {
        let t = table(&[(1000, "A"), (2000, "B"), (2000, "A"), (3000, "A")]);
        assert_eq!(entries(&t), vec![(1000, "A")]);
    }

    #[test]
    fn test_echo_of_default_empties_table() {
        let t = table(&[(2000, "A"), (2000, "OFF")]);
        assert!(t.is_empty());
    }

    #[test]
    fn test_after_cancel_same_position_starts_fresh() {
        let t = table(&[(1000, "A"), (2000, "B"), (2000, "A"), (2000, "C")]);
        assert_eq!(entries(&t), vec![(1000, "A"), (2000, "C")]);
    }

    #[test]
    fn test_active_index() {
        let t = table(&[(1000, "A"), (2000, "B"), (3000, "C"), (4000, "D")]);

        assert_eq!(t.active_index(ms(0), 0), None);
        assert_eq!(t.active_index(ms(999), 3), None);
        assert_eq!(t.active_index(ms(1000), 0), Some(0));
        assert_eq!(t.active_index(ms(1500), 0), Some(0));
        assert_eq!(t.active_index(ms(2000), 0), Some(1));
        assert_eq!(t.active_index(ms(3500), 0), Some(2));
        assert_eq!(t.active_index(ms(9000), 1), Some(3));
        assert_eq!(t.active_index(ms(1200), 3), Some(0));
        assert_eq!(t.active_index(ms(3999), 3), Some(2));
        assert_eq!(t.active_index(ms(4000), 99), Some(3));
    }

    #[test]
    fn test_active_index_empty() {
        let t = table(&[]);
        assert_eq!(t.active_index(ms(1000), 0), None);
        assert_eq!(t.next_boundary(0, ms(0)), None);
    }

    #[test]
    fn test_next_boundary() {
        let t = table(&[(1000, "A"), (2000, "B"), (3000, "C")]);

        assert_eq!(t.next_boundary(0, ms(0)), Some(ms(1000)));
        assert_eq!(t.next_boundary(0, ms(1000)), Some(ms(2000)));
        assert_eq!(t.next_boundary(1, ms(2500)), Some(ms(3000)));
        assert_eq!(t.next_boundary(2, ms(5000)), Some(ms(3000)));
    }
}

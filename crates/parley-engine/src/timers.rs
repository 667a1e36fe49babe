//! Deadline-ordered timer queue with cancellable handles.
//!
//! Timers are keyed by `(deadline, insertion sequence)`, so timers with equal
//! deadlines fire in the order they were scheduled. Cancelling a handle
//! removes the entry outright; a cancelled timer can never fire.

use std::collections::BTreeMap;
use std::time::Instant;

/// Identifies one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerHandle {
    at: Instant,
    seq: u64,
}

#[derive(Debug)]
pub(crate) struct TimerQueue<T> {
    entries: BTreeMap<(Instant, u64), T>,
    next_seq: u64,
}

impl<T> TimerQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn schedule(&mut self, at: Instant, item: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((at, seq), item);
        TimerHandle { at, seq }
    }

    pub(crate) fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        self.entries.remove(&(handle.at, handle.seq))
    }

    /// Drops every timer for which `keep` returns `false`.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.entries.retain(|_, item| keep(item));
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Removes and returns the earliest timer due at or before `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<(Instant, T)> {
        let (&(at, _), _) = self.entries.first_key_value()?;
        if at > now {
            return None;
        }
        self.entries.pop_first().map(|((at, _), item)| (at, item))
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|&(at, _)| at)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(base: Instant, n: u64) -> Instant {
        base + Duration::from_millis(n)
    }

    #[test]
    fn pops_in_deadline_then_insertion_order() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(ms(base, 20), "late");
        queue.schedule(ms(base, 10), "first");
        queue.schedule(ms(base, 10), "second");

        assert!(queue.pop_due(ms(base, 5)).is_none());
        assert_eq!(queue.pop_due(ms(base, 30)).map(|(_, t)| t), Some("first"));
        assert_eq!(queue.pop_due(ms(base, 30)).map(|(_, t)| t), Some("second"));
        assert_eq!(queue.pop_due(ms(base, 30)).map(|(_, t)| t), Some("late"));
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        let handle = queue.schedule(ms(base, 10), 1);
        queue.schedule(ms(base, 40), 2);

        assert_eq!(queue.cancel(handle), Some(1));
        assert_eq!(queue.cancel(handle), None);
        assert_eq!(queue.next_deadline(), Some(ms(base, 40)));
        assert_eq!(queue.pop_due(ms(base, 50)), Some((ms(base, 40), 2)));
    }

    #[test]
    fn retain_filters_by_item() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        for n in 0..6 {
            queue.schedule(ms(base, n), n);
        }
        queue.retain(|n| n % 2 == 0);
        assert_eq!(queue.len(), 3);
        queue.clear();
        assert!(queue.next_deadline().is_none());
    }
}

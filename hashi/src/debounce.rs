//! Per-key leading-edge debounce with a maximum wait.
//!
//! The first item offered for a key passes straight through and opens a
//! window. Items offered while the window is open replace each other; the
//! last one is released once the key has been quiet for `delay`, or once
//! `max_wait` has passed since the window opened, whichever comes first.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Window<T> {
    opened: Instant,
    last: Instant,
    held: Option<T>,
}

pub struct Debouncer<K, T> {
    delay: Duration,
    max_wait: Duration,
    windows: HashMap<K, Window<T>>,
}

impl<K: Eq + Hash + Clone, T> Debouncer<K, T> {
    pub fn new(delay: Duration, max_wait: Duration) -> Self {
        Self {
            delay,
            max_wait,
            windows: HashMap::new(),
        }
    }

    fn closed(&self, window: &Window<T>, now: Instant) -> bool {
        now.saturating_duration_since(window.last) >= self.delay
            || now.saturating_duration_since(window.opened) >= self.max_wait
    }

    /// Offer an item. Returns what should be sent right away: any item held
    /// from a window that has closed, then `item` itself if it opens a new
    /// window.
    pub fn offer(&mut self, key: K, item: T, now: Instant) -> Vec<T> {
        let mut release = Vec::new();
        let open = match self.windows.get(&key) {
            Some(window) => !self.closed(window, now),
            None => false,
        };

        if open {
            if let Some(window) = self.windows.get_mut(&key) {
                window.last = now;
                window.held = Some(item);
            }
            return release;
        }

        if let Some(window) = self.windows.remove(&key) {
            release.extend(window.held);
        }
        self.windows.insert(
            key,
            Window {
                opened: now,
                last: now,
                held: None,
            },
        );
        release.push(item);
        release
    }

    /// Release held items whose windows have closed.
    pub fn due(&mut self, now: Instant) -> Vec<T> {
        let closed: Vec<K> = self
            .windows
            .iter()
            .filter(|(_, window)| self.closed(window, now))
            .map(|(key, _)| key.clone())
            .collect();
        closed
            .into_iter()
            .filter_map(|key| self.windows.remove(&key))
            .filter_map(|window| window.held)
            .collect()
    }

    /// Release every held item regardless of timing.
    pub fn drain(&mut self) -> Vec<T> {
        self.windows
            .drain()
            .filter_map(|(_, window)| window.held)
            .collect()
    }

    /// Number of items currently held back.
    pub fn held(&self) -> usize {
        self.windows.values().filter(|w| w.held.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer() -> Debouncer<&'static str, u32> {
        Debouncer::new(Duration::from_millis(100), Duration::from_millis(250))
    }

    #[test]
    fn test_leading_edge_then_coalesce() {
        let mut d = debouncer();
        let t0 = Instant::now();
        assert_eq!(d.offer("answered", 1, t0), vec![1]);
        assert!(d.offer("answered", 2, t0 + Duration::from_millis(10)).is_empty());
        assert!(d.offer("answered", 3, t0 + Duration::from_millis(20)).is_empty());
        assert_eq!(d.held(), 1);

        assert!(d.due(t0 + Duration::from_millis(50)).is_empty());
        assert_eq!(d.due(t0 + Duration::from_millis(120)), vec![3]);
        assert_eq!(d.held(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut d = debouncer();
        let t0 = Instant::now();
        assert_eq!(d.offer("answered", 1, t0), vec![1]);
        assert_eq!(d.offer("interacted", 2, t0), vec![2]);
    }

    #[test]
    fn test_max_wait_caps_the_window() {
        let mut d = debouncer();
        let t0 = Instant::now();
        d.offer("answered", 0, t0);
        for i in 1..=4 {
            // Each offer is within `delay` of the previous one.
            assert!(d
                .offer("answered", i, t0 + Duration::from_millis(60 * i as u64))
                .is_empty());
        }
        // 300ms since the window opened: the held item goes out with the new one.
        assert_eq!(d.offer("answered", 5, t0 + Duration::from_millis(300)), vec![4, 5]);
    }

    #[test]
    fn test_drain() {
        let mut d = debouncer();
        let t0 = Instant::now();
        d.offer("answered", 1, t0);
        d.offer("answered", 2, t0);
        assert_eq!(d.drain(), vec![2]);
        assert_eq!(d.held(), 0);
    }
}

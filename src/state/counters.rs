//! Process-wide usage statistics: category -> label -> count.

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Categories that always exist, even before anything was counted.
pub const COUNTER_CATEGORIES: &[&str] = &["commands", "curses", "cursers", "insulted", "replies"];

pub type CounterMap = BTreeMap<String, BTreeMap<String, u64>>;

pub struct Counters {
    inner: Mutex<CounterMap>,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub fn new() -> Self {
        let counters = Self {
            inner: Mutex::new(BTreeMap::new()),
        };
        counters.seed();
        counters
    }

    fn seed(&self) {
        let mut inner = self.inner.lock();
        for category in COUNTER_CATEGORIES {
            inner.entry((*category).to_string()).or_default();
        }
    }

    /// Replace all counts with loaded ones; seeded categories are kept.
    pub fn install(&self, loaded: CounterMap) {
        *self.inner.lock() = loaded;
        self.seed();
    }

    pub fn snapshot(&self) -> CounterMap {
        self.inner.lock().clone()
    }

    pub fn increment(&self, category: &str, label: &str) {
        let mut inner = self.inner.lock();
        let count = inner
            .entry(category.to_string())
            .or_default()
            .entry(label.to_string())
            .or_default();
        *count = count.saturating_add(1);
    }

    pub fn get(&self, category: &str) -> Option<BTreeMap<String, u64>> {
        self.inner.lock().get(category).cloned()
    }

    pub fn categories(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }

    /// Empty one category. Returns false if it is not tracked.
    pub fn reset(&self, category: &str) -> bool {
        match self.inner.lock().get_mut(category) {
            Some(entries) => {
                entries.clear();
                true
            }
            None => false,
        }
    }

    /// Highest counts first; ties are ordered by label.
    pub fn top(&self, category: &str, limit: usize) -> Option<Vec<(String, u64)>> {
        let entries = self.get(category)?;
        let mut sorted: Vec<(String, u64)> = entries.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(limit);
        Some(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_counters_are_seeded() {
        let counters = Counters::new();
        assert_eq!(counters.categories().len(), COUNTER_CATEGORIES.len());
        assert!(counters.get("replies").unwrap().is_empty());
        assert!(counters.get("bogus").is_none());
    }

    #[test]
    fn increment_and_top() {
        let counters = Counters::new();
        for _ in 0..3 {
            counters.increment("commands", "ping");
        }
        counters.increment("commands", "help");
        counters.increment("commands", "cowsay");

        let top = counters.top("commands", 2).unwrap();
        assert_eq!(top[0], ("ping".to_string(), 3));
        assert_eq!(top[1], ("cowsay".to_string(), 1));
    }

    #[test]
    fn reset_only_known_categories() {
        let counters = Counters::new();
        counters.increment("curses", "shit");
        assert!(counters.reset("curses"));
        assert!(counters.get("curses").unwrap().is_empty());
        assert!(!counters.reset("nope"));
    }

    #[test]
    fn install_keeps_seeded_categories() {
        let counters = Counters::new();
        let mut loaded = CounterMap::new();
        loaded
            .entry("commands".into())
            .or_default()
            .insert("ping".into(), 7);
        counters.install(loaded);
        assert_eq!(counters.get("commands").unwrap()["ping"], 7);
        assert!(counters.get("cursers").is_some());
    }
}

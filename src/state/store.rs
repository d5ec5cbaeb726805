//! The single owner of every channel record.
//!
//! Message handling, admin commands, the persistence tick and the directory
//! refresh all go through these methods, so each observes one consistent
//! value under the store mutex.

use super::channel::{default_toggle, Channel, UserInfo};
use super::throttle::{self, Clock};
use crate::channels::traits::{BackendKind, ChannelRef};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Outcome of flipping a toggle by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleChange {
    Set(bool),
    NoSuchToggle,
    NoSuchChannel,
}

/// What loading fixed up before the records were used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Entries dropped because their key did not match the channel name.
    pub pruned: Vec<String>,
    /// Channels that were missing one or more default toggles.
    pub repaired: usize,
}

pub struct ChannelStore {
    channels: Mutex<BTreeMap<String, Channel>>,
    /// Rooms the bot was asked to leave but is still a member of.
    ignored: Mutex<BTreeSet<String>>,
    clock: Arc<dyn Clock>,
    throttle_interval: Duration,
}

impl ChannelStore {
    pub fn new(clock: Arc<dyn Clock>, throttle_secs: u64) -> Self {
        let secs = i64::try_from(throttle_secs)
            .unwrap_or(throttle::MAX_THROTTLE_SECS)
            .min(throttle::MAX_THROTTLE_SECS);
        Self {
            channels: Mutex::new(BTreeMap::new()),
            ignored: Mutex::new(BTreeSet::new()),
            clock,
            throttle_interval: Duration::seconds(secs),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn throttle_interval(&self) -> Duration {
        self.throttle_interval
    }

    /// Replace the whole map with loaded records, pruning and repairing them first.
    pub fn install(&self, loaded: BTreeMap<String, Channel>) -> RepairReport {
        let mut report = RepairReport::default();
        let mut clean = BTreeMap::new();
        for (key, mut channel) in loaded {
            if key != channel.name {
                tracing::warn!(
                    "Dropping channel record stored under '{key}' but named '{}'",
                    channel.name
                );
                report.pruned.push(key);
                continue;
            }
            if channel.repair_toggles() {
                report.repaired += 1;
            }
            clean.insert(key, channel);
        }
        *self.channels.lock() = clean;
        report
    }

    /// Clone of every record, for persistence.
    pub fn snapshot(&self) -> BTreeMap<String, Channel> {
        self.channels.lock().clone()
    }

    pub fn get_or_create(
        &self,
        backend: BackendKind,
        id: &str,
        name: &str,
        inviter: &str,
    ) -> Channel {
        let mut channels = self.channels.lock();
        channels
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!("Adding {backend} channel #{name}");
                Channel::new(backend, id, name, inviter)
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Channel> {
        self.channels.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.lock().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Channel> {
        self.channels.lock().remove(name)
    }

    /// Drop a channel the backend would not let us leave. It stays out of
    /// the store, directory adoption included, until `unignore`.
    pub fn ignore(&self, name: &str) -> Option<Channel> {
        let removed = self.remove(name);
        self.ignored.lock().insert(name.to_string());
        removed
    }

    /// Lift an ignore, e.g. when someone invites the bot back.
    pub fn unignore(&self, name: &str) -> bool {
        self.ignored.lock().remove(name)
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.lock().contains(name)
    }

    pub fn ignored(&self) -> BTreeSet<String> {
        self.ignored.lock().clone()
    }

    pub fn install_ignored(&self, loaded: BTreeSet<String>) {
        *self.ignored.lock() = loaded;
    }

    pub fn find_by_backend_id(&self, backend: BackendKind, id: &str) -> Option<Channel> {
        self.channels
            .lock()
            .values()
            .find(|ch| ch.backend == backend && ch.id == id)
            .cloned()
    }

    /// Channel names per backend, sorted.
    pub fn names_by_backend(&self) -> BTreeMap<BackendKind, Vec<String>> {
        let mut out: BTreeMap<BackendKind, Vec<String>> = BTreeMap::new();
        for ch in self.channels.lock().values() {
            out.entry(ch.backend).or_default().push(ch.name.clone());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Toggles ─────────────────────────────────────────────────

    pub fn toggle_enabled(&self, channel: &str, feature: &str) -> bool {
        self.channels
            .lock()
            .get(channel)
            .is_some_and(|ch| ch.toggle_enabled(feature))
    }

    pub fn toggles(&self, channel: &str) -> Option<BTreeMap<String, bool>> {
        self.channels.lock().get(channel).map(|ch| ch.toggles.clone())
    }

    /// Flip a known toggle; a default toggle that is somehow absent is switched on.
    pub fn flip_toggle(&self, channel: &str, feature: &str) -> ToggleChange {
        let mut channels = self.channels.lock();
        let Some(ch) = channels.get_mut(channel) else {
            return ToggleChange::NoSuchChannel;
        };
        if let Some(value) = ch.toggles.get_mut(feature) {
            *value = !*value;
            return ToggleChange::Set(*value);
        }
        if default_toggle(feature).is_some() {
            ch.toggles.insert(feature.to_string(), true);
            return ToggleChange::Set(true);
        }
        ToggleChange::NoSuchToggle
    }

    // ── Throttles ───────────────────────────────────────────────

    /// Throttle governor entry point. Unknown channels are never throttled.
    pub fn is_throttled(&self, channel: &str, topic: &str) -> bool {
        let now = self.clock.now();
        let mut channels = self.channels.lock();
        match channels.get_mut(channel) {
            Some(ch) => throttle::check_and_arm(&mut ch.throttles, topic, now, self.throttle_interval),
            None => false,
        }
    }

    pub fn override_throttle(&self, channel: &str, topic: &str, secs: i64) -> bool {
        let now = self.clock.now();
        let mut channels = self.channels.lock();
        let Some(ch) = channels.get_mut(channel) else {
            return false;
        };
        throttle::set_override(&mut ch.throttles, topic, now, secs, self.throttle_interval);
        true
    }

    /// Remove one topic's timer, or all of them when `topic` is `None`.
    pub fn clear_throttle(&self, channel: &str, topic: Option<&str>) -> bool {
        let mut channels = self.channels.lock();
        let Some(ch) = channels.get_mut(channel) else {
            return false;
        };
        match topic {
            Some(topic) => {
                ch.throttles.remove(topic);
            }
            None => ch.throttles.clear(),
        }
        true
    }

    /// Seconds left on each throttle of the channel, sorted by topic.
    pub fn throttle_remaining(&self, channel: &str) -> Option<Vec<(String, i64)>> {
        let now = self.clock.now();
        let channels = self.channels.lock();
        let ch = channels.get(channel)?;
        Some(
            ch.throttles
                .iter()
                .map(|(topic, last)| {
                    (
                        topic.clone(),
                        throttle::remaining_secs(*last, now, self.throttle_interval),
                    )
                })
                .collect(),
        )
    }

    // ── Settings ────────────────────────────────────────────────

    pub fn settings(&self, channel: &str) -> Option<BTreeMap<String, String>> {
        self.channels.lock().get(channel).map(|ch| ch.settings.clone())
    }

    /// Store a setting and return the previous value. `None` when the channel is unknown.
    pub fn set_setting(&self, channel: &str, key: &str, value: &str) -> Option<Option<String>> {
        let mut channels = self.channels.lock();
        let ch = channels.get_mut(channel)?;
        Some(ch.settings.insert(key.to_string(), value.to_string()))
    }

    pub fn unset_setting(&self, channel: &str, key: &str) -> Option<String> {
        self.channels.lock().get_mut(channel)?.settings.remove(key)
    }

    // ── Users ───────────────────────────────────────────────────

    /// Account one inbound message to its sender. Counts only grow.
    pub fn record_activity(
        &self,
        channel: &str,
        mention: &str,
        user_id: &str,
        lines: u64,
        curse_words: &[String],
    ) -> bool {
        let now = self.clock.now();
        let mut channels = self.channels.lock();
        let Some(ch) = channels.get_mut(channel) else {
            return false;
        };
        let info = ch.users.entry(mention.to_string()).or_default();
        info.id = user_id.to_string();
        info.seen = Some(now);
        info.count = info.count.saturating_add(lines);
        for word in curse_words {
            info.curses = info.curses.saturating_add(1);
            let tally = info.curse_words.entry(word.clone()).or_default();
            *tally = tally.saturating_add(1);
        }
        true
    }

    pub fn user(&self, channel: &str, mention: &str) -> Option<UserInfo> {
        self.channels.lock().get(channel)?.users.get(mention).cloned()
    }

    /// Every channel's record of `mention`.
    pub fn user_everywhere(&self, mention: &str) -> Vec<(String, UserInfo)> {
        self.channels
            .lock()
            .values()
            .filter_map(|ch| ch.users.get(mention).map(|u| (ch.name.clone(), u.clone())))
            .collect()
    }

    // ── Directory ───────────────────────────────────────────────

    /// Sync backend ids from a membership listing.
    ///
    /// Only identity metadata is touched. With `adopt`, listed rooms the store
    /// does not know yet are added, unless they are ignored.
    pub fn refresh_directory(&self, backend: BackendKind, listing: &[ChannelRef], adopt: bool) -> usize {
        let ignored = self.ignored();
        let mut channels = self.channels.lock();
        let mut changed = 0;
        for entry in listing {
            match channels.get_mut(&entry.name) {
                Some(ch) if ch.backend == backend => {
                    if ch.id != entry.id {
                        ch.id.clone_from(&entry.id);
                        changed += 1;
                    }
                }
                Some(_) => {}
                None if adopt && !ignored.contains(&entry.name) => {
                    channels.insert(
                        entry.name.clone(),
                        Channel::new(backend, &entry.id, &entry.name, ""),
                    );
                    changed += 1;
                }
                None => {}
            }
        }
        changed
    }
}

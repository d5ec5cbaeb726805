//! Persisted channel records and their per-channel settings.

use crate::channels::traits::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Feature toggles every channel carries, all on by default.
pub const DEFAULT_TOGGLES: &[(&str, bool)] = &[
    ("atnoyance", true),
    ("chatter", true),
    ("corpbs", true),
    ("python", true),
    ("shakespeare", true),
    ("trivia", true),
];

pub fn default_toggle(name: &str) -> Option<bool> {
    DEFAULT_TOGGLES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| *value)
}

/// Activity of one user in one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    /// Lines of text seen from this user.
    pub count: u64,
    pub curses: u64,
    pub curse_words: BTreeMap<String, u64>,
    /// Backend-native id.
    pub id: String,
    pub seen: Option<DateTime<Utc>>,
}

/// Durable per-room policy and activity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub backend: BackendKind,
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inviter: String,
    #[serde(default)]
    pub toggles: BTreeMap<String, bool>,
    /// Topic -> when it last fired (or the shifted instant set by an override).
    #[serde(default)]
    pub throttles: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Keyed by mention handle.
    #[serde(default)]
    pub users: BTreeMap<String, UserInfo>,
}

impl Channel {
    pub fn new(backend: BackendKind, id: &str, name: &str, inviter: &str) -> Self {
        let mut channel = Self {
            backend,
            id: id.to_string(),
            name: name.to_string(),
            inviter: inviter.to_string(),
            toggles: BTreeMap::new(),
            throttles: BTreeMap::new(),
            settings: BTreeMap::new(),
            users: BTreeMap::new(),
        };
        channel.repair_toggles();
        channel
    }

    /// Fill in any default toggle the record lacks. Existing values and
    /// unknown keys are left alone. Returns whether anything was added.
    pub fn repair_toggles(&mut self) -> bool {
        let mut changed = false;
        for (key, value) in DEFAULT_TOGGLES {
            if !self.toggles.contains_key(*key) {
                self.toggles.insert((*key).to_string(), *value);
                changed = true;
            }
        }
        changed
    }

    pub fn is_toggle_complete(&self) -> bool {
        DEFAULT_TOGGLES
            .iter()
            .all(|(key, _)| self.toggles.contains_key(*key))
    }

    /// A toggle that is missing counts as off.
    pub fn toggle_enabled(&self, feature: &str) -> bool {
        self.toggles.get(feature).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_channel_has_every_default_toggle() {
        let ch = Channel::new(BackendKind::Slack, "C1", "ops", "alice");
        assert!(ch.is_toggle_complete());
        assert_eq!(ch.toggles.len(), DEFAULT_TOGGLES.len());
        assert!(ch.toggle_enabled("chatter"));
    }

    #[test]
    fn repair_fills_missing_keeps_existing() {
        let mut ch = Channel::new(BackendKind::HipChat, "1", "ops", "");
        ch.toggles.clear();
        ch.toggles.insert("chatter".into(), false);
        ch.toggles.insert("custom".into(), true);

        assert!(ch.repair_toggles());
        assert!(!ch.toggle_enabled("chatter"));
        assert!(ch.toggle_enabled("custom"));
        assert!(ch.toggle_enabled("python"));
        assert!(!ch.repair_toggles());
    }

    #[test]
    fn old_records_without_optional_fields_deserialize() {
        let json = r#"{"backend":"slack","name":"ops","toggles":{"trivia":false}}"#;
        let ch: Channel = serde_json::from_str(json).unwrap();
        assert!(ch.users.is_empty());
        assert!(ch.throttles.is_empty());
        assert!(!ch.is_toggle_complete());
    }

    #[test]
    fn user_info_tolerates_partial_records() {
        let info: UserInfo = serde_json::from_str(r#"{"count":3}"#).unwrap();
        assert_eq!(info.count, 3);
        assert!(info.seen.is_none());
    }

    #[test]
    fn default_toggle_lookup() {
        assert_eq!(default_toggle("trivia"), Some(true));
        assert_eq!(default_toggle("nope"), None);
    }
}

//! HipChat backend over the v2 REST API.
//!
//! HipChat offers bots no push stream, so rooms and configured 1:1
//! conversations are polled for history on a fixed interval.

use super::split::{split_message, HIPCHAT_MAX_MESSAGE_LENGTH};
use super::traits::{
    BackendKind, ChannelRef, ChatBackend, InboundEvent, LeaveOutcome, Recipient, UserIdentity,
};
use crate::config::HipChatConfig;
use crate::state::ChannelStore;
use crate::util::static_regex;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const HISTORY_PAGE: &str = "50";

/// One line out of a history listing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HistoryItem {
    id: String,
    from_id: String,
    from_name: String,
    from_mention: String,
    message: String,
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a `history/latest` body, oldest first.
///
/// Notifications carry a plain string `from`; those are kept with an
/// empty id so integrations can still trigger commands.
fn parse_history(body: &Value) -> Vec<HistoryItem> {
    let Some(items) = body.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(id_string)?;
            let message = item.get("message").and_then(Value::as_str)?.to_string();
            let (from_id, from_name, from_mention) = match item.get("from") {
                Some(Value::Object(from)) => (
                    from.get("id").and_then(id_string).unwrap_or_default(),
                    from.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                    from.get("mention_name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                ),
                Some(Value::String(name)) => (String::new(), name.clone(), name.clone()),
                _ => return None,
            };
            Some(HistoryItem {
                id,
                from_id,
                from_name,
                from_mention,
                message,
            })
        })
        .collect()
}

/// Items newer than `cursor`. Listings fetched with `not-before` repeat
/// the cursor item itself.
fn newer_than(items: Vec<HistoryItem>, cursor: &str) -> Vec<HistoryItem> {
    match items.iter().position(|item| item.id == cursor) {
        Some(pos) => items.into_iter().skip(pos + 1).collect(),
        None => items,
    }
}

/// Next cursor and the items to deliver for one fetch.
///
/// No cursor means the conversation has never been fetched: nothing is
/// delivered. An empty cursor marks a conversation that was empty when
/// first fetched, so everything in it is new.
fn advance_cursor(cursor: Option<&str>, items: Vec<HistoryItem>) -> (String, Vec<HistoryItem>) {
    let next = items
        .last()
        .map(|item| item.id.clone())
        .or_else(|| cursor.map(str::to_string))
        .unwrap_or_default();
    let fresh = match cursor {
        None => Vec::new(),
        Some("") => items,
        Some(c) => newer_than(items, c),
    };
    (next, fresh)
}

fn invite_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"^<invite from '([^']*)'>"))
}

/// Inviter named by an `<invite from 'name'>` notice.
fn invite_from(message: &str) -> Option<&str> {
    invite_re()
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

pub struct HipChatBackend {
    api_url: String,
    token: String,
    rooms: Vec<String>,
    direct_users: Vec<String>,
    poll_interval: Duration,
    full_name: String,
    mention_name: String,
    client: reqwest::Client,
    store: Arc<ChannelStore>,
    /// Configured room key -> resolved room.
    resolved: Mutex<HashMap<String, ChannelRef>>,
    /// Room id (or user key) -> id of the newest item already seen.
    cursors: Mutex<HashMap<String, String>>,
    announced: Mutex<HashSet<String>>,
    parted: Mutex<HashSet<String>>,
}

impl HipChatBackend {
    pub fn new(
        config: &HipChatConfig,
        full_name: &str,
        mention_name: &str,
        store: Arc<ChannelStore>,
    ) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            rooms: config.rooms.clone(),
            direct_users: config.direct_users.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            full_name: full_name.to_string(),
            mention_name: mention_name.to_string(),
            client: reqwest::Client::new(),
            store,
            resolved: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            announced: Mutex::new(HashSet::new()),
            parted: Mutex::new(HashSet::new()),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/v2/{path}", self.api_url)
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<Value> {
        let resp = self
            .client
            .get(self.api(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("HipChat GET {path} failed"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HipChat GET {path} returned {status}");
        }
        Ok(resp.json().await?)
    }

    fn is_self(&self, item: &HistoryItem) -> bool {
        item.from_mention.eq_ignore_ascii_case(&self.mention_name) || item.from_name == self.full_name
    }

    async fn room_ref(&self, key: &str) -> anyhow::Result<ChannelRef> {
        let known = self.resolved.lock().get(key).cloned();
        if let Some(room) = known {
            return Ok(room);
        }
        let body = self.get_json(&format!("room/{key}"), &[]).await?;
        let room = ChannelRef {
            id: body
                .get("id")
                .and_then(id_string)
                .unwrap_or_else(|| key.to_string()),
            name: body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(key)
                .to_string(),
        };
        self.resolved.lock().insert(key.to_string(), room.clone());
        Ok(room)
    }

    /// Rooms to poll: configured ones plus every HipChat room in the store.
    async fn watched_rooms(&self) -> Vec<ChannelRef> {
        let mut rooms: Vec<ChannelRef> = self
            .store
            .snapshot()
            .into_values()
            .filter(|ch| ch.backend == BackendKind::HipChat)
            .map(|ch| ChannelRef {
                id: ch.id,
                name: ch.name,
            })
            .collect();
        for key in &self.rooms {
            match self.room_ref(key).await {
                Ok(room) => {
                    if !rooms.iter().any(|r| r.id == room.id) {
                        rooms.push(room);
                    }
                }
                Err(e) => tracing::warn!("HipChat room {key} unavailable: {e:#}"),
            }
        }
        let parted = self.parted.lock();
        rooms.retain(|r| !parted.contains(&r.id));
        rooms
    }

    /// Fetch items newer than the cursor for `key`. The first fetch only
    /// positions the cursor so old history is not replayed.
    async fn poll_history(&self, key: &str, path: &str) -> anyhow::Result<Vec<HistoryItem>> {
        let cursor = self.cursors.lock().get(key).cloned();
        let mut query = vec![("max-results", HISTORY_PAGE)];
        if let Some(c) = cursor.as_deref().filter(|c| !c.is_empty()) {
            query.push(("not-before", c));
        }
        let items = parse_history(&self.get_json(path, &query).await?);
        let (next, fresh) = advance_cursor(cursor.as_deref(), items);
        self.cursors.lock().insert(key.to_string(), next);
        Ok(fresh)
    }

    fn room_recipient(&self, item: &HistoryItem, room: &ChannelRef) -> Recipient {
        Recipient {
            backend: BackendKind::HipChat,
            id: item.from_id.clone(),
            name: item.from_name.clone(),
            mention_name: item.from_mention.clone(),
            reply_to: room.id.clone(),
            room: Some(room.name.clone()),
            direct: false,
        }
    }

    async fn poll_once(&self, tx: &tokio::sync::mpsc::Sender<InboundEvent>) -> bool {
        for room in self.watched_rooms().await {
            let unannounced =
                !self.store.contains(&room.name) && { self.announced.lock().insert(room.id.clone()) };
            if unannounced {
                let recipient = Recipient {
                    backend: BackendKind::HipChat,
                    id: String::new(),
                    name: self.full_name.clone(),
                    mention_name: self.mention_name.clone(),
                    reply_to: room.id.clone(),
                    room: Some(room.name.clone()),
                    direct: false,
                };
                let invite = InboundEvent::Invite {
                    recipient,
                    channel: room.clone(),
                    inviter: String::new(),
                };
                if tx.send(invite).await.is_err() {
                    return false;
                }
            }

            let items = match self
                .poll_history(&room.id, &format!("room/{}/history/latest", room.id))
                .await
            {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!("HipChat poll of #{} failed: {e:#}", room.name);
                    continue;
                }
            };
            for item in items {
                if self.is_self(&item) || item.message.trim().is_empty() {
                    continue;
                }
                let recipient = self.room_recipient(&item, &room);
                let event = match invite_from(&item.message) {
                    Some(inviter) => InboundEvent::Invite {
                        recipient,
                        channel: room.clone(),
                        inviter: inviter.to_string(),
                    },
                    None => InboundEvent::Message {
                        recipient,
                        text: item.message,
                    },
                };
                if tx.send(event).await.is_err() {
                    return false;
                }
            }
        }

        for user in &self.direct_users {
            let key = format!("user:{user}");
            let items = match self
                .poll_history(&key, &format!("user/{user}/history/latest"))
                .await
            {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!("HipChat poll of private chat with {user} failed: {e:#}");
                    continue;
                }
            };
            for item in items {
                if self.is_self(&item) || item.message.trim().is_empty() {
                    continue;
                }
                let event = InboundEvent::Message {
                    recipient: Recipient {
                        backend: BackendKind::HipChat,
                        id: item.from_id,
                        name: item.from_name,
                        mention_name: item.from_mention,
                        reply_to: user.clone(),
                        room: None,
                        direct: true,
                    },
                    text: item.message,
                };
                if tx.send(event).await.is_err() {
                    return false;
                }
            }
        }
        true
    }
}

#[async_trait]
impl ChatBackend for HipChatBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HipChat
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        tracing::info!("HipChat polling every {}s", self.poll_interval.as_secs());
        loop {
            if !self.poll_once(&tx).await {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn send(&self, recipient: &Recipient, text: &str) -> anyhow::Result<()> {
        let path = if recipient.direct {
            format!("user/{}/message", recipient.reply_to)
        } else {
            format!("room/{}/message", recipient.reply_to)
        };
        for chunk in split_message(text, HIPCHAT_MAX_MESSAGE_LENGTH) {
            let body = if recipient.direct {
                json!({ "message": chunk, "message_format": "text" })
            } else {
                json!({ "message": chunk })
            };
            let resp = self
                .client
                .post(self.api(&path))
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let err = resp.text().await.unwrap_or_default();
                anyhow::bail!("HipChat POST {path} failed ({status}): {err}");
            }
        }
        Ok(())
    }

    async fn resolve_channel(&self, id: &str) -> anyhow::Result<Option<String>> {
        Ok(Some(self.room_ref(id).await?.name))
    }

    async fn resolve_user(&self, id: &str) -> anyhow::Result<Option<UserIdentity>> {
        let body = self.get_json(&format!("user/{id}"), &[]).await?;
        let Some(mention) = body.get("mention_name").and_then(Value::as_str) else {
            return Ok(None);
        };
        Ok(Some(UserIdentity {
            id: body
                .get("id")
                .and_then(id_string)
                .unwrap_or_else(|| id.to_string()),
            name: body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(mention)
                .to_string(),
            mention_name: mention.to_string(),
        }))
    }

    async fn leave(&self, channel: &ChannelRef) -> anyhow::Result<LeaveOutcome> {
        self.parted.lock().insert(channel.id.clone());
        self.cursors.lock().remove(&channel.id);
        tracing::info!("Stopped polling HipChat #{}", channel.name);
        Ok(LeaveOutcome::Parted)
    }

    async fn directory(&self) -> anyhow::Result<Vec<ChannelRef>> {
        Ok(self.watched_rooms().await)
    }

    async fn health_check(&self) -> bool {
        self.get_json("room", &[("max-results", "1")]).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SystemClock;

    fn backend() -> HipChatBackend {
        let config = HipChatConfig {
            api_url: "https://chat.example.com/".into(),
            token: "t".into(),
            rooms: vec!["ops".into()],
            direct_users: Vec::new(),
            poll_interval_secs: 0,
        };
        HipChatBackend::new(
            &config,
            "Chan Bot",
            "chanbot",
            Arc::new(ChannelStore::new(Arc::new(SystemClock), 1800)),
        )
    }

    #[test]
    fn history_items_parse_users_and_notifications() {
        let body = json!({
            "items": [
                {"id": "a1", "message": "!ping", "from": {"id": 17, "name": "Alice A", "mention_name": "alice"}},
                {"id": "a2", "message": "build passed", "from": "Jenkins"},
                {"id": "a3", "from": {"id": 1}}
            ]
        });
        let items = parse_history(&body);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].from_id, "17");
        assert_eq!(items[0].from_mention, "alice");
        assert_eq!(items[1].from_name, "Jenkins");
        assert!(items[1].from_id.is_empty());
    }

    #[test]
    fn newer_than_skips_through_cursor() {
        let items = parse_history(&json!({
            "items": [
                {"id": "1", "message": "a", "from": "x"},
                {"id": "2", "message": "b", "from": "x"},
                {"id": "3", "message": "c", "from": "x"}
            ]
        }));
        let fresh = newer_than(items.clone(), "2");
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, "3");
        assert_eq!(newer_than(items, "gone").len(), 3);
    }

    fn history(ids: &[&str]) -> Vec<HistoryItem> {
        ids.iter()
            .map(|id| HistoryItem {
                id: (*id).to_string(),
                from_id: "17".into(),
                from_name: "Alice".into(),
                from_mention: "alice".into(),
                message: format!("line {id}"),
            })
            .collect()
    }

    #[test]
    fn first_message_in_empty_room_is_delivered() {
        let (cursor, fresh) = advance_cursor(None, Vec::new());
        assert_eq!(cursor, "");
        assert!(fresh.is_empty());

        let (cursor, fresh) = advance_cursor(Some(cursor.as_str()), history(&["m1"]));
        assert_eq!(cursor, "m1");
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].message, "line m1");

        let (cursor, fresh) = advance_cursor(Some(cursor.as_str()), history(&["m1", "m2"]));
        assert_eq!(cursor, "m2");
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, "m2");
    }

    #[test]
    fn existing_history_is_not_replayed() {
        let (cursor, fresh) = advance_cursor(None, history(&["a", "b"]));
        assert_eq!(cursor, "b");
        assert!(fresh.is_empty());

        let (cursor, fresh) = advance_cursor(Some(cursor.as_str()), history(&["b"]));
        assert_eq!(cursor, "b");
        assert!(fresh.is_empty());
    }

    #[test]
    fn invite_notice_names_inviter() {
        assert_eq!(invite_from("<invite from 'Bob B'>"), Some("Bob B"));
        assert_eq!(invite_from("please <invite from 'x'>"), None);
        assert_eq!(invite_from("hello"), None);
    }

    #[test]
    fn self_messages_are_recognised() {
        let b = backend();
        let mine = HistoryItem {
            id: "1".into(),
            from_id: "9".into(),
            from_name: "Chan Bot".into(),
            from_mention: "ChanBot".into(),
            message: "hi".into(),
        };
        assert!(b.is_self(&mine));
        let theirs = HistoryItem {
            from_name: "Alice".into(),
            from_mention: "alice".into(),
            ..mine
        };
        assert!(!b.is_self(&theirs));
    }

    #[test]
    fn config_is_normalised() {
        let b = backend();
        assert_eq!(b.api("room"), "https://chat.example.com/v2/room");
        assert_eq!(b.poll_interval, Duration::from_secs(1));
        assert!(b.mention_token().is_none());
    }

    #[tokio::test]
    async fn leave_parts_and_stops_polling() {
        let b = backend();
        let room = ChannelRef {
            id: "42".into(),
            name: "ops".into(),
        };
        b.resolved.lock().insert("ops".into(), room.clone());
        assert_eq!(b.leave(&room).await.unwrap(), LeaveOutcome::Parted);
        assert!(b.watched_rooms().await.is_empty());
    }
}

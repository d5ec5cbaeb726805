//! Slack backend: Socket Mode for events, the Web API for everything else.

use super::split::{split_message, unlink_slack, SLACK_MAX_MESSAGE_LENGTH};
use super::traits::{
    BackendKind, ChannelRef, ChatBackend, InboundEvent, Recipient, UserIdentity,
};
use crate::state::ChannelStore;
use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// A user message pulled out of a Socket Mode envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawMessage {
    user: String,
    channel: String,
    text: String,
}

/// Extract a plain user message from an `events_api` payload.
///
/// Subtyped messages (edits, joins, bot posts), the bot's own lines and
/// empty texts (thread duplicates) yield nothing.
fn raw_message(payload: &Value, bot_id: Option<&str>) -> Option<RawMessage> {
    let event = payload.get("event")?;
    if event.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    if event.get("subtype").is_some() || event.get("bot_id").is_some() {
        return None;
    }
    let user = event.get("user").and_then(Value::as_str)?;
    if bot_id.is_some_and(|id| id == user) {
        return None;
    }
    let text = event.get("text").and_then(Value::as_str).unwrap_or("");
    if text.is_empty() {
        return None;
    }
    Some(RawMessage {
        user: user.to_string(),
        channel: event.get("channel").and_then(Value::as_str)?.to_string(),
        text: unlink_slack(text),
    })
}

/// Slack conversation ids starting with `D` are 1:1 DMs.
fn is_direct(channel_id: &str) -> bool {
    channel_id.starts_with('D')
}

pub struct SlackBackend {
    bot_token: String,
    app_token: String,
    client: reqwest::Client,
    store: Arc<ChannelStore>,
    bot_user_id: Mutex<Option<String>>,
    channel_names: Mutex<HashMap<String, Option<String>>>,
    users: Mutex<HashMap<String, UserIdentity>>,
}

impl SlackBackend {
    pub fn new(bot_token: String, app_token: String, store: Arc<ChannelStore>) -> Self {
        Self {
            bot_token,
            app_token,
            client: reqwest::Client::new(),
            store,
            bot_user_id: Mutex::new(None),
            channel_names: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
        }
    }

    fn api_url(method: &str) -> String {
        format!("{SLACK_API_BASE}/{method}")
    }

    /// Call a Web API method with the bot token and unwrap Slack's `ok` envelope.
    async fn call(&self, method: &str, query: &[(&str, &str)]) -> anyhow::Result<Value> {
        let body: Value = self
            .client
            .get(Self::api_url(method))
            .bearer_auth(&self.bot_token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Slack {method} request failed"))?
            .json()
            .await
            .with_context(|| format!("Slack {method} returned invalid JSON"))?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let err = body.get("error").and_then(Value::as_str).unwrap_or("unknown");
            anyhow::bail!("Slack {method} failed: {err}");
        }
        Ok(body)
    }

    async fn resolve_bot_id(&self) -> anyhow::Result<String> {
        let body = self.call("auth.test", &[]).await?;
        let id = body
            .get("user_id")
            .and_then(Value::as_str)
            .context("auth.test returned no user_id")?
            .to_string();
        *self.bot_user_id.lock() = Some(id.clone());
        Ok(id)
    }

    async fn socket_url(&self) -> anyhow::Result<String> {
        let body: Value = self
            .client
            .post(Self::api_url("apps.connections.open"))
            .bearer_auth(&self.app_token)
            .send()
            .await
            .context("Slack apps.connections.open request failed")?
            .json()
            .await?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let err = body.get("error").and_then(Value::as_str).unwrap_or("unknown");
            anyhow::bail!("Slack apps.connections.open failed: {err}");
        }
        body.get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("apps.connections.open returned no url")
    }

    /// Turn a raw Slack message into a dispatcher event.
    async fn normalize(&self, raw: RawMessage) -> anyhow::Result<Option<InboundEvent>> {
        let direct = is_direct(&raw.channel);
        let room = if direct {
            None
        } else {
            self.resolve_channel(&raw.channel).await?
        };
        let identity = self.resolve_user(&raw.user).await?.unwrap_or(UserIdentity {
            id: raw.user.clone(),
            name: raw.user.clone(),
            mention_name: raw.user.clone(),
        });
        let recipient = Recipient {
            backend: BackendKind::Slack,
            id: identity.id,
            name: identity.name,
            mention_name: identity.mention_name,
            reply_to: raw.channel.clone(),
            room: room.clone(),
            direct,
        };

        let Some(name) = room else {
            return Ok(Some(InboundEvent::Message {
                recipient,
                text: raw.text,
            }));
        };
        if self.store.contains(&name) {
            return Ok(Some(InboundEvent::Message {
                recipient,
                text: raw.text,
            }));
        }

        // Bots cannot see invitations; a mention in a room we do not know
        // counts as one.
        let mentioned = self
            .mention_token()
            .is_some_and(|token| raw.text.contains(&token));
        if !mentioned {
            tracing::debug!("Ignoring Slack message in unknown channel #{name}");
            return Ok(None);
        }
        let inviter = recipient.mention_name.clone();
        Ok(Some(InboundEvent::Invite {
            recipient,
            channel: ChannelRef {
                id: raw.channel,
                name,
            },
            inviter,
        }))
    }
}

#[async_trait]
impl ChatBackend for SlackBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Slack
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        let bot_id = self.resolve_bot_id().await?;
        let url = self.socket_url().await?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("Slack Socket Mode connect failed")?;
        let (mut write, mut read) = stream.split();
        tracing::info!("Slack Socket Mode connected as {bot_id}");

        while let Some(frame) = read.next().await {
            let text = match frame.context("Slack WebSocket error")? {
                WsMessage::Text(text) => text,
                WsMessage::Ping(data) => {
                    write.send(WsMessage::Pong(data)).await?;
                    continue;
                }
                WsMessage::Close(_) => {
                    tracing::info!("Slack closed the Socket Mode connection");
                    return Ok(());
                }
                _ => continue,
            };

            let envelope: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("Unparseable Socket Mode frame: {e}");
                    continue;
                }
            };

            match envelope.get("type").and_then(Value::as_str) {
                Some("hello") => continue,
                Some("disconnect") => {
                    tracing::info!("Slack asked us to reconnect");
                    return Ok(());
                }
                _ => {}
            }

            if let Some(envelope_id) = envelope.get("envelope_id").and_then(Value::as_str) {
                let ack = json!({ "envelope_id": envelope_id }).to_string();
                write.send(WsMessage::Text(ack)).await?;
            }

            let Some(payload) = envelope.get("payload") else {
                continue;
            };
            let Some(raw) = raw_message(payload, Some(&bot_id)) else {
                continue;
            };
            match self.normalize(raw).await {
                Ok(Some(event)) => {
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Dropping Slack message: {e:#}"),
            }
        }

        anyhow::bail!("Slack Socket Mode stream ended")
    }

    async fn send(&self, recipient: &Recipient, text: &str) -> anyhow::Result<()> {
        for chunk in split_message(text, SLACK_MAX_MESSAGE_LENGTH) {
            let body: Value = self
                .client
                .post(Self::api_url("chat.postMessage"))
                .bearer_auth(&self.bot_token)
                .json(&json!({
                    "channel": recipient.reply_to,
                    "text": chunk,
                }))
                .send()
                .await?
                .json()
                .await?;
            if body.get("ok").and_then(Value::as_bool) != Some(true) {
                let err = body.get("error").and_then(Value::as_str).unwrap_or("unknown");
                anyhow::bail!("Slack chat.postMessage failed: {err}");
            }
        }
        Ok(())
    }

    async fn resolve_channel(&self, id: &str) -> anyhow::Result<Option<String>> {
        let cached = self.channel_names.lock().get(id).cloned();
        if let Some(name) = cached {
            return Ok(name);
        }
        let body = self.call("conversations.info", &[("channel", id)]).await?;
        let channel = body.get("channel");
        let is_im = channel
            .and_then(|c| c.get("is_im"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let name = channel
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .filter(|_| !is_im)
            .map(str::to_string);
        self.channel_names.lock().insert(id.to_string(), name.clone());
        Ok(name)
    }

    async fn resolve_user(&self, id: &str) -> anyhow::Result<Option<UserIdentity>> {
        let cached = self.users.lock().get(id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        let body = self.call("users.info", &[("user", id)]).await?;
        let Some(user) = body.get("user") else {
            return Ok(None);
        };
        let handle = user
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(id)
            .to_string();
        let identity = UserIdentity {
            id: id.to_string(),
            name: user
                .get("real_name")
                .and_then(Value::as_str)
                .unwrap_or(&handle)
                .to_string(),
            mention_name: handle,
        };
        self.users.lock().insert(id.to_string(), identity.clone());
        Ok(Some(identity))
    }

    fn mention_token(&self) -> Option<String> {
        self.bot_user_id.lock().as_ref().map(|id| format!("<@{id}>"))
    }

    async fn directory(&self) -> anyhow::Result<Vec<ChannelRef>> {
        let mut listing = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut query = vec![
                ("types", "public_channel,private_channel"),
                ("exclude_archived", "true"),
                ("limit", "200"),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }
            let body = self.call("users.conversations", &query).await?;
            if let Some(channels) = body.get("channels").and_then(Value::as_array) {
                listing.extend(channels.iter().filter_map(|c| {
                    Some(ChannelRef {
                        id: c.get("id")?.as_str()?.to_string(),
                        name: c.get("name")?.as_str()?.to_string(),
                    })
                }));
            }
            cursor = body
                .pointer("/response_metadata/next_cursor")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            if cursor.is_empty() {
                break;
            }
        }
        {
            let mut names = self.channel_names.lock();
            for entry in &listing {
                names.insert(entry.id.clone(), Some(entry.name.clone()));
            }
        }
        Ok(listing)
    }

    fn expects_steady_traffic(&self) -> bool {
        true
    }

    async fn health_check(&self) -> bool {
        self.call("auth.test", &[]).await.is_ok()
    }
}

//! Backend-neutral chat types and the trait every network backend implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which chat network an event came from or a channel lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    HipChat,
    Slack,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HipChat => "hipchat",
            Self::Slack => "slack",
        }
    }

    /// Human-facing label used in replies.
    pub fn label(self) -> &'static str {
        match self {
            Self::HipChat => "HipChat",
            Self::Slack => "Slack",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical sender/target of one inbound event.
///
/// Built by an adapter for every event and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub backend: BackendKind,
    /// Backend-native id of the sender.
    pub id: String,
    /// Display name of the sender.
    pub name: String,
    /// Short handle of the sender, without `@`.
    pub mention_name: String,
    /// Room/channel id to reply to; for private messages the DM conversation.
    pub reply_to: String,
    /// Canonical room name when the event came from a room.
    pub room: Option<String>,
    /// The reply target is a 1:1 conversation.
    pub direct: bool,
}

impl Recipient {
    /// Display name of the conversation: the room name, else the raw reply target.
    pub fn channel_name(&self) -> &str {
        self.room.as_deref().unwrap_or(&self.reply_to)
    }
}

/// A room as the backend knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
}

/// What an adapter hands to the dispatcher.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// A room or private message. Self-sent and empty messages never get here.
    Message { recipient: Recipient, text: String },
    /// The bot was (explicitly or implicitly) invited into a room.
    Invite {
        recipient: Recipient,
        channel: ChannelRef,
        inviter: String,
    },
}

impl InboundEvent {
    pub fn recipient(&self) -> &Recipient {
        match self {
            Self::Message { recipient, .. } | Self::Invite { recipient, .. } => recipient,
        }
    }
}

/// Identity details for a backend user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub mention_name: String,
}

/// How a backend honoured a request to leave a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The bot actually left the room.
    Parted,
    /// The backend does not let bots leave; the room is ignored from now on.
    Ignored,
}

/// Core backend trait. One adapter per chat network.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable backend name
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Connect and stream events until the connection drops (long-running).
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()>;

    /// Deliver `text` to the recipient's conversation, chunking as needed.
    async fn send(&self, recipient: &Recipient, text: &str) -> anyhow::Result<()>;

    /// Canonical name for a backend channel id, if it is a room.
    async fn resolve_channel(&self, id: &str) -> anyhow::Result<Option<String>>;

    /// Identity of a backend user id.
    async fn resolve_user(&self, id: &str) -> anyhow::Result<Option<UserIdentity>>;

    /// Protocol-native mention token for the bot (e.g. `<@U123>`), once known.
    fn mention_token(&self) -> Option<String> {
        None
    }

    /// Leave (or stop listening in) a room.
    async fn leave(&self, _channel: &ChannelRef) -> anyhow::Result<LeaveOutcome> {
        Ok(LeaveOutcome::Ignored)
    }

    /// Rooms the bot is currently a member of, for directory refresh.
    async fn directory(&self) -> anyhow::Result<Vec<ChannelRef>> {
        Ok(Vec::new())
    }

    /// Whether silence on this backend means the connection is dead.
    fn expects_steady_traffic(&self) -> bool {
        false
    }

    /// Check if backend is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyBackend;

    #[async_trait]
    impl ChatBackend for DummyBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::HipChat
        }

        async fn listen(
            &self,
            _tx: tokio::sync::mpsc::Sender<InboundEvent>,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send(&self, _recipient: &Recipient, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn resolve_channel(&self, _id: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        async fn resolve_user(&self, _id: &str) -> anyhow::Result<Option<UserIdentity>> {
            Ok(None)
        }
    }

    #[test]
    fn backend_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&BackendKind::HipChat).unwrap(),
            "\"hipchat\""
        );
        let parsed: BackendKind = serde_json::from_str("\"slack\"").unwrap();
        assert_eq!(parsed, BackendKind::Slack);
        assert_eq!(BackendKind::Slack.label(), "Slack");
    }

    #[test]
    fn channel_name_falls_back_to_reply_target() {
        let mut r = Recipient {
            backend: BackendKind::Slack,
            id: "U1".into(),
            name: "Alice".into(),
            mention_name: "alice".into(),
            reply_to: "D42".into(),
            room: None,
            direct: true,
        };
        assert_eq!(r.channel_name(), "D42");
        r.room = Some("ops".into());
        assert_eq!(r.channel_name(), "ops");
    }

    #[tokio::test]
    async fn default_trait_methods() {
        let backend = DummyBackend;
        assert_eq!(backend.name(), "hipchat");
        assert!(backend.mention_token().is_none());
        assert!(!backend.expects_steady_traffic());
        assert!(backend.health_check().await);
        assert!(backend.directory().await.unwrap().is_empty());
        let outcome = backend
            .leave(&ChannelRef {
                id: "1".into(),
                name: "ops".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, LeaveOutcome::Ignored);
    }
}

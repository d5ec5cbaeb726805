//! Routes normalized inbound events to commands, chatter, or channel
//! bookkeeping, and sends whatever comes back through the backend.

use crate::agent::chatter::{self, ChatterContext, ChatterOutcome};
use crate::agent::classifier::{self, Classification, Classifier};
use crate::agent::phrases::{self, BARE_INVOCATION, GOODBYE, HELLO};
use crate::channels::traits::{ChannelRef, ChatBackend, InboundEvent, LeaveOutcome, Recipient};
use crate::commands::builtin::help_text;
use crate::commands::{ActionContext, ActionError, Invocation, Registry};
use crate::config::{ActionsConfig, Config};
use crate::security::SecurityPolicy;
use crate::state::{Channel, ChannelStore, Counters};
use crate::util::truncate_with_ellipsis;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Dispatcher {
    store: Arc<ChannelStore>,
    counters: Arc<Counters>,
    registry: Registry,
    policy: SecurityPolicy,
    actions: ActionsConfig,
    http: reqwest::Client,
    mention_name: String,
    /// One pattern set per native mention token (backends differ).
    classifiers: Mutex<HashMap<Option<String>, Arc<Classifier>>>,
}

impl Dispatcher {
    pub fn new(config: &Config, store: Arc<ChannelStore>, counters: Arc<Counters>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.actions.http_timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            store,
            counters,
            registry: Registry::with_builtins(),
            policy: SecurityPolicy::from_config(&config.bot, &config.actions),
            actions: config.actions.clone(),
            http,
            mention_name: config.bot.mention_name.clone(),
            classifiers: Mutex::new(HashMap::new()),
        })
    }

    /// Swap the command table, e.g. to add site-specific actions.
    #[must_use]
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &Arc<ChannelStore> {
        &self.store
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    fn classifier_for(&self, backend: &dyn ChatBackend) -> Result<Arc<Classifier>> {
        let token = backend.mention_token();
        let mut cache = self.classifiers.lock();
        if let Some(existing) = cache.get(&token) {
            return Ok(Arc::clone(existing));
        }
        let built = Arc::new(Classifier::new(&self.mention_name, token.as_deref())?);
        cache.insert(token, Arc::clone(&built));
        Ok(built)
    }

    /// The stored channel a recipient's conversation belongs to, if any.
    fn channel_for(&self, r: &Recipient) -> Option<Channel> {
        r.room
            .as_deref()
            .and_then(|room| self.store.get(room))
            .filter(|ch| ch.backend == r.backend)
            .or_else(|| self.store.find_by_backend_id(r.backend, &r.reply_to))
    }

    /// Handle one event to completion. Replies go out through `backend`.
    pub async fn handle_event(&self, backend: &dyn ChatBackend, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::Invite {
                recipient,
                channel,
                inviter,
            } => {
                tracing::info!(
                    "Invited into {} #{} ({}) by {}",
                    recipient.backend,
                    channel.name,
                    channel.id,
                    if inviter.is_empty() { "nobody" } else { inviter.as_str() }
                );
                self.store.unignore(&channel.name);
                self.store
                    .get_or_create(recipient.backend, &channel.id, &channel.name, &inviter);
                self.reply(backend, &recipient, phrases::random(HELLO)).await;
            }
            InboundEvent::Message { recipient, text } => {
                let classifier = self.classifier_for(backend)?;
                let channel = self.channel_for(&recipient);
                if let Some(ch) = &channel {
                    self.update_seen(ch, &recipient, &text);
                }
                self.process_message(backend, &classifier, &recipient, channel.as_ref(), &text)
                    .await;
            }
        }
        Ok(())
    }

    fn update_seen(&self, channel: &Channel, r: &Recipient, text: &str) {
        let curses = classifier::curse_words(text);
        for curse in &curses {
            self.counters.increment("curses", curse);
            self.counters.increment("cursers", &r.mention_name);
        }
        self.store.record_activity(
            &channel.name,
            &r.mention_name,
            &r.id,
            classifier::line_count(text),
            &curses,
        );
    }

    async fn process_message(
        &self,
        backend: &dyn ChatBackend,
        classifier: &Classifier,
        r: &Recipient,
        channel: Option<&Channel>,
        text: &str,
    ) {
        match classifier.classify(text) {
            Classification::Command { invocation, body } => {
                if channel.is_none() && !r.direct {
                    tracing::debug!("Dropping command from unknown {} room {}", r.backend, r.reply_to);
                    return;
                }
                self.process_command(backend, classifier, r, channel, &invocation, &body)
                    .await;
            }
            Classification::Chatter(_) => match channel {
                Some(ch) => self.process_chatter(backend, classifier, r, ch, text, false).await,
                None if r.direct => {
                    self.process_command(backend, classifier, r, None, "!", text)
                        .await;
                }
                None => {}
            },
        }
    }

    async fn process_command(
        &self,
        backend: &dyn ChatBackend,
        classifier: &Classifier,
        r: &Recipient,
        channel: Option<&Channel>,
        invocation: &str,
        body: &str,
    ) {
        let line = classifier.command_line(body);
        if line.name.is_empty() {
            self.reply(backend, r, phrases::random(BARE_INVOCATION)).await;
            return;
        }

        tracing::debug!(
            "{} #{}: '{}'",
            r.backend,
            channel.map_or(r.channel_name(), |ch| ch.name.as_str()),
            truncate_with_ellipsis(body, 80)
        );

        if classifier::is_command_leave(body.trim_start()) {
            self.leave(backend, r, channel, true).await;
            return;
        }

        let Some(resolved) = self.registry.resolve(&line.name, &line.raw_name) else {
            if invocation.starts_with('!') {
                if classifier::is_noise(&line.name) {
                    return;
                }
                let help = help_text(&self.action_context(classifier), &line.name);
                self.reply(backend, r, &help).await;
            } else if let Some(ch) = channel {
                self.process_chatter(backend, classifier, r, ch, body, true)
                    .await;
            }
            return;
        };

        let args = resolved.args.unwrap_or(line.args);
        self.run_action(backend, classifier, r, channel, resolved.name, &args)
            .await;
    }

    async fn process_chatter(
        &self,
        backend: &dyn ChatBackend,
        classifier: &Classifier,
        r: &Recipient,
        channel: &Channel,
        text: &str,
        for_us: bool,
    ) {
        let ctx = ChatterContext {
            store: &self.store,
            channel: &channel.name,
            classifier,
            sender: &r.mention_name,
        };
        let outcome = {
            let mut rng = rand::thread_rng();
            chatter::evaluate(&ctx, text, for_us, &mut rng)
        };

        match outcome {
            Some(ChatterOutcome::Leave { polite }) => {
                self.leave(backend, r, Some(channel), polite).await;
            }
            Some(ChatterOutcome::Command { name, args }) => {
                self.run_action(backend, classifier, r, Some(channel), name, &args)
                    .await;
            }
            Some(ChatterOutcome::Reply(line)) => self.reply(backend, r, &line).await,
            None => {}
        }
    }

    fn action_context<'a>(&'a self, classifier: &'a Classifier) -> ActionContext<'a> {
        ActionContext {
            registry: &self.registry,
            store: &self.store,
            counters: &self.counters,
            policy: &self.policy,
            config: &self.actions,
            http: &self.http,
            bot_mention: classifier.mention_name(),
            native_token: classifier.native_token(),
        }
    }

    async fn run_action(
        &self,
        backend: &dyn ChatBackend,
        classifier: &Classifier,
        r: &Recipient,
        channel: Option<&Channel>,
        name: &str,
        args: &str,
    ) {
        let Some(entry) = self.registry.get(name) else {
            return;
        };
        self.counters.increment("commands", name);

        let Some(handler) = entry.handler.as_ref() else {
            // Pseudo-commands; today that is only `leave`.
            self.leave(backend, r, channel, true).await;
            return;
        };

        let channel_name = channel.map_or(r.channel_name(), |ch| ch.name.as_str());
        let ctx = self.action_context(classifier);
        let result = handler
            .execute(
                &ctx,
                Invocation {
                    recipient: r,
                    channel: channel_name,
                    args,
                },
            )
            .await;

        let text = match result {
            Ok(text) => text,
            Err(ActionError::Usage(text)) => text,
            Err(ActionError::Timeout { .. }) => {
                format!("Sorry, I had to kill your '{name}' command.")
            }
            Err(ActionError::NotConfigured(key)) => {
                tracing::warn!("'{name}' needs '{key}' in [actions]");
                format!("Sorry, '{name}' is not configured here.")
            }
            Err(e) => {
                tracing::warn!("Action '{name}' failed: {e}");
                format!("Sorry, something went wrong running '{name}'.")
            }
        };
        self.reply(backend, r, &text).await;
    }

    async fn leave(
        &self,
        backend: &dyn ChatBackend,
        r: &Recipient,
        channel: Option<&Channel>,
        polite: bool,
    ) {
        tracing::info!("{} asked us to leave {} on {}", r.name, r.reply_to, r.backend);
        if !polite {
            self.reply(backend, r, "Please ask politely.").await;
            return;
        }
        let Some(channel) = channel else {
            self.reply(backend, r, "Try again from a channel I'm in.").await;
            return;
        };

        let target = ChannelRef {
            id: channel.id.clone(),
            name: channel.name.clone(),
        };
        let outcome = backend.leave(&target).await.unwrap_or_else(|e| {
            tracing::warn!("Failed to leave {} #{}: {e}", r.backend, channel.name);
            LeaveOutcome::Ignored
        });
        if outcome == LeaveOutcome::Parted {
            self.store.remove(&channel.name);
            return;
        }
        self.store.ignore(&channel.name);
        let msg = format!(
            "Bots can't leave {0} channels - you'd have to find a {0} admin to kick me out.\n\
             But I'm going to ignore everything in this channel going forward.\n\
             If you do miss me terribly much, @-mention me and I'll start paying attention in here again, ok?\n\n\
             {1}\n_pretends to have left #{2}._",
            r.backend.label(),
            phrases::random(GOODBYE),
            channel.name
        );
        self.reply(backend, r, &msg).await;
    }

    /// Send a reply. Empty text means "say nothing"; send failures are logged.
    async fn reply(&self, backend: &dyn ChatBackend, r: &Recipient, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.counters.increment("replies", text);
        if let Err(e) = backend.send(r, text).await {
            tracing::warn!(
                "Failed to reply on {} to {}: {e}",
                backend.name(),
                r.reply_to
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channels::traits::{BackendKind, UserIdentity};
    use crate::commands::{Action, ActionSpec};
    use crate::state::{ManualClock, Persistence};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use tempfile::TempDir;

    /// Backend double that records every outbound message.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub sent: Mutex<Vec<(String, String)>>,
        pub parts: bool,
    }

    impl RecordingBackend {
        pub fn replies(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
        }

        pub fn last(&self) -> Option<String> {
            self.replies().pop()
        }
    }

    #[async_trait]
    impl ChatBackend for RecordingBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Slack
        }

        async fn listen(&self, _tx: tokio::sync::mpsc::Sender<InboundEvent>) -> Result<()> {
            Ok(())
        }

        async fn send(&self, recipient: &Recipient, text: &str) -> Result<()> {
            self.sent
                .lock()
                .push((recipient.reply_to.clone(), text.to_string()));
            Ok(())
        }

        async fn resolve_channel(&self, _id: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn resolve_user(&self, _id: &str) -> Result<Option<UserIdentity>> {
            Ok(None)
        }

        async fn leave(&self, _channel: &ChannelRef) -> Result<LeaveOutcome> {
            Ok(if self.parts {
                LeaveOutcome::Parted
            } else {
                LeaveOutcome::Ignored
            })
        }
    }

    pub(crate) fn test_config() -> Config {
        let mut config = Config::default();
        config.bot.mention_name = "bot".into();
        config.bot.owner = "alice".into();
        config
    }

    pub(crate) fn dispatcher_with_clock() -> (Dispatcher, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(ChannelStore::new(clock.clone(), 1800));
        let dispatcher =
            Dispatcher::new(&test_config(), store, Arc::new(Counters::new())).unwrap();
        (dispatcher, clock)
    }

    pub(crate) fn room_message(channel: &str, sender: &str, text: &str) -> InboundEvent {
        InboundEvent::Message {
            recipient: Recipient {
                backend: BackendKind::Slack,
                id: format!("U-{sender}"),
                name: sender.to_string(),
                mention_name: sender.to_string(),
                reply_to: format!("C-{channel}"),
                room: Some(channel.to_string()),
                direct: false,
            },
            text: text.to_string(),
        }
    }

    fn direct_message(sender: &str, text: &str) -> InboundEvent {
        InboundEvent::Message {
            recipient: Recipient {
                backend: BackendKind::Slack,
                id: format!("U-{sender}"),
                name: sender.to_string(),
                mention_name: sender.to_string(),
                reply_to: "D42".into(),
                room: None,
                direct: true,
            },
            text: text.to_string(),
        }
    }

    pub(crate) fn join(dispatcher: &Dispatcher, channel: &str) {
        dispatcher.store().get_or_create(
            BackendKind::Slack,
            &format!("C-{channel}"),
            channel,
            "alice",
        );
    }

    #[tokio::test]
    async fn unknown_bang_command_gets_help() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        join(&d, "ops");
        d.handle_event(&backend, room_message("ops", "alice", "!xyz"))
            .await
            .unwrap();
        assert_eq!(
            backend.last().as_deref(),
            Some("No such command: xyz. Try '!help'.")
        );
    }

    #[tokio::test]
    async fn punctuation_commands_are_ignored() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        join(&d, "ops");
        d.handle_event(&backend, room_message("ops", "alice", "!!!"))
            .await
            .unwrap();
        assert!(backend.replies().is_empty());
    }

    #[tokio::test]
    async fn ticket_shorthand_dispatches_to_jira() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        join(&d, "ops");
        d.handle_event(&backend, room_message("ops", "alice", "!ABC-123"))
            .await
            .unwrap();
        assert_eq!(d.counters().get("commands").unwrap()["jira"], 1);
        assert_eq!(
            backend.last().as_deref(),
            Some("Sorry, 'jira' is not configured here.")
        );
    }

    #[tokio::test]
    async fn mention_invocation_runs_command() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        join(&d, "ops");
        d.handle_event(&backend, room_message("ops", "alice", "@bot ping"))
            .await
            .unwrap();
        assert_eq!(backend.last().as_deref(), Some("pong"));
        assert_eq!(d.counters().get("replies").unwrap()["pong"], 1);
    }

    #[tokio::test]
    async fn bare_invocation_gets_a_prompt() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        join(&d, "ops");
        d.handle_event(&backend, room_message("ops", "alice", "!"))
            .await
            .unwrap();
        let reply = backend.last().unwrap();
        assert!(BARE_INVOCATION.contains(&reply.as_str()));
    }

    #[tokio::test]
    async fn direct_messages_are_commands_without_prefix() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        d.handle_event(&backend, direct_message("alice", "ping"))
            .await
            .unwrap();
        assert_eq!(backend.last().as_deref(), Some("pong"));
        assert!(d.store().is_empty());
    }

    #[tokio::test]
    async fn unknown_rooms_are_ignored() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        d.handle_event(&backend, room_message("random", "alice", "!ping"))
            .await
            .unwrap();
        assert!(backend.replies().is_empty());
    }

    #[tokio::test]
    async fn invite_creates_channel_and_greets() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        let InboundEvent::Message { recipient, .. } = room_message("dev", "bob", "") else {
            unreachable!()
        };
        d.handle_event(
            &backend,
            InboundEvent::Invite {
                recipient,
                channel: ChannelRef {
                    id: "C-dev".into(),
                    name: "dev".into(),
                },
                inviter: "bob".into(),
            },
        )
        .await
        .unwrap();
        let channel = d.store().get("dev").unwrap();
        assert_eq!(channel.inviter, "bob");
        assert!(channel.is_toggle_complete());
        assert!(HELLO.contains(&backend.last().unwrap().as_str()));
    }

    #[tokio::test]
    async fn seen_and_curses_are_tracked_before_classification() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        join(&d, "ops");
        d.handle_event(&backend, room_message("ops", "carol", "oh shit"))
            .await
            .unwrap();
        let user = d.store().user("ops", "carol").unwrap();
        assert_eq!(user.count, 1);
        assert_eq!(user.curse_words["shit"], 1);
        assert_eq!(d.counters().get("curses").unwrap()["shit"], 1);
        assert_eq!(d.counters().get("cursers").unwrap()["carol"], 1);
    }

    #[tokio::test]
    async fn chatter_leave_requires_please() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        join(&d, "ops");
        d.handle_event(&backend, room_message("ops", "alice", "bot, leave"))
            .await
            .unwrap();
        assert_eq!(backend.last().as_deref(), Some("Please ask politely."));
        assert!(d.store().contains("ops"));

        d.handle_event(&backend, room_message("ops", "alice", "bot, please leave"))
            .await
            .unwrap();
        assert!(!d.store().contains("ops"));
        assert!(backend
            .last()
            .unwrap()
            .ends_with("_pretends to have left #ops._"));
    }

    #[tokio::test]
    async fn command_leave_parts_without_please() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend {
            parts: true,
            ..RecordingBackend::default()
        };
        join(&d, "ops");
        d.handle_event(&backend, room_message("ops", "alice", "!leave"))
            .await
            .unwrap();
        assert!(!d.store().contains("ops"));
        assert!(backend.replies().is_empty());
    }

    #[tokio::test]
    async fn leave_from_direct_message_is_refused() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        d.handle_event(&backend, direct_message("alice", "!leave"))
            .await
            .unwrap();
        assert_eq!(
            backend.last().as_deref(),
            Some("Try again from a channel I'm in.")
        );
    }

    static BOOM: ActionSpec = ActionSpec {
        name: "boom",
        help: "always fails",
        how: "test double",
        usage: "!boom",
        aliases: &[],
    };

    struct FailingAction;

    #[async_trait]
    impl Action for FailingAction {
        fn spec(&self) -> &'static ActionSpec {
            &BOOM
        }

        async fn execute(
            &self,
            _ctx: &ActionContext<'_>,
            _inv: Invocation<'_>,
        ) -> Result<String, ActionError> {
            Err(ActionError::Other("kaboom".into()))
        }
    }

    #[tokio::test]
    async fn failing_action_does_not_stop_other_channels() {
        let (d, _) = dispatcher_with_clock();
        let mut registry = Registry::with_builtins();
        registry.register(Arc::new(FailingAction));
        let d = d.with_registry(registry);
        let backend = RecordingBackend::default();
        join(&d, "ops");
        join(&d, "dev");

        d.handle_event(&backend, room_message("ops", "alice", "!boom"))
            .await
            .unwrap();
        d.handle_event(&backend, room_message("dev", "bob", "!ping"))
            .await
            .unwrap();
        let sent = backend.sent.lock().clone();
        assert_eq!(
            sent,
            vec![
                (
                    "C-ops".to_string(),
                    "Sorry, something went wrong running 'boom'.".to_string()
                ),
                ("C-dev".to_string(), "pong".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn restored_toggles_and_throttles_silence_trivia() {
        let tmp = TempDir::new().unwrap();
        let channels_path = tmp.path().join("channels.json");
        let counters_path = tmp.path().join("counters.json");

        let (before, clock) = dispatcher_with_clock();
        join(&before, "ops");
        before.store().flip_toggle("ops", "chatter");
        clock.advance(ChronoDuration::minutes(-10));
        assert!(!before.store().is_throttled("ops", "trivia"));
        clock.advance(ChronoDuration::minutes(10));
        Persistence::new(
            channels_path.clone(),
            counters_path.clone(),
            Arc::clone(before.store()),
            Arc::clone(before.counters()),
        )
        .save()
        .unwrap();

        let (after, _) = dispatcher_with_clock();
        let report = Persistence::new(
            channels_path,
            counters_path,
            Arc::clone(after.store()),
            Arc::clone(after.counters()),
        )
        .load()
        .unwrap();
        assert!(report.pruned.is_empty());

        let backend = RecordingBackend::default();
        after
            .handle_event(&backend, room_message("ops", "alice", "any trivia today?"))
            .await
            .unwrap();
        assert!(backend.replies().is_empty());

        let channel = after.store().get("ops").unwrap();
        assert!(!channel.toggle_enabled("chatter"));
        assert!(channel.toggle_enabled("python"));
        assert!(after.store().is_throttled("ops", "trivia"));
    }

    #[test]
    fn classifier_is_cached_per_token() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        let first = d.classifier_for(&backend).unwrap();
        let second = d.classifier_for(&backend).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        tokio_test::block_on(async {
            d.handle_event(&backend, direct_message("alice", "ping"))
                .await
                .unwrap();
        });
        assert_eq!(backend.last().as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn ignored_slack_channel_stays_ignored_across_directory_refresh() {
        let (d, _) = dispatcher_with_clock();
        let backend = RecordingBackend::default();
        join(&d, "ops");
        d.handle_event(&backend, room_message("ops", "alice", "!leave"))
            .await
            .unwrap();
        assert!(d.store().is_ignored("ops"));
        let after_leave = backend.replies().len();

        let listing = [ChannelRef {
            id: "C-ops".into(),
            name: "ops".into(),
        }];
        d.store()
            .refresh_directory(BackendKind::Slack, &listing, true);
        assert!(!d.store().contains("ops"));

        d.handle_event(&backend, room_message("ops", "bob", "hold on"))
            .await
            .unwrap();
        assert_eq!(backend.replies().len(), after_leave);

        let InboundEvent::Message { recipient, .. } = room_message("ops", "bob", "@bot") else {
            unreachable!()
        };
        d.handle_event(
            &backend,
            InboundEvent::Invite {
                recipient,
                channel: listing[0].clone(),
                inviter: "bob".into(),
            },
        )
        .await
        .unwrap();
        assert!(d.store().contains("ops"));
        assert!(!d.store().is_ignored("ops"));
    }
}

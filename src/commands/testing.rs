//! Shared fixture for action tests.

use super::registry::Registry;
use super::traits::{Action, ActionContext, ActionError, Invocation};
use crate::channels::traits::{BackendKind, Recipient};
use crate::config::ActionsConfig;
use crate::security::SecurityPolicy;
use crate::state::{ChannelStore, Counters, ManualClock};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

pub(crate) struct Harness {
    pub registry: Registry,
    pub store: ChannelStore,
    pub counters: Counters,
    pub policy: SecurityPolicy,
    pub config: ActionsConfig,
    pub http: reqwest::Client,
}

impl Harness {
    /// Bot `bot`, owner `alice`, clock fixed at 2024-03-01 09:00 UTC.
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        Self {
            registry: Registry::with_builtins(),
            store: ChannelStore::new(clock, 1800),
            counters: Counters::new(),
            policy: SecurityPolicy {
                owner: "alice".into(),
                ..SecurityPolicy::default()
            },
            config: ActionsConfig::default(),
            http: reqwest::Client::new(),
        }
    }

    pub fn context(&self) -> ActionContext<'_> {
        ActionContext {
            registry: &self.registry,
            store: &self.store,
            counters: &self.counters,
            policy: &self.policy,
            config: &self.config,
            http: &self.http,
            bot_mention: "bot",
            native_token: None,
        }
    }

    pub fn recipient(sender: &str, channel: &str) -> Recipient {
        Recipient {
            backend: BackendKind::Slack,
            id: format!("U-{sender}"),
            name: sender.to_string(),
            mention_name: sender.to_string(),
            reply_to: channel.to_string(),
            room: Some(channel.to_string()),
            direct: false,
        }
    }

    /// Run as `alice` in `#ops`.
    pub async fn run(&self, action: &dyn Action, args: &str) -> Result<String, ActionError> {
        self.run_full(action, "alice", "ops", args).await
    }

    pub async fn run_in(
        &self,
        action: &dyn Action,
        channel: &str,
        args: &str,
    ) -> Result<String, ActionError> {
        self.run_full(action, "alice", channel, args).await
    }

    pub async fn run_as(
        &self,
        action: &dyn Action,
        sender: &str,
        args: &str,
    ) -> Result<String, ActionError> {
        self.run_full(action, sender, "ops", args).await
    }

    async fn run_full(
        &self,
        action: &dyn Action,
        sender: &str,
        channel: &str,
        args: &str,
    ) -> Result<String, ActionError> {
        let recipient = Self::recipient(sender, channel);
        let ctx = self.context();
        action
            .execute(
                &ctx,
                Invocation {
                    recipient: &recipient,
                    channel,
                    args,
                },
            )
            .await
    }
}

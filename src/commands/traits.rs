use super::registry::Registry;
use crate::channels::traits::Recipient;
use crate::config::ActionsConfig;
use crate::security::SecurityPolicy;
use crate::state::{ChannelStore, Counters};
use async_trait::async_trait;
use thiserror::Error;

/// Registry metadata for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    pub name: &'static str,
    /// One-line summary for `!help`.
    pub help: &'static str,
    /// How the command gets its answer, for `!how`.
    pub how: &'static str,
    pub usage: &'static str,
    pub aliases: &'static [&'static str],
}

/// One call of an action: who asked, where, and with what.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub recipient: &'a Recipient,
    /// Channel display name: the room name, or the raw reply target in DMs.
    pub channel: &'a str,
    pub args: &'a str,
}

/// Shared runtime pieces an action may consult.
pub struct ActionContext<'a> {
    pub registry: &'a Registry,
    pub store: &'a ChannelStore,
    pub counters: &'a Counters,
    pub policy: &'a SecurityPolicy,
    pub config: &'a ActionsConfig,
    pub http: &'a reqwest::Client,
    pub bot_mention: &'a str,
    pub native_token: Option<&'a str>,
}

impl ActionContext<'_> {
    /// Whether `who` names the bot itself.
    pub fn is_bot(&self, who: &str) -> bool {
        let who = who.trim();
        who.trim_start_matches('@')
            .eq_ignore_ascii_case(self.bot_mention)
            || self.native_token.is_some_and(|token| who == token)
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    /// Bad arguments; the message is shown to the user as-is.
    #[error("{0}")]
    Usage(String),
    #[error("{program} did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not permitted here")]
    NotAllowed(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("lookup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

impl ActionError {
    pub fn usage(spec: &ActionSpec) -> Self {
        Self::Usage(format!("Usage: {}", spec.usage))
    }
}

/// A command body: `(sender, channel, args) -> reply`.
///
/// An empty reply means "say nothing". Implementations may block on I/O.
#[async_trait]
pub trait Action: Send + Sync {
    fn spec(&self) -> &'static ActionSpec;

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError>;
}

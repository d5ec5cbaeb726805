//! Per-channel administration: toggles, throttles, settings, and counters.

use super::traits::{Action, ActionContext, ActionError, ActionSpec, Invocation};
use crate::agent::phrases::{self, ACKNOWLEDGE};
use crate::state::ToggleChange;
use async_trait::async_trait;

static TOGGLE: ActionSpec = ActionSpec {
    name: "toggle",
    help: "toggle a feature",
    how: "built in, per-channel toggles",
    usage: "!toggle [<feature>]",
    aliases: &[],
};

static THROTTLE: ActionSpec = ActionSpec {
    name: "throttle",
    help: "show current throttles or set a throttle",
    how: "built in, per-channel throttles",
    usage: "!throttle [<something> [<seconds>]]",
    aliases: &[],
};

static UNTHROTTLE: ActionSpec = ActionSpec {
    name: "unthrottle",
    help: "unset a throttle",
    how: "built in, per-channel throttles",
    usage: "!unthrottle <throttle|*>",
    aliases: &[],
};

static SET: ActionSpec = ActionSpec {
    name: "set",
    help: "set a channel setting",
    how: "built in, per-channel settings",
    usage: "!set -- show all current settings\n!set name=value -- set 'name' to 'value'",
    aliases: &["setting"],
};

static UNSET: ActionSpec = ActionSpec {
    name: "unset",
    help: "unset a channel setting",
    how: "built in, per-channel settings",
    usage: "!unset name",
    aliases: &[],
};

static RESET: ActionSpec = ActionSpec {
    name: "reset",
    help: "reset a counter category",
    how: "built in, owner only",
    usage: "!reset <category>",
    aliases: &[],
};

static TOP: ActionSpec = ActionSpec {
    name: "top",
    help: "show the top N of some counters",
    how: "built in, from the global counters",
    usage: "!top <category>",
    aliases: &[],
};

const NOT_A_CHANNEL_THROTTLE: &str = "I can only throttle things in a channel.";
const NOT_A_CHANNEL_SET: &str = "I can only set things in a channel.";

// ── toggles ─────────────────────────────────────────────────────

pub struct ToggleAction;

#[async_trait]
impl Action for ToggleAction {
    fn spec(&self) -> &'static ActionSpec {
        &TOGGLE
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let words: Vec<&str> = inv.args.split_whitespace().collect();
        if words.len() > 1 {
            return Err(ActionError::usage(&TOGGLE));
        }
        let wanted = words.first().copied().unwrap_or("all");

        if wanted == "all" {
            let Some(toggles) = ctx.store.toggles(inv.channel) else {
                return Ok(String::new());
            };
            let lines: Vec<String> = toggles.iter().map(|(t, v)| format!("{t} => {v}")).collect();
            return Ok(format!(
                "These are the toggles for this channel:\n{}",
                lines.join(", ")
            ));
        }

        Ok(match ctx.store.flip_toggle(inv.channel, wanted) {
            ToggleChange::Set(value) => format!("{wanted} set to {value}"),
            ToggleChange::NoSuchToggle => format!("No such toggle: {wanted}"),
            ToggleChange::NoSuchChannel => String::new(),
        })
    }
}

// ── throttles ───────────────────────────────────────────────────

pub struct ThrottleAction;

#[async_trait]
impl Action for ThrottleAction {
    fn spec(&self) -> &'static ActionSpec {
        &THROTTLE
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let words: Vec<&str> = inv.args.split_whitespace().collect();
        if words.len() > 2 {
            return Err(ActionError::usage(&THROTTLE));
        }

        let default_secs = ctx.store.throttle_interval().num_seconds();
        let secs = match words.get(1) {
            Some(raw) => match raw.parse::<i64>() {
                Ok(secs) if secs >= 0 => secs,
                _ => return Ok("Invalid number of seconds.".into()),
            },
            None => default_secs,
        };

        if !ctx.store.contains(inv.channel) {
            return Ok(NOT_A_CHANNEL_THROTTLE.into());
        }

        if let Some(topic) = words.first() {
            ctx.store.override_throttle(inv.channel, topic, secs);
            return Ok(format!("{topic} => {secs}"));
        }

        let remaining = ctx.store.throttle_remaining(inv.channel).unwrap_or_default();
        if remaining.is_empty() {
            return Ok("This channel is currently unthrottled.".into());
        }
        let lines: Vec<String> = remaining
            .iter()
            .map(|(topic, left)| format!("{topic} => {left}"))
            .collect();
        Ok(format!(
            "These are the throttles for this channel:\n{}",
            lines.join(", ")
        ))
    }
}

pub struct UnthrottleAction;

#[async_trait]
impl Action for UnthrottleAction {
    fn spec(&self) -> &'static ActionSpec {
        &UNTHROTTLE
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let topic = inv.args.trim();
        if topic.is_empty() {
            return Err(ActionError::usage(&UNTHROTTLE));
        }
        let which = match topic {
            "*" | "everything" => None,
            other => Some(other),
        };
        if !ctx.store.clear_throttle(inv.channel, which) {
            return Ok(NOT_A_CHANNEL_THROTTLE.into());
        }
        Ok(phrases::random(ACKNOWLEDGE).to_string())
    }
}

// ── settings ────────────────────────────────────────────────────

pub struct SetAction;

/// Strip the angle brackets Slack and HipChat wrap around links.
fn unwrap_brackets(value: &str) -> &str {
    let value = value
        .strip_prefix("&lt;")
        .or_else(|| value.strip_prefix('<'))
        .unwrap_or(value);
    value
        .strip_suffix("&gt;")
        .or_else(|| value.strip_suffix('>'))
        .unwrap_or(value)
}

#[async_trait]
impl Action for SetAction {
    fn spec(&self) -> &'static ActionSpec {
        &SET
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let args = inv.args.trim();
        let assignment = args.split_once('=');
        if !args.is_empty() && assignment.is_none() {
            return Err(ActionError::Usage(format!("Usage:\n{}", SET.usage)));
        }

        let Some(settings) = ctx.store.settings(inv.channel) else {
            return Ok(NOT_A_CHANNEL_SET.into());
        };

        let Some((name, value)) = assignment else {
            if settings.is_empty() {
                return Ok(format!(
                    "There currently are no settings for #{}.",
                    inv.channel
                ));
            }
            return Ok(settings
                .iter()
                .map(|(n, v)| format!("{n}={v}\n"))
                .collect());
        };

        let name = name.trim();
        let value = unwrap_brackets(value.trim());
        if name.is_empty() {
            return Err(ActionError::Usage(format!("Usage:\n{}", SET.usage)));
        }
        let old = ctx
            .store
            .set_setting(inv.channel, name, value)
            .flatten()
            .map(|old| format!(" (was: {old})"))
            .unwrap_or_default();
        Ok(format!("Set '{name}' to '{value}'{old}."))
    }
}

pub struct UnsetAction;

#[async_trait]
impl Action for UnsetAction {
    fn spec(&self) -> &'static ActionSpec {
        &UNSET
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let words: Vec<&str> = inv.args.split_whitespace().collect();
        let [name] = words.as_slice() else {
            return Err(ActionError::usage(&UNSET));
        };
        if !ctx.store.contains(inv.channel) {
            return Ok(NOT_A_CHANNEL_SET.into());
        }
        Ok(match ctx.store.unset_setting(inv.channel, name) {
            Some(old) => format!("Deleted {name}={old}."),
            None => format!("No such setting: '{name}'."),
        })
    }
}

// ── counters ────────────────────────────────────────────────────

fn tracked_categories(ctx: &ActionContext<'_>) -> String {
    format!(
        "These are the things I currently track:\n{}",
        ctx.counters.categories().join(", ")
    )
}

pub struct ResetAction;

#[async_trait]
impl Action for ResetAction {
    fn spec(&self) -> &'static ActionSpec {
        &RESET
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let who = &inv.recipient.mention_name;
        if !ctx.policy.is_owner(who) {
            return Ok(format!("Sorry, {who} is not allowed to run this command."));
        }
        let category = inv.args.trim();
        if category.is_empty() {
            return Err(ActionError::usage(&RESET));
        }
        if !ctx.counters.reset(category) {
            return Ok(format!(
                "I don't keep track of that.\n{}",
                tracked_categories(ctx)
            ));
        }
        tracing::info!("Counter category '{category}' reset by {who}");
        Ok(format!("{category} reset."))
    }
}

pub struct TopAction;

#[async_trait]
impl Action for TopAction {
    fn spec(&self) -> &'static ActionSpec {
        &TOP
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let category = inv.args.trim();
        if category.is_empty() {
            return Ok(tracked_categories(ctx));
        }
        let Some(top) = ctx.counters.top(category, 10) else {
            return Ok(format!(
                "I don't keep track of that.\n{}",
                tracked_categories(ctx)
            ));
        };
        let separator = if category == "replies" { "\n" } else { ", " };
        Ok(top
            .iter()
            .map(|(label, n)| format!("{label} ({n})"))
            .collect::<Vec<_>>()
            .join(separator))
    }
}

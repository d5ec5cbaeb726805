//! Informational commands answered from the bot's own state.

use super::traits::{Action, ActionContext, ActionError, ActionSpec, Invocation};
use crate::agent::phrases::{self, DONTKNOW};
use crate::channels::traits::BackendKind;
use crate::util::static_regex;
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

const PROJECT_URL: &str = "https://github.com/chanbot/chanbot";

static CHANNELS: ActionSpec = ActionSpec {
    name: "channels",
    help: "display channels I'm in",
    how: "built in, from the channel store",
    usage: "!channels",
    aliases: &[],
};

static CURSES: ActionSpec = ActionSpec {
    name: "curses",
    help: "check your curse count",
    how: "built in, from per-user activity",
    usage: "!curses [<user>|#<channel>|*]",
    aliases: &[],
};

static HELP: ActionSpec = ActionSpec {
    name: "help",
    help: "display this help",
    how: "built in",
    usage: "!help [all|<command>]",
    aliases: &["?", "commands", "hlp"],
};

static HOW: ActionSpec = ActionSpec {
    name: "how",
    help: "show how a command is implemented",
    how: "built in",
    usage: "!how <command>",
    aliases: &[],
};

static INSULT: ActionSpec = ActionSpec {
    name: "insult",
    help: "insult somebody",
    how: "an Elizabethan insult kit: one word from each of three columns",
    usage: "!insult <somebody>",
    aliases: &[],
};

static SEEN: ActionSpec = ActionSpec {
    name: "seen",
    help: "show last time <user> was seen in <channel>",
    how: "built in, from per-user activity",
    usage: "!seen <user> [<channel>]",
    aliases: &[],
};

static TRIVIA: ActionSpec = ActionSpec {
    name: "trivia",
    help: "show a random piece of trivia",
    how: "a random line from the configured trivia_url",
    usage: "!trivia",
    aliases: &[],
};

// ── help / how ──────────────────────────────────────────────────

pub struct HelpAction;

#[async_trait]
impl Action for HelpAction {
    fn spec(&self) -> &'static ActionSpec {
        &HELP
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        Ok(help_text(ctx, inv.args.trim()))
    }
}

/// Help for `!help <args>`; also what an unknown `!name` gets.
pub fn help_text(ctx: &ActionContext<'_>, args: &str) -> String {
    let registry = ctx.registry;
    if args == "all" {
        return format!(
            "These are commands I know:\n{}",
            registry.names().join(", ")
        );
    }
    if args.is_empty() {
        return format!(
            "I know {} commands.\n\
             Use '!help all' to show all commands.\n\
             Ask me about a specific command via '!help <cmd>'.\n\
             If you find me annoyingly chatty, just '!toggle chatter'.\n\
             To ask me to leave a channel, say '!leave'.\n",
            registry.len()
        );
    }

    let wanted = args.split_whitespace().next().unwrap_or(args).to_lowercase();
    let wanted = wanted.trim_start_matches('!');
    let Some(entry) = registry
        .resolve(wanted, wanted)
        .filter(|r| r.args.is_none())
        .and_then(|r| registry.get(r.name))
    else {
        return format!("No such command: {wanted}. Try '!help'.");
    };

    let spec = entry.spec;
    let mut text = format!("{}: {}. Usage:\n{}", spec.name, spec.help, spec.usage);
    if !spec.aliases.is_empty() {
        let aliases: Vec<String> = spec.aliases.iter().map(|a| format!("'!{a}'")).collect();
        text.push_str(&format!(
            "\nThis command can also be invoked as: {}.",
            aliases.join(", ")
        ));
    }
    text
}

pub struct HowAction;

#[async_trait]
impl Action for HowAction {
    fn spec(&self) -> &'static ActionSpec {
        &HOW
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let wanted = inv.args.trim().to_lowercase();
        if wanted.is_empty() {
            return Err(ActionError::usage(&HOW));
        }
        if let Some(entry) = ctx
            .registry
            .resolve(&wanted, &wanted)
            .filter(|r| r.args.is_none())
            .and_then(|r| ctx.registry.get(r.name))
        {
            return Ok(entry.spec.how.to_string());
        }
        if ctx.is_bot(&wanted) {
            return Ok(PROJECT_URL.to_string());
        }
        Ok(phrases::random(DONTKNOW).to_string())
    }
}

// ── channels ────────────────────────────────────────────────────

pub struct ChannelsAction;

#[async_trait]
impl Action for ChannelsAction {
    fn spec(&self) -> &'static ActionSpec {
        &CHANNELS
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        _inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let by_backend = ctx.store.names_by_backend();
        if by_backend.is_empty() {
            return Ok("I'm not currently in any channels.".into());
        }
        let sections: Vec<String> = [BackendKind::HipChat, BackendKind::Slack]
            .into_iter()
            .filter_map(|kind| {
                let names = by_backend.get(&kind)?;
                Some(format!(
                    "I'm in the following {} {} channels:\n{}",
                    names.len(),
                    kind.label(),
                    names.join(", ")
                ))
            })
            .collect();
        Ok(sections.join("\n"))
    }
}

// ── seen / curses ───────────────────────────────────────────────

fn slack_channel_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"(?i)^<#[A-Z0-9]+\|([^>]+)>$"))
}

/// Channel name from `#name`, `name` or Slack's `<#C123|name>`.
pub fn channel_argument(raw: &str) -> String {
    if let Some(caps) = slack_channel_ref_re().captures(raw) {
        return caps[1].to_string();
    }
    raw.trim_start_matches('#').to_string()
}

pub struct SeenAction;

const INVISIBLE: &[&str] = &[
    "You can't see me, I'm not really here.",
    "_is invisible._",
    "_looked, but only saw its shadow._",
    "Wed Dec 31 19:00:00 EST 1969",
];

#[async_trait]
impl Action for SeenAction {
    fn spec(&self) -> &'static ActionSpec {
        &SEEN
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let mut words = inv.args.split_whitespace();
        let user = words.next().unwrap_or("").trim_start_matches('@');
        let explicit_channel = words.next().map(channel_argument);

        if !user.is_empty() && ctx.is_bot(user) {
            return Ok(phrases::random(INVISIBLE).to_string());
        }

        let channel_name = explicit_channel.as_deref().unwrap_or(inv.channel);
        let Some(channel) = ctx.store.get(channel_name) else {
            return Ok(match explicit_channel {
                Some(name) => format!("I'm not currently in #{name}"),
                None => "Ask me about a user in a channel.".into(),
            });
        };

        if user.is_empty() {
            return Err(ActionError::usage(&SEEN));
        }

        match channel.users.get(user).and_then(|info| info.seen) {
            Some(seen) => Ok(seen.format("%a %b %e %H:%M:%S UTC %Y").to_string()),
            None => Ok(format!("I have not seen that user in #{}.", channel.name)),
        }
    }
}

pub struct CursesAction;

fn format_tally(tally: &BTreeMap<String, u64>, limit: usize) -> String {
    let mut sorted: Vec<(&String, &u64)> = tally.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    sorted
        .into_iter()
        .take(limit)
        .map(|(word, n)| format!("{word} ({n})"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Action for CursesAction {
    fn spec(&self) -> &'static ActionSpec {
        &CURSES
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        const NONE_YET: &str = "I have not seen any curses yet!";
        let wanted = inv.args.split_whitespace().next().unwrap_or("");

        if wanted.is_empty() {
            let tally = ctx.counters.get("curses").unwrap_or_default();
            if tally.is_empty() {
                return Ok(NONE_YET.into());
            }
            return Ok(format_tally(&tally, 10));
        }

        if wanted == "*" {
            let tally = ctx.counters.get("cursers").unwrap_or_default();
            if tally.is_empty() {
                return Ok(NONE_YET.into());
            }
            return Ok(format_tally(&tally, 6));
        }

        if wanted.starts_with('#') || wanted.starts_with("<#") {
            let name = channel_argument(wanted);
            let Some(channel) = ctx.store.get(&name) else {
                return Ok(format!("I don't know anything about #{name}."));
            };
            let mut tally = BTreeMap::new();
            for info in channel.users.values() {
                for (word, n) in &info.curse_words {
                    *tally.entry(word.clone()).or_insert(0) += n;
                }
            }
            if tally.is_empty() {
                return Ok(format!(
                    "Looks like #{name} has been behaving since I started paying attention..."
                ));
            }
            return Ok(format_tally(&tally, 10));
        }

        let user = wanted.trim_start_matches('@');
        let mut tally = BTreeMap::new();
        for (_, info) in ctx.store.user_everywhere(user) {
            for (word, n) in info.curse_words {
                *tally.entry(word).or_insert(0) += n;
            }
        }
        if tally.is_empty() {
            return Ok(format!(
                "Looks like {user} has been behaving since I started paying attention..."
            ));
        }
        Ok(format_tally(&tally, 10))
    }
}

// ── insult / trivia ─────────────────────────────────────────────

const INSULT_FIRST: &[&str] = &[
    "artless", "bawdy", "beslubbering", "bootless", "churlish", "cockered", "clouted",
    "craven", "currish", "dankish", "dissembling", "droning", "errant", "fawning",
    "fobbing", "froward", "frothy", "gleeking", "goatish", "gorbellied", "impertinent",
    "infectious", "jarring", "loggerheaded", "lumpish", "mammering", "mangled",
    "mewling", "paunchy", "pribbling", "puking", "puny", "qualling", "rank", "reeky",
    "roguish", "ruttish", "saucy", "spleeny", "spongy", "surly", "tottering",
    "unmuzzled", "vain", "venomed", "villainous", "warped", "wayward", "weedy", "yeasty",
];

const INSULT_SECOND: &[&str] = &[
    "base-court", "bat-fowling", "beef-witted", "beetle-headed", "boil-brained",
    "clapper-clawed", "clay-brained", "common-kissing", "crook-pated", "dismal-dreaming",
    "dizzy-eyed", "doghearted", "dread-bolted", "earth-vexing", "elf-skinned",
    "fat-kidneyed", "fen-sucked", "flap-mouthed", "fly-bitten", "folly-fallen",
    "fool-born", "full-gorged", "guts-griping", "half-faced", "hasty-witted",
    "hedge-born", "hell-hated", "idle-headed", "ill-breeding", "ill-nurtured",
    "knotty-pated", "milk-livered", "motley-minded", "onion-eyed", "plume-plucked",
    "pottle-deep", "pox-marked", "reeling-ripe", "rough-hewn", "rude-growing",
    "rump-fed", "shard-borne", "sheep-biting", "spur-galled", "swag-bellied",
    "tardy-gaited", "tickle-brained", "toad-spotted", "unchin-snouted", "weather-bitten",
];

const INSULT_THIRD: &[&str] = &[
    "apple-john", "baggage", "barnacle", "bladder", "boar-pig", "bugbear", "bum-bailey",
    "canker-blossom", "clack-dish", "clotpole", "coxcomb", "codpiece", "death-token",
    "dewberry", "flap-dragon", "flax-wench", "flirt-gill", "foot-licker", "fustilarian",
    "giglet", "gudgeon", "haggard", "harpy", "hedge-pig", "horn-beast", "hugger-mugger",
    "joithead", "lewdster", "lout", "maggot-pie", "malt-worm", "mammet", "measle",
    "minnow", "miscreant", "moldwarp", "mumble-news", "nut-hook", "pigeon-egg",
    "pignut", "puttock", "pumpion", "ratsbane", "scut", "skainsmate", "strumpet",
    "varlot", "vassal", "whey-face", "wagtail",
];

/// A fresh Elizabethan insult.
pub fn elizabethan_insult<R: Rng + ?Sized>(rng: &mut R) -> String {
    let first = phrases::pick(rng, INSULT_FIRST);
    let article = if first.starts_with(['a', 'e', 'i', 'o', 'u']) {
        "an"
    } else {
        "a"
    };
    format!(
        "Thou art {article} {first} {} {}!",
        phrases::pick(rng, INSULT_SECOND),
        phrases::pick(rng, INSULT_THIRD)
    )
}

pub struct InsultAction;

#[async_trait]
impl Action for InsultAction {
    fn spec(&self) -> &'static ActionSpec {
        &INSULT
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        let target = inv.args.trim();
        let prefix = if target.is_empty() {
            String::new()
        } else if ctx.is_bot(target) || target == "me" || target == "yourself" {
            format!("@{}: ", inv.recipient.mention_name)
        } else {
            format!("{target}: ")
        };
        let label = if prefix.is_empty() {
            inv.recipient.mention_name.as_str()
        } else {
            prefix.trim_end_matches(": ").trim_start_matches('@')
        };
        ctx.counters.increment("insulted", label);
        let insult = elizabethan_insult(&mut rand::thread_rng());
        Ok(format!("{prefix}{insult}"))
    }
}

pub struct TriviaAction;

/// One random non-empty line of a plain-text document.
pub async fn random_line_from_url(
    http: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
) -> Result<Option<String>, ActionError> {
    let body = http
        .get(url)
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
    Ok(Some(phrases::pick(&mut rand::thread_rng(), &lines).to_string()).filter(|l| !l.is_empty()))
}

#[async_trait]
impl Action for TriviaAction {
    fn spec(&self) -> &'static ActionSpec {
        &TRIVIA
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        inv: Invocation<'_>,
    ) -> Result<String, ActionError> {
        if !inv.args.trim().is_empty() {
            return Err(ActionError::usage(&TRIVIA));
        }
        let url = ctx
            .config
            .trivia_url
            .as_deref()
            .ok_or(ActionError::NotConfigured("trivia_url"))?;
        let line = random_line_from_url(ctx.http, url, ctx.config.http_timeout_secs).await?;
        Ok(line.unwrap_or_else(|| "I don't know any trivia right now.".into()))
    }
}

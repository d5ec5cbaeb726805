//! Decides what an inbound line is: a command invocation, directed chatter,
//! or ambient chatter, and picks apart the pieces each path needs.

use crate::util::static_regex;
use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

/// How an inbound line should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The line invoked a command. `invocation` is the matched prefix
    /// (`!`, `@bot `, ...), `body` the rest.
    Command { invocation: String, body: String },
    /// Everything else.
    Chatter(Address),
}

/// How directly a chatter line addresses the bot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Address {
    /// The bot's name appears as a whole word.
    pub for_us: bool,
    /// The bot is addressed: at the start, at the end, before punctuation,
    /// or by explicit `@name` / native mention token.
    pub mentioned: bool,
}

impl Address {
    /// Whether conversational (non-ambient) replies may fire.
    pub fn conversational(self, chatter_on: bool) -> bool {
        self.for_us || (chatter_on && self.mentioned)
    }
}

/// Command name and argument text pulled out of a command body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Lowercased command name, or empty for a bare invocation.
    pub name: String,
    /// The name as typed, for pattern rules that keep the user's casing.
    pub raw_name: String,
    pub args: String,
}

/// Pattern set bound to one bot identity on one backend.
#[derive(Debug)]
pub struct Classifier {
    mention_name: String,
    native_token: Option<String>,
    invocation: Regex,
    leading_mention: Regex,
    for_us: Regex,
    mentioned: Regex,
    chatter_leave: Regex,
    insult_request: Regex,
    insults: Vec<Regex>,
}

impl Classifier {
    pub fn new(mention_name: &str, native_token: Option<&str>) -> Result<Self> {
        let m = regex::escape(mention_name);
        let native = native_token.map(regex::escape);
        let any_mention = match &native {
            Some(token) => format!(r"(?:@?{m}\b|{token})"),
            None => format!(r"(?:@?{m}\b)"),
        };

        let invocation = match &native {
            Some(token) => format!(r"(?i)^(!|[@/]{m}:? +[/!]?|{token}:? *[/!]?)"),
            None => format!(r"(?i)^(!|[@/]{m}:? +[/!]?)"),
        };
        let for_us = match &native {
            Some(token) => format!(r"(?i)(\b@?{m}\b|{token})"),
            None => format!(r"(?i)\b@?{m}\b"),
        };
        let mentioned = format!(
            r"(?i)(^( *|yo,? ?|hey,? ?){m}[,:]?)|(,? *{m} *[.?!]?$)|(.* *{m} *[.?!].*)"
        );

        let build = |pattern: String| {
            Regex::new(&pattern).with_context(|| format!("Invalid mention pattern: {pattern}"))
        };

        let insult_sources = [
            format!(r"fu[, ]@?{m}"),
            format!(r"@?{m} su(cks|x)"),
            r"asshole|bitch|dickhead".to_string(),
            r"dam+n? (yo)?u".to_string(),
            format!(r"(be )?quiet @?{m}"),
            r"shut ?(the fuck )?up".to_string(),
            r"(screw|fuck) (yo)?u".to_string(),
            r"(piss|bugger) ?off".to_string(),
            r"fuck (off|(yo)?u)".to_string(),
            r"(yo)?u (suck|blow|are ((very|so+) )?(useless|lame|dumb|stupid|stink))".to_string(),
            r"(stfu|go to hell)".to_string(),
            format!(r"{m} is (stupid|dumb|annoying|lame|boring|useless)"),
            format!(r"(stupid|annoying|lame|boring|useless) +({m}|bot)"),
            format!(r"(blame )?({m}|the bot)('?s fault)"),
        ];
        let insults = insult_sources
            .into_iter()
            .map(|p| build(format!("(?i){p}")))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            mention_name: mention_name.to_string(),
            native_token: native_token.map(str::to_string),
            invocation: build(invocation)?,
            leading_mention: build(format!(r"(?i)^{any_mention}[,:]? *"))?,
            for_us: build(for_us)?,
            mentioned: build(mentioned)?,
            chatter_leave: build(format!(
                r"(?i)^({any_mention}[,:]? *)(please )?leave|(please )?leave[,:]? {any_mention}"
            ))?,
            insult_request: build(format!(
                r"(?i)^({any_mention}[,:]? *)(please )?insult +(?P<target>.+)$"
            ))?,
            insults,
        })
    }

    pub fn mention_name(&self) -> &str {
        &self.mention_name
    }

    pub fn native_token(&self) -> Option<&str> {
        self.native_token.as_deref()
    }

    /// Split a line into command or chatter.
    pub fn classify(&self, text: &str) -> Classification {
        if let Some(m) = self.invocation.find(text) {
            return Classification::Command {
                invocation: m.as_str().trim().to_string(),
                body: text[m.end()..].trim().to_string(),
            };
        }
        Classification::Chatter(self.address(text))
    }

    pub fn address(&self, text: &str) -> Address {
        let explicit = text
            .to_lowercase()
            .contains(&format!("@{}", self.mention_name.to_lowercase()))
            || self
                .native_token
                .as_deref()
                .is_some_and(|token| text.contains(token));
        Address {
            for_us: self.for_us.is_match(text),
            mentioned: explicit || self.mentioned.is_match(text),
        }
    }

    /// Break a command body into name and arguments, dropping a repeated
    /// leading mention (`!bot ping` reads as `ping`).
    pub fn command_line(&self, body: &str) -> CommandLine {
        let body = self.leading_mention.replace(body.trim(), "");
        let body = body.trim();
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        CommandLine {
            name: name.to_lowercase(),
            raw_name: name.to_string(),
            args: args.to_string(),
        }
    }

    /// A chatter line asking the bot to leave. Yields whether it said "please".
    pub fn chatter_leave(&self, text: &str) -> Option<bool> {
        self.chatter_leave
            .is_match(text)
            .then(|| text.to_lowercase().contains("please"))
    }

    /// Target of a chatter-style `bot, insult <who>` request.
    pub fn insult_request(&self, text: &str) -> Option<String> {
        self.insult_request
            .captures(text)
            .and_then(|c| c.name("target"))
            .map(|m| m.as_str().trim().to_string())
    }

    /// The line insults the bot.
    pub fn was_insult(&self, text: &str) -> bool {
        self.insults.iter().any(|re| re.is_match(text))
    }
}

fn command_leave_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"(?i)^(please )?leave\b(,? please)?"))
}

fn curse_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"(?i)(shit|motherfucker|piss|f+u+c+k+|cunt|cocksucker|tits)"))
}

fn punctuation_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"^[[:punct:]]+$"))
}

/// A command body that asks the bot to leave. No politeness needed here.
pub fn is_command_leave(body: &str) -> bool {
    command_leave_re().is_match(body)
}

/// Command names made only of punctuation (`!!!`, `!?`) are noise.
pub fn is_noise(name: &str) -> bool {
    punctuation_only_re().is_match(name)
}

/// Curse words in a line, lowercased, one entry per occurrence.
pub fn curse_words(text: &str) -> Vec<String> {
    curse_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Lines a message counts for in activity stats.
pub fn line_count(text: &str) -> u64 {
    let lines = u64::try_from(text.lines().count().max(1)).unwrap_or(u64::MAX);
    if lines > 1 {
        lines - 1
    } else {
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new("bot", Some("<@U0BOT>")).unwrap()
    }

    #[test]
    fn bang_command_splits_name_and_args() {
        let c = classifier();
        let Classification::Command { invocation, body } = c.classify("!ping host") else {
            panic!("expected command");
        };
        assert_eq!(invocation, "!");
        let line = c.command_line(&body);
        assert_eq!(line.name, "ping");
        assert_eq!(line.args, "host");
    }

    #[test]
    fn mention_prefix_invokes_commands() {
        let c = classifier();
        for text in ["@bot !help all", "@bot /help all", "<@U0BOT> help all", "@bot: help all"] {
            let Classification::Command { body, .. } = c.classify(text) else {
                panic!("expected command for {text}");
            };
            let line = c.command_line(&body);
            assert_eq!(line.name, "help", "{text}");
            assert_eq!(line.args, "all", "{text}");
        }
    }

    #[test]
    fn command_name_is_lowercased_args_are_not() {
        let c = classifier();
        let line = c.command_line("JIRA ABC-123");
        assert_eq!(line.name, "jira");
        assert_eq!(line.raw_name, "JIRA");
        assert_eq!(line.args, "ABC-123");
    }

    #[test]
    fn empty_body_yields_empty_name() {
        let c = classifier();
        let Classification::Command { body, .. } = c.classify("!") else {
            panic!("expected command");
        };
        assert_eq!(c.command_line(&body).name, "");
    }

    #[test]
    fn mentioned_chatter_is_eligible() {
        let c = classifier();
        let Classification::Chatter(address) = c.classify("hey @bot how are you") else {
            panic!("expected chatter");
        };
        assert!(address.mentioned);
        assert!(address.conversational(true));
    }

    #[test]
    fn plain_chatter_is_ambient_only() {
        let c = classifier();
        let Classification::Chatter(address) = c.classify("hey") else {
            panic!("expected chatter");
        };
        assert!(!address.for_us);
        assert!(!address.mentioned);
        assert!(!address.conversational(true));
    }

    #[test]
    fn name_at_end_or_before_punctuation_counts_as_mentioned() {
        let c = classifier();
        assert!(c.address("thanks, bot").mentioned);
        assert!(c.address("bot? are you there").mentioned);
        assert!(c.address("yo <@U0BOT>").mentioned);
        assert!(!c.address("robotics is fun").for_us);
    }

    #[test]
    fn for_us_alone_is_enough_even_without_chatter() {
        let address = Address {
            for_us: true,
            mentioned: false,
        };
        assert!(address.conversational(false));
        let address = Address {
            for_us: false,
            mentioned: true,
        };
        assert!(!address.conversational(false));
    }

    #[test]
    fn chatter_leave_requires_please_to_be_reported() {
        let c = classifier();
        assert_eq!(c.chatter_leave("bot, leave"), Some(false));
        assert_eq!(c.chatter_leave("bot please leave"), Some(true));
        assert_eq!(c.chatter_leave("please leave @bot"), Some(true));
        assert_eq!(c.chatter_leave("i will leave now"), None);
    }

    #[test]
    fn command_leave_matches_polite_forms() {
        assert!(is_command_leave("leave"));
        assert!(is_command_leave("please leave"));
        assert!(is_command_leave("leave, please"));
        assert!(!is_command_leave("leaves"));
        assert!(!is_command_leave("set status=on leave"));
        assert!(!is_command_leave("seen alice leave"));
    }

    #[test]
    fn insult_request_extracts_target() {
        let c = classifier();
        assert_eq!(c.insult_request("bot, insult alice").as_deref(), Some("alice"));
        assert_eq!(c.insult_request("@bot please insult the build"), Some("the build".into()));
        assert!(c.insult_request("insult alice").is_none());
    }

    #[test]
    fn detects_insults_aimed_at_the_bot() {
        let c = classifier();
        assert!(c.was_insult("bot sucks"));
        assert!(c.was_insult("shut up"));
        assert!(c.was_insult("it's the bot's fault"));
        assert!(c.was_insult("bot is useless"));
        assert!(!c.was_insult("the deploy sucks"));
    }

    #[test]
    fn punctuation_only_names_are_noise() {
        assert!(is_noise("!!!"));
        assert!(is_noise("?"));
        assert!(!is_noise("help"));
        assert!(!is_noise("h!"));
    }

    #[test]
    fn curses_are_collected_per_occurrence() {
        assert_eq!(
            curse_words("Shit, this FUUUCK and shit"),
            vec!["shit", "fuuuck", "shit"]
        );
        assert!(curse_words("all good").is_empty());
    }

    #[test]
    fn line_counting() {
        assert_eq!(line_count("one"), 1);
        assert_eq!(line_count(""), 1);
        assert_eq!(line_count("a\nb\nc"), 2);
    }
}

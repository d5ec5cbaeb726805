//! Static command table plus the resolver that maps what a user typed to a
//! registered command.

use super::traits::{Action, ActionSpec};
use super::{admin, builtin, lookup, process};
use crate::util::static_regex;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Documented but handled by the dispatcher itself.
pub static LEAVE: ActionSpec = ActionSpec {
    name: "leave",
    help: "cause me to leave the current channel",
    how: "built in",
    usage: "!leave",
    aliases: &[],
};

/// A registered command. No handler means the dispatcher treats it specially.
#[derive(Clone)]
pub struct Entry {
    pub spec: &'static ActionSpec,
    pub handler: Option<Arc<dyn Action>>,
}

/// Outcome of resolving a typed command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub name: &'static str,
    /// Set when a pattern rule synthesized the argument from the name.
    pub args: Option<String>,
}

#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<&'static str, Entry>,
    aliases: BTreeMap<&'static str, &'static str>,
}

fn cm_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"(?i)^cmr?([0-9]+)$"))
}

fn jira_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"(?i)^([a-z]+-[0-9]+)$"))
}

fn incident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"(?i)^inc([0-9]+)$"))
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command the bot ships with.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let actions: Vec<Arc<dyn Action>> = vec![
            Arc::new(builtin::ChannelsAction),
            Arc::new(builtin::CursesAction),
            Arc::new(builtin::HelpAction),
            Arc::new(builtin::HowAction),
            Arc::new(builtin::InsultAction),
            Arc::new(builtin::SeenAction),
            Arc::new(builtin::TriviaAction),
            Arc::new(admin::ResetAction),
            Arc::new(admin::SetAction),
            Arc::new(admin::ThrottleAction),
            Arc::new(admin::ToggleAction),
            Arc::new(admin::TopAction),
            Arc::new(admin::UnsetAction),
            Arc::new(admin::UnthrottleAction),
            Arc::new(process::CowsayAction),
            Arc::new(process::FortuneAction),
            Arc::new(process::HostAction),
            Arc::new(process::PingAction),
            Arc::new(process::WhoisAction),
            Arc::new(lookup::CmAction),
            Arc::new(lookup::JiraAction),
            Arc::new(lookup::SnAction),
        ];
        for action in actions {
            registry.register(action);
        }
        registry.register_documented(&LEAVE);
        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        let spec = action.spec();
        self.insert(spec, Some(action));
    }

    /// A command that only exists for `!help`.
    pub fn register_documented(&mut self, spec: &'static ActionSpec) {
        self.insert(spec, None);
    }

    fn insert(&mut self, spec: &'static ActionSpec, handler: Option<Arc<dyn Action>>) {
        for alias in spec.aliases {
            self.aliases.insert(*alias, spec.name);
        }
        self.entries.insert(spec.name, Entry { spec, handler });
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map a typed name to a command: exact name, then alias, then the
    /// ticket shorthands. `name` is lowercased; `raw` is as typed.
    pub fn resolve(&self, name: &str, raw: &str) -> Option<Resolved> {
        if let Some((key, _)) = self.entries.get_key_value(name) {
            return Some(Resolved {
                name: *key,
                args: None,
            });
        }
        if let Some(target) = self.aliases.get(name) {
            return Some(Resolved {
                name: *target,
                args: None,
            });
        }

        let shorthand = |command: &'static str, re: &Regex, text: &str| {
            let caps = re.captures(text)?;
            let (key, _) = self.entries.get_key_value(command)?;
            Some(Resolved {
                name: *key,
                args: Some(caps[1].to_string()),
            })
        };

        shorthand("cm", cm_re(), raw)
            .or_else(|| shorthand("jira", jira_re(), raw))
            .or_else(|| shorthand("sn", incident_re(), raw))
    }
}

use crate::config::{ActionsConfig, BotConfig};

/// Why an argument was refused for a local utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentRejection {
    Empty,
    /// Would be read as an option by the program.
    LooksLikeFlag,
    /// Contains shell metacharacters, control characters or whitespace.
    UnsafeCharacters,
}

/// Privilege and execution policy for actions.
///
/// There is exactly one privileged user, the owner. Local utilities run only
/// if listed, with arguments passed as discrete argv entries.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub owner: String,
    pub allowed_programs: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            owner: String::new(),
            allowed_programs: ActionsConfig::default().allowed_programs,
        }
    }
}

impl SecurityPolicy {
    /// Build from config sections
    pub fn from_config(bot: &BotConfig, actions: &ActionsConfig) -> Self {
        Self {
            owner: bot.owner.trim_start_matches('@').to_string(),
            allowed_programs: actions.allowed_programs.clone(),
        }
    }

    /// Owner check by mention handle. An unset owner matches nobody.
    pub fn is_owner(&self, mention_name: &str) -> bool {
        !self.owner.is_empty()
            && self
                .owner
                .eq_ignore_ascii_case(mention_name.trim_start_matches('@'))
    }

    /// Check a program name (or path) against the allow-list by its basename.
    pub fn is_program_allowed(&self, program: &str) -> bool {
        let base = program.rsplit('/').next().unwrap_or("");
        !base.is_empty() && self.allowed_programs.iter().any(|p| p == base)
    }

    /// Vet one user-supplied argument for a local utility.
    ///
    /// Arguments never pass through a shell, but a leading `-` would still be
    /// taken as an option, and metacharacters have no business in hostnames
    /// or domain names.
    pub fn validate_argument(arg: &str) -> Result<(), ArgumentRejection> {
        if arg.is_empty() {
            return Err(ArgumentRejection::Empty);
        }
        if arg.starts_with('-') {
            return Err(ArgumentRejection::LooksLikeFlag);
        }
        let unsafe_char = |c: char| {
            c.is_control()
                || c.is_whitespace()
                || matches!(
                    c,
                    '`' | '$' | ';' | '|' | '&' | '>' | '<' | '(' | ')' | '\\' | '"' | '\''
                )
        };
        if arg.chars().any(unsafe_char) {
            return Err(ArgumentRejection::UnsafeCharacters);
        }
        Ok(())
    }

    /// Hostnames, domains and IP literals: letters, digits, `.`, `-`, `:`, `_`.
    pub fn is_valid_host(arg: &str) -> bool {
        Self::validate_argument(arg).is_ok()
            && arg.len() <= 253
            && arg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_'))
    }
}

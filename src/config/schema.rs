use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where this config was loaded from (not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub bot: BotConfig,

    #[serde(default)]
    pub hipchat: Option<HipChatConfig>,

    #[serde(default)]
    pub slack: Option<SlackConfig>,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub throttle: ThrottleConfig,

    #[serde(default)]
    pub actions: ActionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config.toml"),
            bot: BotConfig::default(),
            hipchat: None,
            slack: None,
            state: StateConfig::default(),
            reliability: ReliabilityConfig::default(),
            throttle: ThrottleConfig::default(),
            actions: ActionsConfig::default(),
        }
    }
}

// ── Bot identity ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// How the bot presents itself (HipChat nickname).
    #[serde(default = "default_full_name")]
    pub full_name: String,
    /// The handle the bot answers to, without a leading `@`.
    #[serde(default = "default_mention_name")]
    pub mention_name: String,
    /// Mention handle of the single privileged operator.
    #[serde(default)]
    pub owner: String,
}

fn default_full_name() -> String {
    "Chan Bot".into()
}

fn default_mention_name() -> String {
    "chanbot".into()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            full_name: default_full_name(),
            mention_name: default_mention_name(),
            owner: String::new(),
        }
    }
}

// ── Backends ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HipChatConfig {
    #[serde(default = "default_hipchat_api_url")]
    pub api_url: String,
    pub token: String,
    /// Rooms to join on startup if they are not in the saved state yet.
    #[serde(default)]
    pub rooms: Vec<String>,
    /// Users whose 1:1 history is polled for private commands.
    #[serde(default)]
    pub direct_users: Vec<String>,
    #[serde(default = "default_hipchat_poll_secs")]
    pub poll_interval_secs: u64,
}

fn default_hipchat_api_url() -> String {
    "https://api.hipchat.com".into()
}

fn default_hipchat_poll_secs() -> u64 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`) for the Web API.
    pub bot_token: String,
    /// App-level token (`xapp-...`) for Socket Mode.
    pub app_token: String,
}

// ── State files ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_channels_file")]
    pub channels_file: String,
    #[serde(default = "default_counters_file")]
    pub counters_file: String,
}

fn default_channels_file() -> String {
    "~/.chanbot/state/channels.json".into()
}

fn default_counters_file() -> String {
    "~/.chanbot/state/counters.json".into()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            channels_file: default_channels_file(),
            counters_file: default_counters_file(),
        }
    }
}

impl StateConfig {
    pub fn channels_path(&self) -> PathBuf {
        expand_path(&self.channels_file)
    }

    pub fn counters_path(&self) -> PathBuf {
        expand_path(&self.counters_file)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

// ── Reliability / supervision ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Initial backoff for backend session restarts.
    #[serde(default = "default_channel_backoff_secs")]
    pub channel_initial_backoff_secs: u64,
    /// Max backoff for backend session restarts.
    #[serde(default = "default_channel_backoff_max_secs")]
    pub channel_max_backoff_secs: u64,
    /// Period of the persistence tick.
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,
    /// Refresh backend channel directories every N persistence ticks.
    #[serde(default = "default_directory_refresh_ticks")]
    pub directory_refresh_ticks: u64,
    /// A chatty backend silent for this many persistence ticks is presumed dead.
    #[serde(default = "default_liveness_checks")]
    pub liveness_checks: u64,
}

fn default_channel_backoff_secs() -> u64 {
    2
}

fn default_channel_backoff_max_secs() -> u64 {
    60
}

fn default_persist_interval_secs() -> u64 {
    60
}

fn default_directory_refresh_ticks() -> u64 {
    30
}

fn default_liveness_checks() -> u64 {
    30
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            channel_initial_backoff_secs: default_channel_backoff_secs(),
            channel_max_backoff_secs: default_channel_backoff_max_secs(),
            persist_interval_secs: default_persist_interval_secs(),
            directory_refresh_ticks: default_directory_refresh_ticks(),
            liveness_checks: default_liveness_checks(),
        }
    }
}

impl ReliabilityConfig {
    pub fn liveness_threshold_secs(&self) -> u64 {
        self.liveness_checks
            .saturating_mul(self.persist_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_throttle_secs")]
    pub default_secs: u64,
}

fn default_throttle_secs() -> u64 {
    1800
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            default_secs: default_throttle_secs(),
        }
    }
}

// ── Actions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// Wall-clock limit for local utilities before they are killed.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Request timeout for third-party HTTP lookups.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_allowed_programs")]
    pub allowed_programs: Vec<String>,
    #[serde(default)]
    pub jira_url: Option<String>,
    #[serde(default)]
    pub jira_user: Option<String>,
    #[serde(default)]
    pub jira_password: Option<String>,
    /// Change-management lookup; `{id}` is replaced with the ticket number.
    #[serde(default)]
    pub cm_url: Option<String>,
    /// Incident lookup; `{id}` is replaced with the incident number.
    #[serde(default)]
    pub sn_url: Option<String>,
    /// Plain-text file served over HTTP, one factlet per line.
    #[serde(default)]
    pub trivia_url: Option<String>,
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_allowed_programs() -> Vec<String> {
    vec![
        "cowsay".into(),
        "fortune".into(),
        "host".into(),
        "ping".into(),
        "whois".into(),
    ]
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            allowed_programs: default_allowed_programs(),
            jira_url: None,
            jira_user: None,
            jira_password: None,
            cm_url: None,
            sn_url: None,
            trivia_url: None,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Config {
    /// Load `~/.chanbot/config.toml`, writing a default one if none exists.
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        Self::load_or_init_at(&home.join(".chanbot").join("config.toml"))
    }

    pub fn load_or_init_at(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let contents =
                fs::read_to_string(config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.to_path_buf();
            config
        } else {
            let mut config = Config::default();
            config.config_path = config_path.to_path_buf();
            config.save()?;
            tracing::info!("Wrote default config to {}", config_path.display());
            config
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(owner) = std::env::var("CHANBOT_OWNER") {
            if !owner.is_empty() {
                self.bot.owner = owner;
            }
        }

        if let Ok(token) = std::env::var("CHANBOT_HIPCHAT_TOKEN") {
            if !token.is_empty() {
                if let Some(hc) = self.hipchat.as_mut() {
                    hc.token = token;
                }
            }
        }

        let slack_bot = std::env::var("CHANBOT_SLACK_BOT_TOKEN").ok();
        let slack_app = std::env::var("CHANBOT_SLACK_APP_TOKEN").ok();
        if let (Some(bot_token), Some(app_token)) = (&slack_bot, &slack_app) {
            if self.slack.is_none() && !bot_token.is_empty() && !app_token.is_empty() {
                self.slack = Some(SlackConfig {
                    bot_token: bot_token.clone(),
                    app_token: app_token.clone(),
                });
            }
        }
        if let Some(slack) = self.slack.as_mut() {
            if let Some(token) = slack_bot.filter(|t| !t.is_empty()) {
                slack.bot_token = token;
            }
            if let Some(token) = slack_app.filter(|t| !t.is_empty()) {
                slack.app_token = token;
            }
        }

        if let Ok(dir) = std::env::var("CHANBOT_STATE_DIR") {
            if !dir.is_empty() {
                let dir = dir.trim_end_matches('/');
                self.state.channels_file = format!("{dir}/channels.json");
                self.state.counters_file = format!("{dir}/counters.json");
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        crate::util::write_atomic(&self.config_path, toml_str.as_bytes())
            .context("Failed to write config file")
    }

    pub fn has_backends(&self) -> bool {
        self.hipchat.is_some() || self.slack.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.throttle.default_secs, 1800);
        assert_eq!(config.reliability.persist_interval_secs, 60);
        assert_eq!(config.reliability.liveness_threshold_secs(), 1800);
        assert_eq!(config.actions.command_timeout_secs, 30);
        assert!(config.actions.allowed_programs.contains(&"whois".to_string()));
        assert!(!config.has_backends());
    }

    #[test]
    fn load_or_init_writes_default_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");

        let config = Config::load_or_init_at(&path).unwrap();

        assert!(path.exists());
        assert_eq!(config.config_path, path);
        assert_eq!(config.bot.mention_name, "chanbot");
    }

    #[test]
    fn partial_file_fills_missing_sections() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[bot]
mention_name = "jbot"
owner = "alice"

[slack]
bot_token = "xoxb-1"
app_token = "xapp-1"

[throttle]
default_secs = 600
"#,
        )
        .unwrap();

        let config = Config::load_or_init_at(&path).unwrap();

        assert_eq!(config.bot.mention_name, "jbot");
        assert_eq!(config.bot.full_name, "Chan Bot");
        assert_eq!(config.throttle.default_secs, 600);
        assert_eq!(config.reliability.channel_max_backoff_secs, 60);
        assert!(config.slack.is_some());
        assert!(config.hipchat.is_none());
    }

    #[test]
    fn state_paths_expand_tilde() {
        let state = StateConfig::default();
        let path = state.channels_path();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("state/channels.json"));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[bot\nmention_name=").unwrap();
        assert!(Config::load_or_init_at(&path).is_err());
    }
}

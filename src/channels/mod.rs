pub mod hipchat;
pub mod slack;
pub mod split;
pub mod traits;

pub use hipchat::HipChatBackend;
pub use slack::SlackBackend;
pub use traits::{BackendKind, ChannelRef, ChatBackend, InboundEvent, Recipient};

use crate::config::Config;
use crate::state::{ChannelStore, Persistence, SystemClock};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

const HEALTH_CHECK_TIMEOUT_SECS: u64 = 10;

/// Instantiate every configured backend.
pub fn build_backends(config: &Config, store: &Arc<ChannelStore>) -> Vec<Arc<dyn ChatBackend>> {
    let mut backends: Vec<Arc<dyn ChatBackend>> = Vec::new();

    if let Some(ref hc) = config.hipchat {
        backends.push(Arc::new(HipChatBackend::new(
            hc,
            &config.bot.full_name,
            &config.bot.mention_name,
            Arc::clone(store),
        )));
    }

    if let Some(ref sl) = config.slack {
        backends.push(Arc::new(SlackBackend::new(
            sl.bot_token.clone(),
            sl.app_token.clone(),
            Arc::clone(store),
        )));
    }

    backends
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelHealthState {
    Healthy,
    Unhealthy,
    Timeout,
}

fn classify_health_result(
    result: &std::result::Result<bool, tokio::time::error::Elapsed>,
) -> ChannelHealthState {
    match result {
        Ok(true) => ChannelHealthState::Healthy,
        Ok(false) => ChannelHealthState::Unhealthy,
        Err(_) => ChannelHealthState::Timeout,
    }
}

/// Run health checks for configured backends.
pub async fn doctor_channels(config: Config) -> Result<()> {
    let store = Arc::new(ChannelStore::new(
        Arc::new(SystemClock),
        config.throttle.default_secs,
    ));
    let backends = build_backends(&config, &store);

    if backends.is_empty() {
        println!("No chat backends configured. Add a [hipchat] or [slack] section first.");
        return Ok(());
    }

    println!("Chat backend doctor");
    println!();

    let mut healthy = 0_u32;
    let mut unhealthy = 0_u32;
    let mut timeout = 0_u32;

    for backend in backends {
        let label = backend.kind().label();
        let result = tokio::time::timeout(
            Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS),
            backend.health_check(),
        )
        .await;

        match classify_health_result(&result) {
            ChannelHealthState::Healthy => {
                healthy += 1;
                println!("  ok       {label:<9} healthy");
            }
            ChannelHealthState::Unhealthy => {
                unhealthy += 1;
                println!("  FAIL     {label:<9} unhealthy (auth/config/network)");
            }
            ChannelHealthState::Timeout => {
                timeout += 1;
                println!("  TIMEOUT  {label:<9} timed out (>{HEALTH_CHECK_TIMEOUT_SECS}s)");
            }
        }
    }

    println!();
    println!("Summary: {healthy} healthy, {unhealthy} unhealthy, {timeout} timed out");
    Ok(())
}

/// Print the rooms recorded in the saved state, grouped by backend.
pub fn list_channels(config: &Config) -> Result<()> {
    let store = Arc::new(ChannelStore::new(
        Arc::new(SystemClock),
        config.throttle.default_secs,
    ));
    let counters = Arc::new(crate::state::Counters::new());
    let persistence = Persistence::new(
        config.state.channels_path(),
        config.state.counters_path(),
        Arc::clone(&store),
        counters,
    );
    let report = persistence.load()?;
    if report.repaired > 0 {
        println!("({} channel records needed repair)", report.repaired);
    }

    let grouped = store.names_by_backend();
    if grouped.is_empty() {
        println!("No channels recorded in {}", persistence.channels_path().display());
        return Ok(());
    }
    for (backend, names) in grouped {
        println!("{}: {}", backend.label(), names.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HipChatConfig, SlackConfig};

    #[test]
    fn health_results_are_classified() {
        assert_eq!(classify_health_result(&Ok(true)), ChannelHealthState::Healthy);
        assert_eq!(classify_health_result(&Ok(false)), ChannelHealthState::Unhealthy);
    }

    #[tokio::test]
    async fn health_timeout_is_classified() {
        let result = tokio::time::timeout(Duration::from_millis(1), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            true
        })
        .await;
        assert_eq!(classify_health_result(&result), ChannelHealthState::Timeout);
    }

    #[test]
    fn only_configured_backends_are_built() {
        let store = Arc::new(ChannelStore::new(Arc::new(SystemClock), 1800));
        let mut config = Config::default();
        assert!(build_backends(&config, &store).is_empty());

        config.slack = Some(SlackConfig {
            bot_token: "xoxb".into(),
            app_token: "xapp".into(),
        });
        config.hipchat = Some(HipChatConfig {
            api_url: "https://api.hipchat.com".into(),
            token: "t".into(),
            rooms: Vec::new(),
            direct_users: Vec::new(),
            poll_interval_secs: 3,
        });
        let kinds: Vec<BackendKind> = build_backends(&config, &store)
            .iter()
            .map(|b| b.kind())
            .collect();
        assert_eq!(kinds, vec![BackendKind::HipChat, BackendKind::Slack]);
    }
}

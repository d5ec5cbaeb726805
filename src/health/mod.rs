//! Process-wide component health registry.
//!
//! Backend sessions, the persistence loop and the watchdog report here; the
//! `doctor` command and tests read the JSON snapshot.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub updated_at: String,
    pub last_ok: Option<String>,
    pub last_error: Option<String>,
    pub last_event: Option<String>,
    pub events_seen: u64,
    pub restart_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub pid: u32,
    pub updated_at: String,
    pub uptime_seconds: u64,
    pub components: BTreeMap<String, ComponentHealth>,
}

struct HealthRegistry {
    started_at: Instant,
    components: Mutex<BTreeMap<String, ComponentHealth>>,
}

static REGISTRY: OnceLock<HealthRegistry> = OnceLock::new();

fn registry() -> &'static HealthRegistry {
    REGISTRY.get_or_init(|| HealthRegistry {
        started_at: Instant::now(),
        components: Mutex::new(BTreeMap::new()),
    })
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn upsert_component<F>(component: &str, update: F)
where
    F: FnOnce(&mut ComponentHealth),
{
    let mut map = registry().components.lock();
    let now = now_rfc3339();
    let entry = map
        .entry(component.to_string())
        .or_insert_with(|| ComponentHealth {
            status: "starting".into(),
            updated_at: now.clone(),
            last_ok: None,
            last_error: None,
            last_event: None,
            events_seen: 0,
            restart_count: 0,
        });
    update(entry);
    entry.updated_at = now;
}

pub fn mark_component_ok(component: &str) {
    upsert_component(component, |entry| {
        entry.status = "ok".into();
        entry.last_ok = Some(now_rfc3339());
        entry.last_error = None;
    });
}

#[allow(clippy::needless_pass_by_value)]
pub fn mark_component_error(component: &str, error: impl ToString) {
    let err = error.to_string();
    upsert_component(component, move |entry| {
        entry.status = "error".into();
        entry.last_error = Some(err);
    });
}

pub fn bump_component_restart(component: &str) {
    upsert_component(component, |entry| {
        entry.restart_count = entry.restart_count.saturating_add(1);
    });
}

/// Note that a component just handled inbound traffic.
pub fn record_component_event(component: &str) {
    upsert_component(component, |entry| {
        entry.events_seen = entry.events_seen.saturating_add(1);
        entry.last_event = Some(now_rfc3339());
    });
}

pub fn snapshot() -> HealthSnapshot {
    let components = registry().components.lock().clone();

    HealthSnapshot {
        pid: std::process::id(),
        updated_at: now_rfc3339(),
        uptime_seconds: registry().started_at.elapsed().as_secs(),
        components,
    }
}

pub fn snapshot_json() -> serde_json::Value {
    serde_json::to_value(snapshot()).unwrap_or_else(|_| {
        serde_json::json!({
            "status": "error",
            "message": "failed to serialize health snapshot"
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_then_ok_clears_last_error() {
        mark_component_error("test-health-flip", "boom");
        mark_component_ok("test-health-flip");

        let snap = snapshot();
        let entry = &snap.components["test-health-flip"];
        assert_eq!(entry.status, "ok");
        assert!(entry.last_error.is_none());
        assert!(entry.last_ok.is_some());
    }

    #[test]
    fn restart_and_event_counters_accumulate() {
        bump_component_restart("test-health-counts");
        bump_component_restart("test-health-counts");
        record_component_event("test-health-counts");

        let json = snapshot_json();
        let entry = &json["components"]["test-health-counts"];
        assert_eq!(entry["restart_count"], 2);
        assert_eq!(entry["events_seen"], 1);
        assert!(entry["last_event"].is_string());
    }
}

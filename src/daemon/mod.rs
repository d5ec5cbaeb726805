//! Long-running runtime: one supervised session per backend, a
//! maintenance tick for persistence, directory refresh and liveness, and
//! signal-triggered shutdown.

use crate::channels::{self, BackendKind, ChatBackend, InboundEvent};
use crate::config::{Config, ReliabilityConfig};
use crate::dispatch::Dispatcher;
use crate::state::{ChannelStore, Counters, Persistence, SystemClock};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Inbound events buffered between a listener and its event loop.
const SESSION_QUEUE_DEPTH: usize = 100;

/// Why a backend session ended. Sessions only end on failure.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("event handler panicked: {0}")]
    HandlerPanic(String),
    #[error("listener exited")]
    ListenerExited,
    #[error("listener failed: {0}")]
    ListenerFailed(String),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

// ── Liveness ─────────────────────────────────────────────────────

pub fn liveness_expired(last: Instant, now: Instant, threshold: Duration) -> bool {
    now.saturating_duration_since(last) >= threshold
}

/// Last inbound event per backend that promises steady traffic.
pub struct Liveness {
    last_seen: Mutex<HashMap<BackendKind, Instant>>,
}

impl Liveness {
    pub fn new(backends: &[Arc<dyn ChatBackend>], now: Instant) -> Self {
        let last_seen = backends
            .iter()
            .filter(|b| b.expects_steady_traffic())
            .map(|b| (b.kind(), now))
            .collect();
        Self {
            last_seen: Mutex::new(last_seen),
        }
    }

    pub fn touch(&self, kind: BackendKind) {
        self.touch_at(kind, Instant::now());
    }

    fn touch_at(&self, kind: BackendKind, at: Instant) {
        if let Some(last) = self.last_seen.lock().get_mut(&kind) {
            *last = at;
        }
    }

    /// First watched backend that has been silent for `threshold`.
    pub fn stale(&self, now: Instant, threshold: Duration) -> Option<BackendKind> {
        if threshold.is_zero() {
            return None;
        }
        let last_seen = self.last_seen.lock();
        let mut kinds: Vec<_> = last_seen
            .iter()
            .filter(|(_, last)| liveness_expired(**last, now, threshold))
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds.into_iter().next()
    }
}

// ── Sessions ─────────────────────────────────────────────────────

/// Run one connection: the listener feeds a queue, events are handled
/// one at a time in arrival order. Returns why the session ended.
pub async fn run_session(
    backend: Arc<dyn ChatBackend>,
    dispatcher: Arc<Dispatcher>,
    liveness: Arc<Liveness>,
) -> SessionError {
    let component = format!("backend:{}", backend.name());
    let (tx, mut rx) = tokio::sync::mpsc::channel::<InboundEvent>(SESSION_QUEUE_DEPTH);
    let listener = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move { backend.listen(tx).await })
    };

    while let Some(event) = rx.recv().await {
        liveness.touch(backend.kind());
        crate::health::record_component_event(&component);

        let handler = {
            let dispatcher = Arc::clone(&dispatcher);
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { dispatcher.handle_event(backend.as_ref(), event).await })
        };
        match handler.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("{} event dropped: {e:#}", backend.name()),
            Err(e) if e.is_panic() => {
                listener.abort();
                return SessionError::HandlerPanic(panic_message(e.into_panic().as_ref()));
            }
            Err(e) => tracing::warn!("{} event handler cancelled: {e}", backend.name()),
        }
    }

    match listener.await {
        Ok(Ok(())) => SessionError::ListenerExited,
        Ok(Err(e)) => SessionError::ListenerFailed(format!("{e:#}")),
        Err(e) if e.is_panic() => {
            SessionError::ListenerFailed(format!("panic: {}", panic_message(e.into_panic().as_ref())))
        }
        Err(e) => SessionError::ListenerFailed(e.to_string()),
    }
}

/// Keep a backend connected forever, rebuilding the session with
/// exponential backoff whenever it ends.
pub fn spawn_supervised_session(
    backend: Arc<dyn ChatBackend>,
    dispatcher: Arc<Dispatcher>,
    liveness: Arc<Liveness>,
    reliability: &ReliabilityConfig,
) -> JoinHandle<()> {
    let initial_backoff_secs = reliability.channel_initial_backoff_secs.max(1);
    let max_backoff_secs = reliability.channel_max_backoff_secs.max(initial_backoff_secs);

    tokio::spawn(async move {
        let component = format!("backend:{}", backend.name());
        let mut backoff = initial_backoff_secs;

        loop {
            crate::health::mark_component_ok(&component);
            let err = run_session(
                Arc::clone(&backend),
                Arc::clone(&dispatcher),
                Arc::clone(&liveness),
            )
            .await;

            match err {
                SessionError::ListenerExited => {
                    tracing::warn!("Backend {} exited; reconnecting", backend.name());
                    // Clean exit, the connection itself was fine
                    backoff = initial_backoff_secs;
                }
                SessionError::HandlerPanic(_) | SessionError::ListenerFailed(_) => {
                    tracing::error!("Backend {} session failed: {err}; reconnecting", backend.name());
                }
            }
            crate::health::mark_component_error(&component, &err);
            crate::health::bump_component_restart(&component);

            tokio::time::sleep(Duration::from_secs(backoff)).await;
            // Double backoff AFTER sleeping so first error uses initial_backoff
            backoff = backoff.saturating_mul(2).min(max_backoff_secs);
        }
    })
}

// ── Maintenance tick ─────────────────────────────────────────────

/// Sync backend ids from each backend's membership listing. Slack rooms
/// the store does not know yet are adopted when `adopt` is set.
pub async fn refresh_directories(
    backends: &[Arc<dyn ChatBackend>],
    store: &ChannelStore,
    adopt: bool,
) -> usize {
    let mut changed = 0;
    for backend in backends {
        match backend.directory().await {
            Ok(listing) => {
                let adopt = adopt && backend.kind() == BackendKind::Slack;
                changed += store.refresh_directory(backend.kind(), &listing, adopt);
            }
            Err(e) => tracing::warn!("Directory refresh for {} failed: {e:#}", backend.name()),
        }
    }
    if changed > 0 {
        tracing::info!("Directory refresh updated {changed} channels");
    }
    changed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// A backend went quiet; state is flushed and the process must restart.
    Restart(BackendKind),
}

pub struct Maintenance {
    persistence: Arc<Persistence>,
    store: Arc<ChannelStore>,
    backends: Vec<Arc<dyn ChatBackend>>,
    liveness: Arc<Liveness>,
    refresh_every: u64,
    liveness_threshold: Duration,
    ticks: u64,
}

impl Maintenance {
    pub fn new(
        persistence: Arc<Persistence>,
        store: Arc<ChannelStore>,
        backends: Vec<Arc<dyn ChatBackend>>,
        liveness: Arc<Liveness>,
        reliability: &ReliabilityConfig,
    ) -> Self {
        Self {
            persistence,
            store,
            backends,
            liveness,
            refresh_every: reliability.directory_refresh_ticks,
            liveness_threshold: Duration::from_secs(reliability.liveness_threshold_secs()),
            ticks: 0,
        }
    }

    fn flush(&self) {
        if let Err(e) = self.persistence.save() {
            tracing::error!("Failed to save state: {e}");
        }
    }

    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        self.ticks = self.ticks.saturating_add(1);
        self.flush();

        if self.refresh_every > 0 && self.ticks % self.refresh_every == 0 {
            refresh_directories(&self.backends, &self.store, false).await;
        }

        match self.liveness.stale(now, self.liveness_threshold) {
            Some(kind) => {
                tracing::warn!(
                    "No {kind} traffic for {}s; restarting",
                    self.liveness_threshold.as_secs()
                );
                self.flush();
                TickOutcome::Restart(kind)
            }
            None => TickOutcome::Continue,
        }
    }

    /// Tick forever. Only returns if a liveness restart could not exec.
    pub async fn run(&mut self, period: Duration) -> Result<()> {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if let TickOutcome::Restart(_) = self.tick(Instant::now()).await {
                return restart_process();
            }
        }
    }
}

/// Replace the current process with a fresh copy of itself.
#[cfg(unix)]
fn restart_process() -> Result<()> {
    use std::os::unix::process::CommandExt;
    let exe = std::env::current_exe().context("Failed to locate own executable")?;
    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(err).with_context(|| format!("Failed to re-exec {}", exe.display()))
}

#[cfg(not(unix))]
fn restart_process() -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate own executable")?;
    std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .spawn()
        .with_context(|| format!("Failed to relaunch {}", exe.display()))?;
    std::process::exit(0)
}

/// Resolves with the name of the signal that asked us to stop. A listener
/// that cannot be installed never resolves, so the daemon keeps serving
/// instead of shutting down on the spot.
async fn shutdown_signal() -> &'static str {
    wait_for_signal(listen_for_signals()).await
}

async fn wait_for_signal<F>(listener: F) -> &'static str
where
    F: std::future::Future<Output = std::io::Result<&'static str>>,
{
    match listener.await {
        Ok(name) => name,
        Err(e) => {
            tracing::error!("Signal handling unavailable: {e}; stop the process externally");
            std::future::pending::<&'static str>().await
        }
    }
}

#[cfg(unix)]
async fn listen_for_signals() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = quit.recv() => Ok("SIGQUIT"),
    }
}

#[cfg(not(unix))]
async fn listen_for_signals() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}

// ── Entry point ──────────────────────────────────────────────────

pub async fn run(config: Config) -> Result<()> {
    let store = Arc::new(ChannelStore::new(
        Arc::new(SystemClock),
        config.throttle.default_secs,
    ));
    let counters = Arc::new(Counters::new());
    let persistence = Arc::new(Persistence::new(
        config.state.channels_path(),
        config.state.counters_path(),
        Arc::clone(&store),
        Arc::clone(&counters),
    ));
    persistence
        .load()
        .context("Refusing to start with unreadable state")?;

    let backends = channels::build_backends(&config, &store);
    if backends.is_empty() {
        anyhow::bail!("No chat backends configured; add a [hipchat] or [slack] section");
    }

    let dispatcher = Arc::new(Dispatcher::new(
        &config,
        Arc::clone(&store),
        Arc::clone(&counters),
    )?);

    refresh_directories(&backends, &store, true).await;

    let liveness = Arc::new(Liveness::new(&backends, Instant::now()));
    let sessions: Vec<JoinHandle<()>> = backends
        .iter()
        .map(|backend| {
            tracing::info!("Starting {} session", backend.kind().label());
            spawn_supervised_session(
                Arc::clone(backend),
                Arc::clone(&dispatcher),
                Arc::clone(&liveness),
                &config.reliability,
            )
        })
        .collect();

    let mut maintenance = Maintenance::new(
        Arc::clone(&persistence),
        Arc::clone(&store),
        backends,
        liveness,
        &config.reliability,
    );
    let period = Duration::from_secs(config.reliability.persist_interval_secs.max(1));

    let outcome = tokio::select! {
        name = shutdown_signal() => {
            tracing::info!("Received {name}; shutting down");
            Ok(())
        }
        result = maintenance.run(period) => result,
    };

    for session in &sessions {
        session.abort();
    }
    persistence.save().context("Final state flush failed")?;
    tracing::info!("State saved to {}", persistence.channels_path().display());
    outcome
}

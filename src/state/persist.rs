//! Durable storage for the channel store and the global counters.
//!
//! JSON files, each written atomically: channels, counters, and the list
//! of rooms left by ignoring them (kept next to the channels file). A
//! missing file means empty state; a file that exists but does not parse
//! is fatal.

use super::channel::Channel;
use super::counters::{CounterMap, Counters};
use super::store::{ChannelStore, RepairReport};
use crate::util::write_atomic;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state file {path}: {message}")]
    Write { path: PathBuf, message: String },
}

fn load_json<T>(path: &Path) -> Result<Option<T>, PersistError>
where
    T: DeserializeOwned,
{
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| PersistError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

fn save_json<T>(path: &Path, value: &T) -> Result<(), PersistError>
where
    T: Serialize,
{
    serde_json::to_vec_pretty(value)
        .context("Failed to serialize state")
        .and_then(|json| write_atomic(path, &json))
        .map_err(|e| PersistError::Write {
            path: path.to_path_buf(),
            message: format!("{e:#}"),
        })
}

pub fn load_channels(path: &Path) -> Result<BTreeMap<String, Channel>, PersistError> {
    Ok(load_json(path)?.unwrap_or_default())
}

/// Sits beside the channels file.
pub const IGNORED_FILE: &str = "ignored.json";

pub fn load_counters(path: &Path) -> Result<CounterMap, PersistError> {
    Ok(load_json(path)?.unwrap_or_default())
}

/// Binds the in-memory state to its files.
pub struct Persistence {
    channels_path: PathBuf,
    counters_path: PathBuf,
    ignored_path: PathBuf,
    store: Arc<ChannelStore>,
    counters: Arc<Counters>,
}

impl Persistence {
    pub fn new(
        channels_path: PathBuf,
        counters_path: PathBuf,
        store: Arc<ChannelStore>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            ignored_path: channels_path.with_file_name(IGNORED_FILE),
            channels_path,
            counters_path,
            store,
            counters,
        }
    }

    pub fn channels_path(&self) -> &Path {
        &self.channels_path
    }

    /// Restore every file into memory. Must run before any backend starts.
    pub fn load(&self) -> Result<RepairReport, PersistError> {
        let channels = load_channels(&self.channels_path)?;
        let counters = load_counters(&self.counters_path)?;
        let ignored: BTreeSet<String> = load_json(&self.ignored_path)?.unwrap_or_default();
        let report = self.store.install(channels);
        self.store.install_ignored(ignored);
        self.counters.install(counters);
        tracing::info!(
            "Loaded {} channels from {} ({} repaired, {} pruned)",
            self.store.len(),
            self.channels_path.display(),
            report.repaired,
            report.pruned.len()
        );
        Ok(report)
    }

    /// Write every file. Reads the store; never mutates it.
    pub fn save(&self) -> Result<(), PersistError> {
        save_json(&self.channels_path, &self.store.snapshot())?;
        save_json(&self.counters_path, &self.counters.snapshot())?;
        save_json(&self.ignored_path, &self.store.ignored())?;
        tracing::debug!("Saved state to {}", self.channels_path.display());
        Ok(())
    }
}

//! Durable episode journal: one JSON line per episode, each linked to its predecessor by hash.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use toolgate_store::{EpisodeIndex, EpisodeQuery, StoreError};
use toolgate_types::{canonical_json, Episode};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("hash chain broken at line {line}")]
    ChainMismatch { line: usize },
    #[error("entry hash invalid at line {line}")]
    HashInvalid { line: usize },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub episode: Episode,
    pub prev_hash: Option<String>,
    pub chain_hash: String,
}

struct JournalState {
    last_hash: Option<String>,
    episodes: Vec<Episode>,
}

/// Cloning shares the underlying file and in-memory index.
#[derive(Clone)]
pub struct EpisodeJournal {
    inner: Arc<JournalInner>,
}

struct JournalInner {
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl EpisodeJournal {
    /// Opens (or creates on first append) a journal, replaying existing entries into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path)?;
        let last_hash = entries.last().map(|e| e.chain_hash.clone());
        let episodes = entries.into_iter().map(|e| e.episode).collect();
        Ok(Self {
            inner: Arc::new(JournalInner {
                path,
                state: Mutex::new(JournalState { last_hash, episodes }),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Blocking append. Async callers go through [`EpisodeIndex::append`].
    pub fn append_episode(&self, episode: Episode) -> Result<JournalEntry, JournalError> {
        self.inner.append(episode)
    }
}

impl JournalInner {
    fn append(&self, episode: Episode) -> Result<JournalEntry, JournalError> {
        let mut state = self.state.lock().map_err(|_| JournalError::Io("lock".into()))?;
        let prev_hash = state.last_hash.clone();
        let chain_hash = hash_entry(&episode, prev_hash.as_deref());
        let entry = JournalEntry {
            episode,
            prev_hash,
            chain_hash,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| JournalError::Io(e.to_string()))?;
        let line = serde_json::to_string(&entry).map_err(|e| JournalError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| JournalError::Io(e.to_string()))?;

        state.last_hash = Some(entry.chain_hash.clone());
        state.episodes.push(entry.episode.clone());
        Ok(entry)
    }
}

#[async_trait]
impl EpisodeIndex for EpisodeJournal {
    async fn append(&self, episode: Episode) -> Result<(), StoreError> {
        // file write and chain lock stay off the async workers
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.append(episode))
            .await
            .map_err(|e| StoreError::new(format!("journal append task failed: {e}")))?
            .map(|_| ())
            .map_err(|e| StoreError::new(e.to_string()))
    }

    async fn search(&self, query: &EpisodeQuery) -> Result<Vec<Episode>, StoreError> {
        let state = self.inner.state.lock().map_err(|_| StoreError::new("lock"))?;
        Ok(query.apply(&state.episodes))
    }
}

/// Checks every link of the chain. Returns the number of entries verified.
pub fn verify_log(path: impl AsRef<Path>) -> Result<usize, JournalError> {
    let file = File::open(path.as_ref()).map_err(|e| JournalError::Io(e.to_string()))?;
    let reader = BufReader::new(file);
    let mut prev: Option<String> = None;
    let mut count = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| JournalError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = serde_json::from_str(&line).map_err(|e| JournalError::Parse {
            line: line_no,
            message: e.to_string(),
        })?;
        if entry.prev_hash != prev {
            return Err(JournalError::ChainMismatch { line: line_no });
        }
        if entry.chain_hash != hash_entry(&entry.episode, entry.prev_hash.as_deref()) {
            return Err(JournalError::HashInvalid { line: line_no });
        }
        prev = Some(entry.chain_hash);
        count += 1;
    }
    Ok(count)
}

fn hash_entry(episode: &Episode, prev_hash: Option<&str>) -> String {
    let value = serde_json::to_value(episode).unwrap_or_default();
    let mut h = Sha256::new();
    h.update(canonical_json(&value));
    if let Some(prev) = prev_hash {
        h.update(prev.as_bytes());
    }
    hex::encode(h.finalize())
}

fn read_entries(path: &Path) -> Result<Vec<JournalEntry>, JournalError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| JournalError::Io(e.to_string()))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| JournalError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| JournalError::Parse {
            line: idx + 1,
            message: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

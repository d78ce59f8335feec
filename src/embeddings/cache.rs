use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::storage::write_atomically;

/// Content hash for text (SHA-256)
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq)]
struct CacheEntry {
    vector: Vec<f32>,
    created_at: u64,
    expires_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntry {
    embedding: Vec<f32>,
    timestamp: u64,
    expires_at: u64,
}

/// Outcome of `load_from_disk`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub retained: usize,
    pub expired: usize,
    pub malformed: usize,
    /// The document existed but could not be parsed.
    pub corrupt: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// TTL cache of embeddings keyed by the SHA-256 of the embedded text.
///
/// Owned by a single task (the batch scheduler); it is not internally
/// synchronized.
pub struct EmbeddingCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    dim: usize,
    path: Option<PathBuf>,
    hits: u64,
    misses: u64,
}

impl EmbeddingCache {
    pub fn new(ttl: Duration, dim: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            dim,
            path: None,
            hits: 0,
            misses: 0,
        }
    }

    /// Cache backed by a JSON document at `path`.
    pub fn with_path(path: impl Into<PathBuf>, ttl: Duration, dim: usize) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(ttl, dim)
        }
    }

    pub fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        self.get_hashed_at(&content_hash(text), now_millis())
    }

    pub fn get_hashed(&mut self, text_hash: &str) -> Option<Vec<f32>> {
        self.get_hashed_at(text_hash, now_millis())
    }

    /// Lookup at an explicit clock value. An expired entry is removed.
    pub fn get_hashed_at(&mut self, text_hash: &str, now: u64) -> Option<Vec<f32>> {
        match self.entries.get(text_hash) {
            Some(entry) if entry.expires_at > now => {
                self.hits += 1;
                Some(entry.vector.clone())
            }
            Some(_) => {
                self.entries.remove(text_hash);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Presence check without touching the hit/miss counters.
    pub fn contains_hashed(&self, text_hash: &str) -> bool {
        let now = now_millis();
        self.entries
            .get(text_hash)
            .is_some_and(|entry| entry.expires_at > now)
    }

    pub fn put(&mut self, text: &str, vector: Vec<f32>) {
        self.put_hashed_at(content_hash(text), vector, now_millis());
    }

    pub fn put_hashed(&mut self, text_hash: String, vector: Vec<f32>) {
        self.put_hashed_at(text_hash, vector, now_millis());
    }

    pub fn put_hashed_at(&mut self, text_hash: String, vector: Vec<f32>, now: u64) {
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        self.entries.insert(
            text_hash,
            CacheEntry {
                vector,
                created_at: now,
                expires_at: now.saturating_add(ttl_ms),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    /// Replace the in-memory map with the persisted document.
    ///
    /// A missing document is an empty cache. An unparsable one is logged and
    /// also treated as empty; it is overwritten by the next flush.
    pub fn load_from_disk(&mut self) -> LoadReport {
        let Some(path) = self.path.clone() else {
            return LoadReport::default();
        };
        self.entries.clear();

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadReport::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Embedding cache unreadable, starting empty");
                return LoadReport {
                    corrupt: true,
                    ..LoadReport::default()
                };
            }
        };

        let document: BTreeMap<String, PersistedEntry> = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Embedding cache corrupt, starting empty");
                return LoadReport {
                    corrupt: true,
                    ..LoadReport::default()
                };
            }
        };

        let now = now_millis();
        let mut report = LoadReport::default();
        for (hash, entry) in document {
            if entry.embedding.len() != self.dim {
                report.malformed += 1;
                continue;
            }
            if entry.expires_at <= now {
                report.expired += 1;
                continue;
            }
            self.entries.insert(
                hash,
                CacheEntry {
                    vector: entry.embedding,
                    created_at: entry.timestamp,
                    expires_at: entry.expires_at,
                },
            );
            report.retained += 1;
        }

        tracing::info!(
            retained = report.retained,
            expired = report.expired,
            malformed = report.malformed,
            "Loaded embedding cache"
        );
        report
    }

    /// Write the whole cache to its document. Expired entries are skipped.
    pub fn flush_to_disk(&self) -> Result<()> {
        match self.snapshot_for_disk()? {
            Some(snapshot) => snapshot.write(),
            None => Ok(()),
        }
    }

    /// Serialize every live entry without touching the disk, so the write
    /// can run elsewhere. `None` without a path.
    pub fn snapshot_for_disk(&self) -> Result<Option<CacheSnapshot>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        let now = now_millis();
        let document: BTreeMap<&str, PersistedEntry> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at > now)
            .map(|(hash, e)| {
                (
                    hash.as_str(),
                    PersistedEntry {
                        embedding: e.vector.clone(),
                        timestamp: e.created_at,
                        expires_at: e.expires_at,
                    },
                )
            })
            .collect();

        let json = serde_json::to_vec(&document).context("Failed to serialize embedding cache")?;
        Ok(Some(CacheSnapshot {
            path: path.clone(),
            json,
            entries: document.len(),
        }))
    }
}

/// Serialized cache document ready to be written.
pub struct CacheSnapshot {
    path: PathBuf,
    json: Vec<u8>,
    entries: usize,
}

impl CacheSnapshot {
    pub fn write(&self) -> Result<()> {
        write_atomically(&self.path, &self.json)
            .with_context(|| format!("Failed to write embedding cache {}", self.path.display()))?;
        tracing::debug!(entries = self.entries, path = %self.path.display(), "Flushed embedding cache");
        Ok(())
    }
}

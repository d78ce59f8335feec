//! Authoritative store of extracted functions and their vectors.
//!
//! The in-memory state is an `Arc` snapshot behind a lock. Readers clone the
//! `Arc` and never observe a half-applied replacement. Writers are serialized,
//! persist the next snapshot to disk first and only then publish it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::embeddings::cache::now_millis;
use crate::error::{ContextError, VectorError};
use crate::indexer::extract::SourceFunction;
use crate::storage::similarity::{rank, SearchHit, SimilarityIndex};
use crate::storage::write_atomically;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFunction {
    #[serde(flatten)]
    pub function: SourceFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub last_updated: u64,
}

impl StoredFunction {
    pub fn new(function: SourceFunction, embedding: Vec<f32>) -> Self {
        Self {
            function,
            embedding: Some(embedding),
            last_updated: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceReport {
    pub removed: usize,
    pub inserted: usize,
}

pub struct FunctionStore {
    path: Option<PathBuf>,
    dim: usize,
    snapshot: RwLock<Arc<Vec<StoredFunction>>>,
    writer: Mutex<()>,
}

impl FunctionStore {
    /// Store that lives only in memory.
    pub fn in_memory(dim: usize) -> Self {
        Self {
            path: None,
            dim,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(()),
        }
    }

    /// Open the snapshot at `path`. A missing file is an empty store; an
    /// unreadable or unparsable one is an error.
    pub fn open(path: impl Into<PathBuf>, dim: usize) -> Result<Self, ContextError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => parse_snapshot(&path, &raw, dim)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(ContextError::StoreUnavailable(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        };
        tracing::info!(path = %path.display(), records = records.len(), "Opened function store");

        Ok(Self {
            path: Some(path),
            dim,
            snapshot: RwLock::new(Arc::new(records)),
            writer: Mutex::new(()),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Current complete snapshot.
    pub fn all(&self) -> Arc<Vec<StoredFunction>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.all().is_empty()
    }

    pub fn find_by_name(&self, name: &str) -> Vec<StoredFunction> {
        self.all()
            .iter()
            .filter(|r| r.function.function_name == name)
            .cloned()
            .collect()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.all()
            .iter()
            .map(|r| r.function.file_path.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Drop every record for `file_path` and insert `records` in one swap.
    ///
    /// `records` are expected to carry `file_path`. Nothing changes, in
    /// memory or on disk, if validation or the write fails.
    pub fn replace_for_path(
        &self,
        file_path: &str,
        records: Vec<StoredFunction>,
    ) -> Result<ReplaceReport, ContextError> {
        for record in &records {
            if let Some(vector) = &record.embedding {
                check_dim(self.dim, vector)?;
            }
        }

        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.all();
        let inserted = records.len();
        let mut next: Vec<StoredFunction> = current
            .iter()
            .filter(|r| r.function.file_path != file_path)
            .cloned()
            .collect();
        let removed = current.len() - next.len();
        next.extend(records);

        self.publish(next)?;
        tracing::info!(file_path, removed, inserted, "Replaced stored functions");
        Ok(ReplaceReport { removed, inserted })
    }

    /// Remove every record for `file_path`. Returns how many were removed.
    pub fn remove_path(&self, file_path: &str) -> Result<usize, ContextError> {
        Ok(self.replace_for_path(file_path, Vec::new())?.removed)
    }

    fn publish(&self, next: Vec<StoredFunction>) -> Result<(), ContextError> {
        if let Some(path) = &self.path {
            let json = serde_json::to_vec(&next)?;
            write_atomically(path, &json).map_err(|e| {
                ContextError::StoreUnavailable(format!("{}: {e}", path.display()))
            })?;
        }
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        Ok(())
    }
}

impl SimilarityIndex for FunctionStore {
    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, VectorError> {
        rank(&self.all(), query, limit)
    }
}

fn check_dim(expected: usize, vector: &[f32]) -> Result<(), VectorError> {
    if vector.len() != expected {
        return Err(VectorError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

fn parse_snapshot(path: &Path, raw: &str, dim: usize) -> Result<Vec<StoredFunction>, ContextError> {
    let records: Vec<StoredFunction> = serde_json::from_str(raw).map_err(|e| {
        ContextError::StoreUnavailable(format!("corrupt snapshot {}: {e}", path.display()))
    })?;
    for record in &records {
        if let Some(vector) = &record.embedding {
            check_dim(dim, vector).map_err(|e| {
                ContextError::StoreUnavailable(format!(
                    "snapshot {} holds {} for {}",
                    path.display(),
                    e,
                    record.function.function_name
                ))
            })?;
        }
    }
    Ok(records)
}

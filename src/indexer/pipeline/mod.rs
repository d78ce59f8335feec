pub mod scan;
pub mod stats;

use crate::{
    config::Config,
    embeddings::batch::BatchScheduler,
    error::ContextError,
    indexer::extract::FunctionExtractor,
    storage::{FunctionStore, StoredFunction},
};
use futures::stream::{self, StreamExt};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use self::scan::scan_files;
pub use self::stats::{IndexOutcome, IndexRunStats};

/// Files read and indexed concurrently in `index_paths`.
const FILE_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct IndexPipeline {
    config: Arc<Config>,
    extractor: Arc<FunctionExtractor>,
    scheduler: BatchScheduler,
    store: Arc<FunctionStore>,
}

impl IndexPipeline {
    pub fn new(
        config: Arc<Config>,
        extractor: Arc<FunctionExtractor>,
        scheduler: BatchScheduler,
        store: Arc<FunctionStore>,
    ) -> Self {
        Self {
            config,
            extractor,
            scheduler,
            store,
        }
    }

    /// Extract the functions in `content`, embed them and replace whatever
    /// the store held for `file_path`.
    ///
    /// If any embedding fails the store is left untouched.
    pub async fn store_file_context(
        &self,
        file_path: &str,
        content: &str,
    ) -> Result<IndexOutcome, ContextError> {
        let extraction = self.extractor.extract_with_report(file_path, content);
        let texts: Vec<String> = extraction
            .functions
            .iter()
            .map(|f| f.embedding_text().to_string())
            .collect();

        let vectors = self.scheduler.embed_many(&texts).await?;
        let records: Vec<StoredFunction> = extraction
            .functions
            .into_iter()
            .zip(vectors)
            .map(|(function, vector)| StoredFunction::new(function, vector))
            .collect();

        let functions = records.len();
        // The snapshot write is synchronous file I/O.
        let store = Arc::clone(&self.store);
        let owned_path = file_path.to_string();
        let report = tokio::task::spawn_blocking(move || store.replace_for_path(&owned_path, records))
            .await
            .map_err(|e| ContextError::StoreUnavailable(format!("store writer task failed: {e}")))??;
        tracing::debug!(
            file_path,
            functions,
            removed = report.removed,
            degraded = extraction.degraded,
            "Stored file context"
        );

        Ok(IndexOutcome {
            file_path: file_path.to_string(),
            functions,
            removed: report.removed,
            degraded: extraction.degraded,
        })
    }

    /// Read one file from disk and index it under its base-relative path.
    pub async fn index_file(&self, path: &Path) -> Result<IndexOutcome, ContextError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ContextError::StoreUnavailable(format!("failed to read {}: {e}", path.display()))
        })?;
        let content = String::from_utf8_lossy(&bytes);
        let file_path = self.config.path_relative_to_base(path);
        self.store_file_context(&file_path, &content).await
    }

    /// Index files and directories. Per-file failures are logged and counted;
    /// a closed scheduler aborts the run.
    pub async fn index_paths(&self, roots: &[PathBuf]) -> Result<IndexRunStats, ContextError> {
        let started_at = Instant::now();
        let files: Vec<PathBuf> = roots
            .iter()
            .map(|root| self.config.normalize_path_to_base(root))
            .flat_map(|root| scan_files(&root))
            .collect();

        let mut stats = IndexRunStats {
            files_scanned: files.len(),
            ..IndexRunStats::default()
        };

        let mut results = stream::iter(files)
            .map(|path| async move {
                let outcome = self.index_file(&path).await;
                (path, outcome)
            })
            .buffer_unordered(FILE_CONCURRENCY);

        while let Some((path, outcome)) = results.next().await {
            match outcome {
                Ok(outcome) => stats.record(&outcome),
                Err(ContextError::SchedulerClosed) => return Err(ContextError::SchedulerClosed),
                Err(err) => {
                    stats.files_failed += 1;
                    tracing::warn!(path = %path.display(), error = %err, "Failed to index file");
                }
            }
        }

        tracing::info!(
            files_scanned = stats.files_scanned,
            files_indexed = stats.files_indexed,
            functions = stats.functions_indexed,
            degraded = stats.files_degraded,
            failed = stats.files_failed,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Index run finished"
        );
        Ok(stats)
    }
}

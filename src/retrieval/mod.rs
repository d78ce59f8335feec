pub mod formatting;

use crate::{
    config::Config,
    embeddings::batch::BatchScheduler,
    error::ContextError,
    indexer::extract::SourceFunction,
    storage::{FunctionStore, SearchHit, SimilarityIndex},
};
use serde::Serialize;
use std::{fmt, sync::Arc};

pub use formatting::ContextItem;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledContext {
    pub query: String,
    pub context: String,
    pub items: Vec<ContextItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEntry {
    pub function: SourceFunction,
    pub dimension: Option<usize>,
    pub norm: Option<f32>,
    /// A live cache entry exists for this function's embedding text.
    pub cached: bool,
    pub last_updated: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugReport {
    pub function_name: String,
    pub store_size: usize,
    pub entries: Vec<DebugEntry>,
}

impl fmt::Display for DebugReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} stored record(s) out of {}",
            self.function_name,
            self.entries.len(),
            self.store_size
        )?;
        for entry in &self.entries {
            let func = &entry.function;
            writeln!(f, "- id: {}", func.id)?;
            writeln!(f, "  file: {}", func.file_path)?;
            if let (Some(start), Some(end)) = (func.start_line, func.end_line) {
                writeln!(f, "  lines: {start}-{end}")?;
            }
            writeln!(f, "  return type: {}", func.return_type)?;
            writeln!(f, "  parameters: [{}]", func.parameters.join(", "))?;
            match (entry.dimension, entry.norm) {
                (Some(dim), Some(norm)) => writeln!(f, "  embedding: dim={dim} norm={norm:.4}")?,
                _ => writeln!(f, "  embedding: none")?,
            }
            writeln!(f, "  cached: {}", entry.cached)?;
            writeln!(f, "  last updated (ms): {}", entry.last_updated)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Retriever {
    config: Arc<Config>,
    scheduler: BatchScheduler,
    store: Arc<FunctionStore>,
}

impl Retriever {
    pub fn new(config: Arc<Config>, scheduler: BatchScheduler, store: Arc<FunctionStore>) -> Self {
        Self {
            config,
            scheduler,
            store,
        }
    }

    /// Stored functions closest to `query`, nearest first.
    pub async fn search_similar_functions(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ContextError> {
        if self.store.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let vector = self.scheduler.embed(query).await?;
        let hits = self.store.search(&vector, limit)?;
        tracing::debug!(hits = hits.len(), limit, "Similarity search");
        Ok(hits)
    }

    /// Top hits for `query` rendered as one context block, capped at
    /// `max_context_bytes`.
    pub async fn assemble_context(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<AssembledContext, ContextError> {
        let hits = self.search_similar_functions(query, limit).await?;
        let (context, items) = formatting::format_context(&hits, self.config.max_context_bytes);
        Ok(AssembledContext {
            query: query.to_string(),
            context,
            items,
        })
    }

    pub async fn debug_info(&self, function_name: &str) -> Result<DebugReport, ContextError> {
        let records = self.store.find_by_name(function_name);
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let cached = self
                .scheduler
                .is_cached(record.function.embedding_text())
                .await?;
            let (dimension, norm) = match &record.embedding {
                Some(v) => (
                    Some(v.len()),
                    Some(v.iter().map(|x| x * x).sum::<f32>().sqrt()),
                ),
                None => (None, None),
            };
            entries.push(DebugEntry {
                function: record.function,
                dimension,
                norm,
                cached,
                last_updated: record.last_updated,
            });
        }

        Ok(DebugReport {
            function_name: function_name.to_string(),
            store_size: self.store.len(),
            entries,
        })
    }
}

//! Command handlers

use crate::error::ContextError;
use crate::retrieval::formatting::location;
use serde_json::{json, Value};
use std::path::PathBuf;

pub use state::AppState;

mod state;

pub use state::batch_config;

pub async fn handle_index(state: &AppState, paths: &[PathBuf]) -> Result<Value, ContextError> {
    let stats = state.indexer.index_paths(paths).await?;
    Ok(json!({
        "stats": stats,
        "storeSize": state.store.len(),
    }))
}

pub async fn handle_search(
    state: &AppState,
    query: &str,
    limit: Option<usize>,
) -> Result<Value, ContextError> {
    let limit = limit.unwrap_or(state.config.search_limit);
    let hits = state
        .retriever
        .search_similar_functions(query, limit)
        .await?;
    let results: Vec<Value> = hits
        .iter()
        .map(|hit| {
            json!({
                "id": hit.function.id,
                "functionName": hit.function.function_name,
                "location": location(hit),
                "returnType": hit.function.return_type,
                "parameters": hit.function.parameters,
                "distance": hit.distance,
            })
        })
        .collect();
    Ok(json!({
        "query": query,
        "count": results.len(),
        "results": results,
    }))
}

pub async fn handle_context(
    state: &AppState,
    query: &str,
    limit: Option<usize>,
) -> Result<Value, ContextError> {
    let limit = limit.unwrap_or(state.config.search_limit);
    let assembled = state.retriever.assemble_context(query, limit).await?;
    Ok(serde_json::to_value(assembled)?)
}

/// Human-readable report of what the store knows about `function_name`.
pub async fn handle_debug(state: &AppState, function_name: &str) -> Result<String, ContextError> {
    let report = state.retriever.debug_info(function_name).await?;
    Ok(report.to_string())
}

pub async fn handle_stats(state: &AppState) -> Result<Value, ContextError> {
    let scheduler = state.scheduler.stats().await?;
    Ok(json!({
        "storeSize": state.store.len(),
        "files": state.store.file_paths().len(),
        "embeddingDim": state.store.dim(),
        "model": state.config.embeddings_model,
        "scheduler": {
            "providerCalls": scheduler.provider_calls,
            "textsSent": scheduler.texts_sent,
            "cacheHits": scheduler.cache_hits,
            "cacheMisses": scheduler.cache_misses,
            "coalesced": scheduler.coalesced,
            "failedBatches": scheduler.failed_batches,
            "retries": scheduler.retries,
            "cacheEntries": scheduler.cache_entries,
            "pending": scheduler.pending,
        },
    }))
}

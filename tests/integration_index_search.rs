mod support;

use fn_context_index::config::Config;
use fn_context_index::error::ContextError;
use fn_context_index::handlers::{handle_debug, handle_search, handle_stats};
use rstest::rstest;
use std::path::PathBuf;

use support::fixtures::*;
use support::helpers::*;

#[rstest]
#[tokio::test]
async fn index_directory_then_search_finds_exact_function(test_config: Config) {
    let base = test_config.base_dir.clone();
    write_source(&base, "src/math.c", MATH_C);
    write_source(&base, "src/drivers/flash.c", FLASH_C);
    write_source(&base, "docs/notes.md", "int not_code(void) { }");

    let state = open_state(test_config);
    let stats = state
        .indexer
        .index_paths(&[PathBuf::from(".")])
        .await
        .unwrap();
    assert_eq!(stats.files_scanned, 2);
    assert_eq!(stats.files_indexed, 2);
    assert_eq!(stats.functions_indexed, 4);

    let mut names = stored_names(&state);
    names.sort();
    assert_eq!(
        names,
        vec!["add", "flash_erase_sector", "flash_read_word", "subtract"]
    );
    assert_eq!(
        state.store.file_paths(),
        vec!["src/drivers/flash.c", "src/math.c"]
    );

    let add = state.store.find_by_name("add").remove(0);
    assert_eq!(add.function.parameters, vec!["int a", "int b"]);
    assert_eq!(add.function.start_line, Some(2));
    assert_eq!(add.function.end_line, Some(5));

    let hits = state
        .retriever
        .search_similar_functions(&add.function.content, 3)
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].function.function_name, "add");
    assert!(hits[0].distance.abs() < 1e-5);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

    state.shutdown().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn reindexing_replaces_previous_records(test_config: Config) {
    let state = open_state(test_config);

    state
        .indexer
        .store_file_context("math.c", MATH_C)
        .await
        .unwrap();
    state
        .indexer
        .store_file_context("other.c", "void other(void) { }")
        .await
        .unwrap();

    let outcome = state
        .indexer
        .store_file_context("math.c", "int multiply(int a, int b) { return a * b; }")
        .await
        .unwrap();
    assert_eq!(outcome.removed, 2);
    assert_eq!(outcome.functions, 1);

    let mut names = stored_names(&state);
    names.sort();
    assert_eq!(names, vec!["multiply", "other"]);

    // A file with nothing left in it clears its records.
    let outcome = state
        .indexer
        .store_file_context("math.c", "/* emptied */")
        .await
        .unwrap();
    assert_eq!(outcome.removed, 1);
    assert_eq!(stored_names(&state), vec!["other"]);

    state.shutdown().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn empty_store_search_is_empty_without_provider_call(test_config: Config) {
    let state = open_state(test_config);

    let hits = state
        .retriever
        .search_similar_functions("anything", 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
    assert_eq!(state.scheduler.stats().await.unwrap().provider_calls, 0);

    let json = handle_search(&state, "anything", None).await.unwrap();
    assert_eq!(json["count"], 0);

    state.shutdown().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn store_and_cache_survive_restart(test_config: Config) {
    {
        let state = open_state(test_config.clone());
        state
            .indexer
            .store_file_context("math.c", MATH_C)
            .await
            .unwrap();
        state.shutdown().await.unwrap();
    }
    assert!(test_config.store_path.exists());
    assert!(test_config.cache_path.exists());

    let state = open_state(test_config);
    let mut names = stored_names(&state);
    names.sort();
    assert_eq!(names, vec!["add", "subtract"]);

    // Same text again: served from the reloaded cache.
    state
        .indexer
        .store_file_context("math.c", MATH_C)
        .await
        .unwrap();
    let stats = state.scheduler.stats().await.unwrap();
    assert_eq!(stats.provider_calls, 0);
    assert_eq!(stats.cache_hits, 2);

    state.shutdown().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn corrupt_store_snapshot_fails_to_open(test_config: Config) {
    write_source(
        &test_config.base_dir,
        ".fnctx/functions.json",
        "[{\"functionName\": ",
    );
    let err = fn_context_index::handlers::AppState::open(test_config)
        .err()
        .unwrap();
    assert!(format!("{err:#}").contains("function store unavailable"));
}

#[rstest]
#[tokio::test]
async fn corrupt_cache_document_starts_empty(test_config: Config) {
    write_source(
        &test_config.base_dir,
        ".fnctx/embedding-cache.json",
        "not json at all",
    );
    let state = open_state(test_config);
    assert_eq!(state.scheduler.stats().await.unwrap().cache_entries, 0);

    state
        .indexer
        .store_file_context("math.c", MATH_C)
        .await
        .unwrap();
    assert_eq!(state.store.len(), 2);
    state.shutdown().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn debug_and_context_describe_stored_functions(test_config: Config) {
    let state = open_state(test_config);
    state
        .indexer
        .store_file_context("src/drivers/flash.c", FLASH_C)
        .await
        .unwrap();

    let report = state.retriever.debug_info("flash_read_word").await.unwrap();
    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert_eq!(entry.dimension, Some(TEST_DIM));
    assert!(entry.cached);
    assert!((entry.norm.unwrap() - 1.0).abs() < 1e-4);
    assert_eq!(entry.function.return_type, "static uint32_t");

    let text = handle_debug(&state, "flash_read_word").await.unwrap();
    assert!(text.contains("src/drivers/flash.c"));
    assert!(text.contains("cached: true"));

    let missing = state.retriever.debug_info("main").await.unwrap();
    assert!(missing.entries.is_empty());

    let erase = state.store.find_by_name("flash_erase_sector").remove(0);
    let assembled = state
        .retriever
        .assemble_context(&erase.function.content, 2)
        .await
        .unwrap();
    assert_eq!(assembled.items.len(), 2);
    assert!(assembled.context.starts_with("// src/drivers/flash.c:"));
    assert!(assembled.context.contains("flash_erase_sector (distance 0.000)"));
    assert!(assembled.context.contains("void flash_erase_sector(uint32_t sector)"));

    let stats = handle_stats(&state).await.unwrap();
    assert_eq!(stats["storeSize"], 2);
    assert_eq!(stats["scheduler"]["cacheMisses"], 2);
    assert_eq!(stats["scheduler"]["cacheHits"], 1);

    state.shutdown().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn operations_after_shutdown_report_closed_scheduler(test_config: Config) {
    let state = open_state(test_config);
    state.shutdown().await.unwrap();

    let err = state
        .indexer
        .store_file_context("math.c", MATH_C)
        .await
        .unwrap_err();
    assert!(matches!(err, ContextError::SchedulerClosed));
    assert!(state.store.is_empty());
}

//! rstest fixtures for integration tests
//!
//! Fixtures build isolated directories and configurations. The `AppState`
//! itself is opened inside each test body (see `helpers::open_state`) because
//! it spawns the batch scheduler onto the test's runtime.
//!
//! # Usage
//!
//! ```rust
//! use crate::support::fixtures::*;
//!
//! #[rstest]
//! #[tokio::test]
//! async fn my_test(test_config: Config) {
//!     let state = open_state(test_config.clone());
//!     assert!(state.store.is_empty());
//! }
//! ```

use fn_context_index::config::{Config, EmbeddingsBackend};
use rstest::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unique counter for creating isolated test directories
static FIXTURE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub const TEST_DIM: usize = 32;

/// Creates a unique temporary directory for test isolation
#[fixture]
pub fn tmp_dir() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let c = FIXTURE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("fnctx-fixture-test-{nanos}-{c}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Configuration rooted at `tmp_dir` using the hash embedder and short
/// batching windows.
#[fixture]
pub fn test_config(tmp_dir: PathBuf) -> Config {
    let base_dir = tmp_dir.canonicalize().unwrap_or_else(|_| tmp_dir.clone());
    Config {
        cache_path: base_dir.join(".fnctx/embedding-cache.json"),
        store_path: base_dir.join(".fnctx/functions.json"),
        base_dir,
        embeddings_backend: EmbeddingsBackend::Hash,
        openai_api_key: None,
        embeddings_model: "hash".to_string(),
        embeddings_api_url: String::new(),
        embedding_dim: TEST_DIM,
        embedding_batch_size: 10,
        batch_window: Duration::from_millis(10),
        batch_backoff: Duration::from_millis(20),
        provider_max_retries: 1,
        provider_timeout: Duration::from_secs(5),
        cache_ttl: Duration::from_secs(3600),
        cache_flush_every: 0,
        search_limit: 5,
        max_context_bytes: 200_000,
    }
}

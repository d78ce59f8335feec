use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const OPENAI_EMBEDDING_DIM: usize = 1536;
pub const DEFAULT_HASH_EMBEDDING_DIM: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingsBackend {
    OpenAi,
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub base_dir: PathBuf,
    pub cache_path: PathBuf,
    pub store_path: PathBuf,
    pub embeddings_backend: EmbeddingsBackend,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub embeddings_model: String,
    pub embeddings_api_url: String,
    pub embedding_dim: usize,

    // Batching
    pub embedding_batch_size: usize,
    pub batch_window: Duration,
    pub batch_backoff: Duration,
    pub provider_max_retries: u32,
    pub provider_timeout: Duration,

    // Cache
    pub cache_ttl: Duration,
    pub cache_flush_every: usize,

    // Retrieval
    pub search_limit: usize,
    pub max_context_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base_dir = match optional_env("BASE_DIR") {
            Some(raw) => canonicalize_dir(Path::new(&raw))
                .with_context(|| format!("Invalid BASE_DIR: {raw}"))?,
            None => canonicalize_dir(&env::current_dir().context("Failed to get current_dir")?)?,
        };

        let cache_path = default_path(&base_dir, "CACHE_PATH", "./.fnctx/embedding-cache.json");
        let store_path = default_path(&base_dir, "STORE_PATH", "./.fnctx/functions.json");

        let openai_api_key = optional_env("OPENAI_API_KEY");
        let embeddings_backend = match optional_env("EMBEDDINGS_BACKEND").as_deref() {
            Some(raw) => parse_embeddings_backend(raw)?,
            None if openai_api_key.is_some() => EmbeddingsBackend::OpenAi,
            None => EmbeddingsBackend::Hash,
        };
        if embeddings_backend == EmbeddingsBackend::OpenAi && openai_api_key.is_none() {
            return Err(anyhow!("OPENAI_API_KEY is required when EMBEDDINGS_BACKEND=openai"));
        }

        let embedding_dim = match optional_env("EMBEDDINGS_DIM") {
            Some(raw) => parse_positive_usize("EMBEDDINGS_DIM", &raw)?,
            None => match embeddings_backend {
                EmbeddingsBackend::OpenAi => OPENAI_EMBEDDING_DIM,
                EmbeddingsBackend::Hash => optional_env("HASH_EMBEDDING_DIM")
                    .as_deref()
                    .map(|v| parse_positive_usize("HASH_EMBEDDING_DIM", v))
                    .transpose()?
                    .unwrap_or(DEFAULT_HASH_EMBEDDING_DIM),
            },
        };

        let embeddings_model = optional_env("EMBEDDINGS_MODEL").unwrap_or_else(|| {
            match embeddings_backend {
                EmbeddingsBackend::OpenAi => DEFAULT_OPENAI_MODEL.to_string(),
                EmbeddingsBackend::Hash => "hash".to_string(),
            }
        });
        let embeddings_api_url =
            optional_env("EMBEDDINGS_API_URL").unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());

        let embedding_batch_size = optional_env("EMBEDDING_BATCH_SIZE")
            .as_deref()
            .map(|v| parse_positive_usize("EMBEDDING_BATCH_SIZE", v))
            .transpose()?
            .unwrap_or(10);

        let batch_window = Duration::from_millis(env_u64("BATCH_WINDOW_MS", 100)?);
        let batch_backoff = Duration::from_millis(env_u64("BATCH_BACKOFF_MS", 1000)?);
        let provider_max_retries = optional_env("PROVIDER_MAX_RETRIES")
            .as_deref()
            .map(parse_u32)
            .transpose()?
            .unwrap_or(3);
        let provider_timeout = Duration::from_secs(env_u64("PROVIDER_TIMEOUT_SECS", 30)?);

        let cache_ttl = Duration::from_secs(env_u64("CACHE_TTL_SECS", 7 * 24 * 60 * 60)?);
        let cache_flush_every = optional_env("CACHE_FLUSH_EVERY")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(50);

        let search_limit = optional_env("SEARCH_LIMIT")
            .as_deref()
            .map(|v| parse_positive_usize("SEARCH_LIMIT", v))
            .transpose()?
            .unwrap_or(5);
        let max_context_bytes = optional_env("MAX_CONTEXT_BYTES")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(200_000);

        Ok(Self {
            base_dir,
            cache_path,
            store_path,
            embeddings_backend,
            openai_api_key,
            embeddings_model,
            embeddings_api_url,
            embedding_dim,
            embedding_batch_size,
            batch_window,
            batch_backoff,
            provider_max_retries,
            provider_timeout,
            cache_ttl,
            cache_flush_every,
            search_limit,
            max_context_bytes,
        })
    }

    pub fn normalize_path_to_base(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Path used as a record's `filePath`: relative to `base_dir` when the
    /// file lives under it, otherwise as given.
    pub fn path_relative_to_base(&self, path: &Path) -> String {
        let abs = self.normalize_path_to_base(path);
        let abs = abs.canonicalize().unwrap_or(abs);
        match abs.strip_prefix(&self.base_dir) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|v| {
        let v = v.trim().to_string();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    })
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    optional_env(key)
        .as_deref()
        .map(parse_u64)
        .transpose()
        .with_context(|| format!("Invalid {key}"))
        .map(|v| v.unwrap_or(default))
}

fn canonicalize_dir(path: &Path) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .context("Failed to get current_dir")?
            .join(path)
    };
    let meta = std::fs::metadata(&path)
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    if !meta.is_dir() {
        return Err(anyhow!("Expected directory, got file: {}", path.display()));
    }
    path.canonicalize()
        .with_context(|| format!("Failed to canonicalize: {}", path.display()))
}

fn default_path(base_dir: &Path, key: &str, default_rel: &str) -> PathBuf {
    let raw = optional_env(key).unwrap_or_else(|| default_rel.to_string());
    let path = Path::new(&raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn parse_embeddings_backend(value: &str) -> Result<EmbeddingsBackend> {
    match value.trim().to_lowercase().as_str() {
        "openai" => Ok(EmbeddingsBackend::OpenAi),
        "hash" => Ok(EmbeddingsBackend::Hash),
        other => Err(anyhow!("Invalid EMBEDDINGS_BACKEND: {other}")),
    }
}

fn parse_usize(value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

fn parse_positive_usize(key: &str, value: &str) -> Result<usize> {
    match parse_usize(value)? {
        0 => Err(anyhow!("{key} must be greater than zero")),
        v => Ok(v),
    }
}

fn parse_u64(value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

fn parse_u32(value: &str) -> Result<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

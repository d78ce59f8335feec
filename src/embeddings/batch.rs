//! Request coalescing in front of an [`Embedder`].
//!
//! A single worker task owns the [`EmbeddingCache`], the pending-request map
//! and the FIFO queue. Callers talk to it through a cloneable
//! [`BatchScheduler`] handle, so there is exactly one writer for every piece
//! of batching state and no locking.
//!
//! The worker cycles through three phases:
//!
//! - `Idle`: nothing queued, no timer.
//! - `Accumulating`: the first novel request armed a short coalescing
//!   window; more requests may join until it elapses.
//! - `Flushing`: one provider call is in flight for up to `batch_size`
//!   queued texts.
//!
//! After a successful call the worker returns to `Accumulating` with the
//! normal window if anything is still queued. After a failed call it uses the
//! longer backoff window instead.

use anyhow::{anyhow, Context, Result};
use futures::future::{BoxFuture, OptionFuture};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::embeddings::cache::{content_hash, EmbeddingCache};
use crate::embeddings::Embedder;
use crate::error::{EmbedError, ProviderError};

const COMMAND_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub window: Duration,
    pub backoff: Duration,
    pub max_retries: u32,
    /// Flush the cache document every N successful puts. 0 disables it.
    pub flush_every: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            window: Duration::from_millis(100),
            backoff: Duration::from_millis(1000),
            max_retries: 3,
            flush_every: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub provider_calls: u64,
    pub texts_sent: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Requests attached to an already pending request for the same text.
    pub coalesced: u64,
    pub failed_batches: u64,
    pub retries: u64,
    pub cache_entries: usize,
    pub pending: usize,
}

type EmbedReply = oneshot::Sender<Result<Vec<f32>, EmbedError>>;

enum Command {
    Embed { text: String, reply: EmbedReply },
    Cached { text: String, reply: oneshot::Sender<bool> },
    Flush { reply: oneshot::Sender<Result<(), String>> },
    Stats { reply: oneshot::Sender<SchedulerStats> },
    Shutdown { reply: oneshot::Sender<Result<(), String>> },
}

/// Handle to the batching worker. Cheap to clone.
#[derive(Clone)]
pub struct BatchScheduler {
    tx: mpsc::Sender<Command>,
}

impl BatchScheduler {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(provider: Arc<dyn Embedder>, cache: EmbeddingCache, config: BatchConfig) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = Worker {
            provider,
            cache,
            config: BatchConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            pending: HashMap::new(),
            queue: VecDeque::new(),
            phase: Phase::Idle,
            stats: SchedulerStats::default(),
            puts_since_flush: 0,
            closing: false,
            shutdown_waiters: Vec::new(),
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    pub async fn embed(&self, text: impl Into<String>) -> Result<Vec<f32>, EmbedError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Embed {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| EmbedError::SchedulerClosed)?;
        rx.await.map_err(|_| EmbedError::SchedulerClosed)?
    }

    /// Embed several texts concurrently. Output order matches `texts`.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        futures::future::try_join_all(texts.iter().map(|t| self.embed(t.clone()))).await
    }

    /// Whether a live cache entry exists for `text`.
    pub async fn is_cached(&self, text: impl Into<String>) -> Result<bool, EmbedError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Cached {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| EmbedError::SchedulerClosed)?;
        rx.await.map_err(|_| EmbedError::SchedulerClosed)
    }

    /// Write the cache document now.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush { reply })
            .await
            .map_err(|_| anyhow!(EmbedError::SchedulerClosed))?;
        rx.await
            .map_err(|_| anyhow!(EmbedError::SchedulerClosed))?
            .map_err(anyhow::Error::msg)
    }

    pub async fn stats(&self) -> Result<SchedulerStats, EmbedError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Stats { reply })
            .await
            .map_err(|_| EmbedError::SchedulerClosed)?;
        rx.await.map_err(|_| EmbedError::SchedulerClosed)
    }

    /// Drain queued requests, write the cache document and stop the worker.
    ///
    /// Calling it again after the worker stopped is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).await.is_err() {
            return Ok(());
        }
        match rx.await {
            Ok(outcome) => outcome.map_err(anyhow::Error::msg),
            Err(_) => Ok(()),
        }
    }
}

struct PendingRequest {
    text: String,
    waiters: Vec<EmbedReply>,
    attempts: u32,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Accumulating { deadline: Instant },
    Flushing,
}

struct BatchOutcome {
    hashes: Vec<String>,
    result: Result<Vec<Vec<f32>>, ProviderError>,
}

struct Worker {
    provider: Arc<dyn Embedder>,
    cache: EmbeddingCache,
    config: BatchConfig,
    pending: HashMap<String, PendingRequest>,
    queue: VecDeque<String>,
    phase: Phase,
    stats: SchedulerStats,
    puts_since_flush: usize,
    closing: bool,
    shutdown_waiters: Vec<oneshot::Sender<Result<(), String>>>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut in_flight: Option<BoxFuture<'static, BatchOutcome>> = None;
        let mut rx_open = true;

        loop {
            let deadline = match self.phase {
                Phase::Accumulating { deadline } if in_flight.is_none() => Some(deadline),
                _ => None,
            };

            tokio::select! {
                cmd = rx.recv(), if rx_open => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        rx_open = false;
                        self.begin_shutdown();
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    in_flight = self.start_batch();
                }
                outcome = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                    in_flight = None;
                    if let Some(outcome) = outcome {
                        self.complete_batch(outcome).await;
                    }
                }
                else => break,
            }

            if self.closing && in_flight.is_none() && self.queue.is_empty() {
                break;
            }
        }

        let outcome = self.flush_cache().await.map_err(|e| format!("{e:#}"));
        match &outcome {
            Ok(()) => tracing::info!(entries = self.cache.len(), "Embedding scheduler stopped, cache flushed"),
            Err(e) => tracing::error!(error = %e, "Failed to flush embedding cache on shutdown"),
        }
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Embed { text, reply } => self.enqueue(text, reply),
            Command::Cached { text, reply } => {
                let _ = reply.send(self.cache.contains_hashed(&content_hash(&text)));
            }
            Command::Flush { reply } => {
                let outcome = self.flush_cache().await.map_err(|e| format!("{e:#}"));
                if outcome.is_ok() {
                    self.puts_since_flush = 0;
                }
                let _ = reply.send(outcome);
            }
            Command::Stats { reply } => {
                let cache = self.cache.stats();
                let _ = reply.send(SchedulerStats {
                    cache_hits: cache.hits,
                    cache_misses: cache.misses,
                    cache_entries: cache.entries,
                    pending: self.pending.len(),
                    ..self.stats
                });
            }
            Command::Shutdown { reply } => {
                self.shutdown_waiters.push(reply);
                self.begin_shutdown();
            }
        }
    }

    fn enqueue(&mut self, text: String, reply: EmbedReply) {
        if self.closing {
            let _ = reply.send(Err(EmbedError::SchedulerClosed));
            return;
        }

        let hash = content_hash(&text);
        if let Some(vector) = self.cache.get_hashed(&hash) {
            let _ = reply.send(Ok(vector));
            return;
        }
        if let Some(pending) = self.pending.get_mut(&hash) {
            self.stats.coalesced += 1;
            pending.waiters.push(reply);
            return;
        }

        self.pending.insert(
            hash.clone(),
            PendingRequest {
                text,
                waiters: vec![reply],
                attempts: 0,
            },
        );
        self.queue.push_back(hash);
        if matches!(self.phase, Phase::Idle) {
            self.phase = Phase::Accumulating {
                deadline: self.next_deadline(false),
            };
        }
    }

    fn begin_shutdown(&mut self) {
        self.closing = true;
        // Drain without waiting out the coalescing window.
        if let Phase::Accumulating { deadline } = self.phase {
            let now = Instant::now();
            if deadline > now {
                self.phase = Phase::Accumulating { deadline: now };
            }
        }
    }

    /// Serializes on the worker; the file write runs on the blocking pool.
    async fn flush_cache(&mut self) -> Result<()> {
        let Some(snapshot) = self.cache.snapshot_for_disk()? else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || snapshot.write())
            .await
            .context("Join error in cache flush")?
    }

    fn next_deadline(&self, after_failure: bool) -> Instant {
        let now = Instant::now();
        if after_failure {
            now + self.config.backoff
        } else if self.closing {
            now
        } else {
            now + self.config.window
        }
    }

    fn start_batch(&mut self) -> Option<BoxFuture<'static, BatchOutcome>> {
        let mut hashes = Vec::with_capacity(self.config.batch_size);
        let mut texts = Vec::with_capacity(self.config.batch_size);
        while hashes.len() < self.config.batch_size {
            let Some(hash) = self.queue.pop_front() else {
                break;
            };
            if let Some(pending) = self.pending.get(&hash) {
                texts.push(pending.text.clone());
                hashes.push(hash);
            }
        }

        if hashes.is_empty() {
            self.phase = Phase::Idle;
            return None;
        }

        self.phase = Phase::Flushing;
        self.stats.provider_calls += 1;
        self.stats.texts_sent += texts.len() as u64;
        tracing::debug!(size = texts.len(), queued = self.queue.len(), "Flushing embedding batch");

        let provider = Arc::clone(&self.provider);
        Some(Box::pin(async move {
            let result = provider.embed(&texts).await;
            BatchOutcome { hashes, result }
        }))
    }

    async fn complete_batch(&mut self, outcome: BatchOutcome) {
        let BatchOutcome { hashes, result } = outcome;
        let result = result.and_then(|vectors| validate(vectors, hashes.len(), self.provider.dim()));

        match result {
            Ok(vectors) => {
                for (hash, vector) in hashes.iter().zip(&vectors) {
                    self.cache.put_hashed(hash.clone(), vector.clone());
                }
                self.puts_since_flush += vectors.len();
                if self.config.flush_every > 0 && self.puts_since_flush >= self.config.flush_every {
                    match self.flush_cache().await {
                        Ok(()) => self.puts_since_flush = 0,
                        Err(e) => tracing::warn!(error = %format!("{e:#}"), "Periodic cache flush failed"),
                    }
                }
                for (hash, vector) in hashes.into_iter().zip(vectors) {
                    if let Some(pending) = self.pending.remove(&hash) {
                        for waiter in pending.waiters {
                            let _ = waiter.send(Ok(vector.clone()));
                        }
                    }
                }
                self.phase = if self.queue.is_empty() {
                    Phase::Idle
                } else {
                    Phase::Accumulating {
                        deadline: self.next_deadline(false),
                    }
                };
            }
            Err(err) => {
                self.stats.failed_batches += 1;
                if err.is_retryable() {
                    self.requeue_or_reject(hashes, err);
                } else {
                    tracing::error!(error = %err, size = hashes.len(), "Embedding batch failed");
                    for hash in hashes {
                        self.reject(&hash, &err);
                    }
                }
                self.phase = if self.queue.is_empty() {
                    Phase::Idle
                } else {
                    Phase::Accumulating {
                        deadline: self.next_deadline(true),
                    }
                };
            }
        }
    }

    fn requeue_or_reject(&mut self, hashes: Vec<String>, err: ProviderError) {
        let mut retry = Vec::new();
        for hash in hashes {
            let attempts = match self.pending.get_mut(&hash) {
                Some(pending) if pending.attempts < self.config.max_retries => {
                    pending.attempts += 1;
                    pending.attempts
                }
                Some(_) => {
                    self.reject(&hash, &err);
                    continue;
                }
                None => continue,
            };
            tracing::warn!(error = %err, attempt = attempts, "Transient provider failure, retrying after backoff");
            retry.push(hash);
        }
        self.stats.retries += retry.len() as u64;
        for hash in retry.into_iter().rev() {
            self.queue.push_front(hash);
        }
    }

    fn reject(&mut self, hash: &str, err: &ProviderError) {
        if let Some(pending) = self.pending.remove(hash) {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(EmbedError::Provider(err.clone())));
            }
        }
    }
}

fn validate(vectors: Vec<Vec<f32>>, expected: usize, dim: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::Malformed(format!(
            "provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(ProviderError::Malformed(format!(
            "provider returned a vector of dimension {}, expected {}",
            bad.len(),
            dim
        )));
    }
    Ok(vectors)
}

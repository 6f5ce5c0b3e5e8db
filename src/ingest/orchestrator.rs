//! Batched, bounded-concurrency embedding with per-batch retry
//!
//! Chunks are cut into fixed-size batches that are embedded with at most
//! `max_workers` requests in flight. Each finished batch is written to the sink as soon
//! as it completes, through a channel, so writes overlap with the embedding requests
//! still in flight. A batch that still fails after its retries is dropped and the run
//! continues; a failed sink write stops the run.

use super::retry::RetryPolicy;
use crate::config::BatchingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, VectorDbError};
use crate::indexer::Chunk;
use crate::vector_db::ChunkSink;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Outcome of one embedding run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct EmbedReport {
    pub total_chunks: usize,
    pub stored_chunks: usize,
    pub failed_batches: usize,
    /// One message per dropped batch
    pub errors: Vec<String>,
}

/// Snapshot passed to the progress callback after every batch
#[derive(Debug, Clone, Copy)]
pub struct EmbedProgress {
    /// Chunks whose batch has finished, stored or dropped
    pub processed_chunks: usize,
    pub stored_chunks: usize,
    pub total_chunks: usize,
    /// Estimated time left, from the mean latency of completed batches
    pub eta: Option<Duration>,
}

impl EmbedProgress {
    pub fn fraction(&self) -> f32 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        self.processed_chunks as f32 / self.total_chunks as f32
    }
}

pub struct EmbeddingOrchestrator {
    batch_size: usize,
    max_workers: usize,
    retry: RetryPolicy,
}

impl EmbeddingOrchestrator {
    pub fn new(batch_size: usize, max_workers: usize, retry: RetryPolicy) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
            retry,
        }
    }

    pub fn from_config(config: &BatchingConfig) -> Self {
        Self::new(
            config.batch_size,
            config.max_workers,
            RetryPolicy::from_config(config),
        )
    }

    /// Embed `chunks` and write every successful batch to `sink`
    ///
    /// Each chunk belongs to exactly one batch, so it is embedded at most once and
    /// stored at most once. Batches complete in arbitrary order.
    pub async fn run(
        &self,
        chunks: &[Chunk],
        provider: Arc<dyn EmbeddingProvider>,
        sink: &dyn ChunkSink,
        on_progress: &(dyn Fn(EmbedProgress) + Send + Sync),
    ) -> Result<EmbedReport, VectorDbError> {
        let total_chunks = chunks.len();
        let total_batches = total_chunks.div_ceil(self.batch_size);
        let retry = self.retry;

        tracing::info!(
            "Embedding {} chunks in {} batches ({} workers, model {})",
            total_chunks,
            total_batches,
            self.max_workers,
            provider.model_name()
        );

        // Embedding keeps running while the writer awaits the sink
        let (done_tx, mut done_rx) = mpsc::channel(self.max_workers);

        let embed = async move {
            let mut pending = stream::iter(chunks.chunks(self.batch_size).enumerate().map(
                |(index, batch)| {
                    let provider = Arc::clone(&provider);
                    async move {
                        let started = Instant::now();
                        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                        let label = format!("Embedding batch {}/{}", index + 1, total_batches);

                        let result = retry
                            .run(&label, || provider.embed_batch(texts.clone()))
                            .await
                            .and_then(|vectors| check_batch(batch.len(), vectors));

                        (index, batch, result, started.elapsed())
                    }
                    .boxed()
                },
            ).collect::<Vec<_>>())
            .buffer_unordered(self.max_workers);

            while let Some(done) = pending.next().await {
                if done_tx.send(done).await.is_err() {
                    // Writer gave up after a sink failure
                    break;
                }
            }
        };

        let write = async move {
            let mut report = EmbedReport {
                total_chunks,
                ..Default::default()
            };
            let mut completed = 0usize;
            let mut processed_chunks = 0usize;
            let mut latency_total = Duration::ZERO;

            while let Some((index, batch, result, elapsed)) = done_rx.recv().await {
                completed += 1;
                processed_chunks += batch.len();
                latency_total += elapsed;

                match result {
                    Ok(vectors) => {
                        let stored = sink.add_chunks(batch, vectors).await?;
                        report.stored_chunks += stored;
                        tracing::debug!(
                            "Batch {}/{} stored {} chunks in {:?}",
                            index + 1,
                            total_batches,
                            stored,
                            elapsed
                        );
                    }
                    Err(e) => {
                        let message = format!(
                            "batch {}/{} ({} chunks) dropped: {}",
                            index + 1,
                            total_batches,
                            batch.len(),
                            e
                        );
                        tracing::error!("Embedding {}", message);
                        report.failed_batches += 1;
                        report.errors.push(message);
                    }
                }

                on_progress(EmbedProgress {
                    processed_chunks,
                    stored_chunks: report.stored_chunks,
                    total_chunks,
                    eta: estimate_remaining(
                        latency_total,
                        completed,
                        total_batches - completed,
                        self.max_workers,
                    ),
                });
            }

            Ok::<_, VectorDbError>(report)
        };

        let ((), report) = tokio::join!(embed, write);
        let report = report?;

        tracing::info!(
            "Embedding finished: {}/{} chunks stored, {} batches dropped",
            report.stored_chunks,
            report.total_chunks,
            report.failed_batches
        );

        Ok(report)
    }
}

/// One vector per text, all of the same dimension
fn check_batch(expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    if let Some(first) = vectors.first()
        && let Some(bad) = vectors.iter().find(|v| v.len() != first.len())
    {
        return Err(EmbeddingError::DimensionMismatch {
            expected: first.len(),
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

/// Mean batch latency times the number of remaining worker rounds
fn estimate_remaining(
    latency_total: Duration,
    completed: usize,
    remaining: usize,
    workers: usize,
) -> Option<Duration> {
    if completed == 0 {
        return None;
    }
    let mean = latency_total / completed as u32;
    let rounds = remaining.div_ceil(workers.max(1));
    Some(mean * rounds as u32)
}

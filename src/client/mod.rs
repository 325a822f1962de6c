//! Batch Client
//!
//! Drives "replicate existing media" from the outside: issue batch requests
//! until nothing is left, shrinking the batch after failed requests and
//! stopping when progress stalls. The loop can be paused and terminated
//! between requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::api::BatchRequest;
use crate::error::{Error, Result, ILLEGAL_PAIR_MESSAGE};
use crate::id::NodeId;
use crate::replication::{BatchOrchestrator, BatchProgress};

/// Something that can run one batch tick
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn replicate_batch(&self, source: NodeId, target: NodeId, batch_size: usize) -> Result<BatchProgress>;
}

#[async_trait]
impl BatchTransport for BatchOrchestrator {
    async fn replicate_batch(&self, source: NodeId, target: NodeId, batch_size: usize) -> Result<BatchProgress> {
        BatchOrchestrator::replicate_batch(self, source, target, batch_size).await
    }
}

#[async_trait]
impl<T: BatchTransport + ?Sized> BatchTransport for Arc<T> {
    async fn replicate_batch(&self, source: NodeId, target: NodeId, batch_size: usize) -> Result<BatchProgress> {
        (**self).replicate_batch(source, target, batch_size).await
    }
}

/// Batch requests against a remote mediasync server
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn replicate_batch(&self, source: NodeId, target: NodeId, batch_size: usize) -> Result<BatchProgress> {
        let url = format!("{}/replicate/batch", self.base_url);
        let request = BatchRequest {
            source,
            target,
            batch_size: Some(batch_size),
        };

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::TransportTimeout(format!("{} timed out with batch size {}", url, batch_size))
            } else {
                Error::Network(format!("{}: {}", url, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<BatchProgress>()
                .await
                .map_err(|e| Error::Network(format!("Invalid batch response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::BAD_REQUEST && body.trim() == ILLEGAL_PAIR_MESSAGE {
            return Err(Error::IllegalPair {
                source_node: source,
                target,
            });
        }
        Err(Error::Network(format!("HTTP {}: {}", status, body)))
    }
}

/// Control signal for a running loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    Run,
    Pause,
    Terminate,
}

/// How a loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Nothing left to replicate
    Completed(BatchProgress),
    /// Stopped on request; carries the last progress seen
    Terminated(Option<BatchProgress>),
}

/// Loop tuning
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// First batch size
    pub batch_size: usize,
    /// Subtracted from the batch size after a failed request
    pub shrink_step: usize,
    /// Pause before retrying a failed request
    pub retry_delay: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            shrink_step: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Repeats batch requests for one (source, target) pair until done
pub struct BatchLoop<T> {
    transport: T,
    source: NodeId,
    target: NodeId,
    settings: LoopSettings,
    signals: watch::Receiver<LoopSignal>,
}

impl<T: BatchTransport> BatchLoop<T> {
    pub fn new(
        transport: T,
        source: NodeId,
        target: NodeId,
        settings: LoopSettings,
        signals: watch::Receiver<LoopSignal>,
    ) -> Self {
        Self {
            transport,
            source,
            target,
            settings,
            signals,
        }
    }

    /// Run until complete, terminated or failed. `on_progress` sees every
    /// successful response. Only retryable errors shrink the batch and try
    /// again; anything else ends the loop.
    pub async fn run<F>(&mut self, mut on_progress: F) -> Result<LoopOutcome>
    where
        F: FnMut(&BatchProgress) + Send,
    {
        let mut batch_size = self.settings.batch_size.max(1);
        let mut last: Option<BatchProgress> = None;

        loop {
            if !self.wait_for_run().await {
                tracing::info!("Batch loop {} -> {} terminated", self.source, self.target);
                return Ok(LoopOutcome::Terminated(last));
            }

            match self.transport.replicate_batch(self.source, self.target, batch_size).await {
                Ok(progress) => {
                    on_progress(&progress);
                    if progress.is_complete() {
                        return Ok(LoopOutcome::Completed(progress));
                    }
                    if let Some(previous) = last {
                        if previous.not_replicated == progress.not_replicated {
                            tracing::error!(
                                "No progress replicating {} -> {}: {} originals still left",
                                self.source,
                                self.target,
                                progress.not_replicated
                            );
                            return Err(Error::Stagnation {
                                not_replicated: progress.not_replicated,
                            });
                        }
                    }
                    last = Some(progress);
                }
                Err(e @ Error::IllegalPair { .. }) => return Err(e),
                Err(e) if !e.is_retryable() => {
                    tracing::error!("Batch request failed: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    let step = self.settings.shrink_step;
                    if step == 0 || batch_size <= step {
                        tracing::error!("Batch request failed at batch size {}: {}", batch_size, e);
                        return Err(e);
                    }
                    batch_size -= step;
                    tracing::warn!("Batch request failed ({}), retrying with batch size {}", e, batch_size);
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }

    /// Block while paused; false once terminated
    async fn wait_for_run(&mut self) -> bool {
        loop {
            let signal = *self.signals.borrow_and_update();
            match signal {
                LoopSignal::Run => return true,
                LoopSignal::Terminate => return false,
                LoopSignal::Pause => {
                    tracing::debug!("Batch loop paused");
                    if self.signals.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

//! Downstream publishing of scrape payloads

use crate::errors::{Result, ScraperError};
use crate::telemetry::Payload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Anything that accepts scrape payloads. `publish` may wait, which slows
/// the calling scraper down.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    async fn publish(&self, payload: Payload) -> Result<()>;
}

#[async_trait]
impl PayloadSink for mpsc::Sender<Payload> {
    async fn publish(&self, payload: Payload) -> Result<()> {
        self.send(payload)
            .await
            .map_err(|_| ScraperError::Publish("publish queue closed".to_string()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: String,
    pub probe: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// What goes over the wire for one payload
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishBatch {
    pub metadata: BatchMetadata,
    pub payload: Payload,
}

impl PublishBatch {
    pub fn new(probe: &str, payload: Payload) -> Self {
        Self {
            metadata: BatchMetadata {
                batch_id: Uuid::new_v4().to_string(),
                probe: probe.to_string(),
                timestamp: Utc::now(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            payload,
        }
    }
}

/// JSON-over-HTTP publisher. One attempt per payload.
#[derive(Debug)]
pub struct HttpPublisher {
    client: Client,
    push_url: String,
    probe_name: String,
    metrics: PublisherMetrics,
}

impl HttpPublisher {
    pub fn new(publisher_url: &str, probe_name: &str, http_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(format!("probe_sidecar/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ScraperError::Http)?;

        Ok(Self {
            client,
            push_url: format!("{}/v1/push", publisher_url.trim_end_matches('/')),
            probe_name: probe_name.to_string(),
            metrics: PublisherMetrics::default(),
        })
    }

    pub fn push_url(&self) -> &str {
        &self.push_url
    }

    async fn send(&self, batch: &PublishBatch) -> Result<()> {
        debug!(
            batch_id = %batch.metadata.batch_id,
            series = batch.payload.time_series.len(),
            streams = batch.payload.streams.len(),
            url = %self.push_url,
            "Publishing payload"
        );

        let response = self.client.post(&self.push_url).json(batch).send().await?;
        handle_response(response, &batch.metadata.batch_id).await
    }

    pub fn metrics(&self) -> PublisherMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl PayloadSink for HttpPublisher {
    async fn publish(&self, payload: Payload) -> Result<()> {
        let batch = PublishBatch::new(&self.probe_name, payload);
        self.metrics.attempts.fetch_add(1, Ordering::Relaxed);

        match self.send(&batch).await {
            Ok(()) => {
                self.metrics.successes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

async fn handle_response(response: Response, batch_id: &str) -> Result<()> {
    let status = response.status();

    if status.is_success() {
        debug!("Batch {} accepted by publisher", batch_id);
        return Ok(());
    }

    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    let message = match status.as_u16() {
        400 => format!("Bad request for batch {}: {}", batch_id, error_body),
        401 | 403 => format!("Publisher refused batch {}: {}", batch_id, error_body),
        404 => format!("Publisher endpoint not found for batch {}: {}", batch_id, error_body),
        413 => format!("Batch {} too large: {}", batch_id, error_body),
        429 => format!("Rate limited for batch {}: {}", batch_id, error_body),
        500..=599 => format!("Publisher server error for batch {}: {}", batch_id, error_body),
        _ => format!("Unexpected response {} for batch {}: {}", status, batch_id, error_body),
    };

    Err(ScraperError::Publish(message))
}

#[derive(Debug, Default)]
struct PublisherMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl PublisherMetrics {
    fn snapshot(&self) -> PublisherMetricsSnapshot {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);

        let success_rate = if attempts > 0 {
            (successes as f64 / attempts as f64) * 100.0
        } else {
            0.0
        };

        PublisherMetricsSnapshot {
            attempts,
            successes,
            failures,
            success_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublisherMetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
}

/// Drain the publish queue until every sender is gone.
pub async fn run_publisher<S: PayloadSink + ?Sized>(mut rx: mpsc::Receiver<Payload>, sink: &S) {
    while let Some(payload) = rx.recv().await {
        if let Err(e) = sink.publish(payload).await {
            error!("Failed to publish payload: {}", e);
        }
    }

    info!("Publish queue closed, publisher stopping");
}

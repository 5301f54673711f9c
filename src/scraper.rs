//! Per-check scrape loop: fetch the prober's debug dump, convert it and
//! publish the result

use crate::check::Check;
use crate::errors::{Result, ScraperError};
use crate::extractor::extract_metrics_and_logs;
use crate::hysteresis::CheckStateMachine;
use crate::logs::convert_logs;
use crate::metrics::{convert_metrics, MetricsOutcome};
use crate::module::{build_module, CheckKind, ProbeModule};
use crate::publisher::PayloadSink;
use crate::schedule::{stopped, OffsetTicker};
use crate::telemetry::{base_labels, LabelPair, Payload};

use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Extra time granted to the prober on top of the check's own timeout.
const PROVIDER_GRACE: Duration = Duration::from_secs(1);

/// Result of a scrape that produced a payload
#[derive(Clone, Debug, PartialEq)]
pub enum ScrapeResult {
    Passed(Payload),
    /// The target failed its probe. The payload still carries the series
    /// converted so far.
    CheckFailed(Payload),
}

/// Owns one check: its module, its provider URL and its pass/fail state.
pub struct Scraper {
    check: Check,
    check_kind: CheckKind,
    probe_name: String,
    endpoint: String,
    provider: Url,
    module_name: String,
    module: ProbeModule,
    base_labels: Vec<LabelPair>,
    client: Client,
    sink: Arc<dyn PayloadSink>,
    state: CheckStateMachine,
}

impl Scraper {
    /// Build the module for `check` and bind it to `provider`.
    pub fn new(
        check: Check,
        sink: Arc<dyn PayloadSink>,
        probe_name: &str,
        mut provider: Url,
        client: Client,
        threshold: u32,
    ) -> Result<Self> {
        if check.frequency == 0 {
            return Err(ScraperError::Config(format!(
                "check {} has a zero frequency",
                check.id
            )));
        }

        let spec = build_module(&check)?;

        provider
            .query_pairs_mut()
            .append_pair("target", &spec.target)
            .append_pair("module", &spec.module_name);

        let base_labels = base_labels(
            check.id,
            spec.check_kind.as_str(),
            &spec.target,
            probe_name,
            &check.labels,
        );

        Ok(Self {
            check,
            check_kind: spec.check_kind,
            probe_name: probe_name.to_string(),
            endpoint: spec.target,
            provider,
            module_name: spec.module_name,
            module: spec.module,
            base_labels,
            client,
            sink,
            state: CheckStateMachine::new(threshold),
        })
    }

    pub fn check(&self) -> &Check {
        &self.check
    }

    pub fn check_kind(&self) -> CheckKind {
        self.check_kind
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn provider(&self) -> &Url {
        &self.provider
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn module(&self) -> &ProbeModule {
        &self.module
    }

    pub fn state(&self) -> &CheckStateMachine {
        &self.state
    }

    /// Run until a stop is requested. The first scrape happens after the
    /// check's offset, then once per frequency. A stop request also aborts
    /// a scrape that is in flight.
    #[instrument(skip_all, fields(check_id = self.check.id, module = %self.module_name))]
    pub async fn run(mut self, mut stop: broadcast::Receiver<()>) {
        info!(
            probe = %self.probe_name,
            endpoint = %self.endpoint,
            provider = %self.provider,
            "starting scraper"
        );

        let mut ticker = OffsetTicker::new(
            Duration::from_millis(self.check.offset),
            Duration::from_millis(self.check.frequency),
        );

        loop {
            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = self.scrape() => {}
            }
        }

        info!(
            probe = %self.probe_name,
            endpoint = %self.endpoint,
            "scraper stopped"
        );
    }

    /// One tick: collect, update pass/fail state, publish.
    pub async fn scrape(&mut self) {
        let result = match self.collect_data(Utc::now()).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    probe = %self.probe_name,
                    endpoint = %self.endpoint,
                    provider = %self.provider,
                    error = %e,
                    "error collecting data"
                );
                return;
            }
        };

        let (probe, endpoint, provider) = (&self.probe_name, &self.endpoint, &self.provider);
        let payload = match result {
            ScrapeResult::CheckFailed(payload) => {
                self.state.record_fail(|| {
                    warn!(probe = %probe, endpoint = %endpoint, provider = %provider, "check entered FAIL state");
                });
                payload
            }
            ScrapeResult::Passed(payload) => {
                self.state.record_pass(|| {
                    info!(probe = %probe, endpoint = %endpoint, provider = %provider, "check entered PASS state");
                });
                payload
            }
        };

        if payload.is_empty() {
            debug!(endpoint = %self.endpoint, "scrape produced no data");
        }

        if let Err(e) = self.sink.publish(payload).await {
            error!(
                probe = %self.probe_name,
                endpoint = %self.endpoint,
                error = %e,
                "error publishing payload"
            );
        }
    }

    /// Fetch the debug dump from the prober and convert it.
    pub async fn collect_data(&self, now: DateTime<Utc>) -> Result<ScrapeResult> {
        let mut url = self.provider.clone();
        url.query_pairs_mut().append_pair("debug", "true");

        let mut request = self.client.get(url);
        if !self.module.timeout.is_zero() {
            request = request.timeout(self.module.timeout + PROVIDER_GRACE);
        }
        let request = request
            .build()
            .map_err(|e| ScraperError::Request(e.to_string()))?;

        let response = self.client.execute(request).await?.error_for_status()?;
        let body = response.bytes().await?;

        let dump = extract_metrics_and_logs(body.as_ref()).map_err(ScraperError::Extraction)?;

        let streams = convert_logs(&dump.logs, &self.base_labels);
        let outcome = convert_metrics(&dump.metrics, now.timestamp_millis(), &self.base_labels)?;

        Ok(match outcome {
            MetricsOutcome::Passed(series) => ScrapeResult::Passed(Payload::new(series, streams)),
            MetricsOutcome::CheckFailed(series) => {
                debug!(
                    check_name = %self.check_kind,
                    probe = %self.probe_name,
                    endpoint = %self.endpoint,
                    "check failed"
                );
                ScrapeResult::CheckFailed(Payload::new(series, streams))
            }
        })
    }
}

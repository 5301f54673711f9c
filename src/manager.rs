//! Lifecycle of the scrapers: one per enabled check

use crate::check::Check;
use crate::errors::Result;
use crate::module::ProbeModule;
use crate::publisher::PayloadSink;
use crate::scraper::Scraper;

use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

struct RunningScraper {
    check: Check,
    module_name: String,
    module: ProbeModule,
    stop_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Creates, replaces and stops scrapers as checks come and go.
pub struct ScraperManager {
    probe_name: String,
    provider: Url,
    client: Client,
    sink: Arc<dyn PayloadSink>,
    threshold: u32,
    scrapers: RwLock<HashMap<i64, RunningScraper>>,
}

impl ScraperManager {
    pub fn new(
        probe_name: &str,
        provider: Url,
        sink: Arc<dyn PayloadSink>,
        threshold: u32,
    ) -> Self {
        Self {
            probe_name: probe_name.to_string(),
            provider,
            client: Client::new(),
            sink,
            threshold,
            scrapers: RwLock::new(HashMap::new()),
        }
    }

    fn start(&self, check: Check) -> Result<RunningScraper> {
        let scraper = Scraper::new(
            check.clone(),
            Arc::clone(&self.sink),
            &self.probe_name,
            self.provider.clone(),
            self.client.clone(),
            self.threshold,
        )?;

        let module_name = scraper.module_name().to_string();
        let module = scraper.module().clone();
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let task = tokio::spawn(scraper.run(stop_rx));

        Ok(RunningScraper {
            check,
            module_name,
            module,
            stop_tx,
            task,
        })
    }

    fn stop(id: i64, running: RunningScraper) -> JoinHandle<()> {
        let _ = running.stop_tx.send(());
        info!(check_id = id, module = %running.module_name, "Stopped scraper");
        running.task
    }

    /// Start scraping a new check. Returns `false` when nothing was
    /// started: the check is disabled or its id is already registered.
    pub async fn add_check(&self, check: Check) -> Result<bool> {
        if !check.enabled {
            info!(check_id = check.id, "Check is disabled, not starting a scraper");
            return Ok(false);
        }

        let mut scrapers = self.scrapers.write().await;
        if scrapers.contains_key(&check.id) {
            warn!(check_id = check.id, "Check already has a scraper");
            return Ok(false);
        }

        let id = check.id;
        let running = self.start(check)?;
        info!(check_id = id, module = %running.module_name, "Added scraper");
        scrapers.insert(id, running);
        Ok(true)
    }

    /// Replace the scraper for a changed check. The old scraper is stopped
    /// first; a disabled check is only stopped.
    pub async fn update_check(&self, check: Check) -> Result<bool> {
        let mut scrapers = self.scrapers.write().await;

        if let Some(old) = scrapers.remove(&check.id) {
            if old.check == check {
                scrapers.insert(check.id, old);
                return Ok(true);
            }
            drop(Self::stop(check.id, old));
        }

        if !check.enabled {
            info!(check_id = check.id, "Check is disabled");
            return Ok(false);
        }

        let id = check.id;
        let running = self.start(check)?;
        info!(check_id = id, module = %running.module_name, "Updated scraper");
        scrapers.insert(id, running);
        Ok(true)
    }

    /// Stop and forget the scraper for a check.
    pub async fn delete_check(&self, id: i64) -> bool {
        let removed = self.scrapers.write().await.remove(&id);
        match removed {
            Some(running) => {
                drop(Self::stop(id, running));
                true
            }
            None => false,
        }
    }

    /// Module configurations by module name, for registration with the
    /// prober.
    pub async fn modules(&self) -> HashMap<String, ProbeModule> {
        self.scrapers
            .read()
            .await
            .values()
            .map(|r| (r.module_name.clone(), r.module.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.scrapers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop every scraper and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<(i64, RunningScraper)> = self.scrapers.write().await.drain().collect();
        let tasks: Vec<JoinHandle<()>> = drained
            .into_iter()
            .map(|(id, running)| Self::stop(id, running))
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                warn!("Scraper task ended abnormally: {}", e);
            }
        }

        info!("All scrapers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{DnsRecordType, DnsSettings, IpVersion, PingSettings, Settings};
    use crate::telemetry::Payload;
    use tokio::sync::mpsc;

    fn ping_check(id: i64) -> Check {
        Check {
            id,
            enabled: true,
            offset: 3_600_000,
            frequency: 60_000,
            timeout: 1_000,
            labels: vec![],
            settings: Some(Settings::Ping(PingSettings {
                hostname: "grafana.com".to_string(),
                ip_version: IpVersion::V4,
            })),
        }
    }

    fn manager() -> (ScraperManager, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(4);
        let provider = Url::parse("http://localhost:9115/probe").unwrap();
        (ScraperManager::new("p1", provider, Arc::new(tx), 1), rx)
    }

    #[tokio::test]
    async fn test_add_and_delete() {
        let (manager, _rx) = manager();

        assert!(manager.add_check(ping_check(1)).await.unwrap());
        assert!(!manager.add_check(ping_check(1)).await.unwrap());
        assert_eq!(manager.len().await, 1);

        let modules = manager.modules().await;
        assert!(modules.contains_key("icmp_ip4_1"));

        assert!(manager.delete_check(1).await);
        assert!(!manager.delete_check(1).await);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_disabled_and_unsupported_checks() {
        let (manager, _rx) = manager();

        let mut disabled = ping_check(2);
        disabled.enabled = false;
        assert!(!manager.add_check(disabled).await.unwrap());

        let mut unsupported = ping_check(3);
        unsupported.settings = None;
        assert!(manager.add_check(unsupported).await.is_err());

        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_rebuilds_module() {
        let (manager, _rx) = manager();
        manager.add_check(ping_check(4)).await.unwrap();

        let mut changed = ping_check(4);
        changed.settings = Some(Settings::Dns(DnsSettings {
            server: "8.8.8.8".to_string(),
            name: "grafana.com".to_string(),
            record_type: DnsRecordType::A,
            ip_version: IpVersion::V6,
        }));
        assert!(manager.update_check(changed).await.unwrap());

        let modules = manager.modules().await;
        assert_eq!(modules.len(), 1);
        assert!(modules.contains_key("dns_ip6_4"));

        let mut disabled = ping_check(4);
        disabled.enabled = false;
        assert!(!manager.update_check(disabled).await.unwrap());
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_registers_unknown_check() {
        let (manager, _rx) = manager();
        assert!(manager.update_check(ping_check(5)).await.unwrap());
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (manager, _rx) = manager();
        for id in 1..=3 {
            manager.add_check(ping_check(id)).await.unwrap();
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), manager.shutdown())
            .await
            .unwrap();
        assert!(manager.is_empty().await);
    }
}

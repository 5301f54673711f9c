//! Configuration management for the probe sidecar

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of this probe, attached to every series and stream
    pub probe_name: String,

    /// Probe endpoint of the black-box prober
    pub provider_url: String,

    /// Base URL of the downstream publisher
    pub publisher_url: String,

    /// JSON file holding the check definitions
    pub checks_path: String,

    /// Consecutive results required before a PASS/FAIL edge is logged
    pub hysteresis_threshold: u32,

    /// Capacity of the queue between scrapers and the publisher
    pub publish_queue_size: usize,

    /// HTTP timeout for publisher requests
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe_name: "local".to_string(),
            provider_url: "http://localhost:9115/probe".to_string(),
            publisher_url: "http://localhost:8080".to_string(),
            checks_path: "checks.json".to_string(),
            hysteresis_threshold: 1,
            publish_queue_size: 100,
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(probe_name) = env::var("PROBE_NAME") {
            config.probe_name = probe_name;
        }

        if let Ok(provider_url) = env::var("PROVIDER_URL") {
            config.provider_url = provider_url;
        }

        if let Ok(publisher_url) = env::var("PUBLISHER_URL") {
            config.publisher_url = publisher_url;
        }

        if let Ok(checks_path) = env::var("CHECKS_PATH") {
            config.checks_path = checks_path;
        }

        if let Ok(threshold) = env::var("HYSTERESIS_THRESHOLD") {
            if let Ok(threshold) = threshold.parse() {
                config.hysteresis_threshold = threshold;
            }
        }

        if let Ok(queue_size) = env::var("PUBLISH_QUEUE_SIZE") {
            if let Ok(size) = queue_size.parse() {
                config.publish_queue_size = size;
            }
        }

        if let Ok(timeout) = env::var("HTTP_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.http_timeout = Duration::from_secs(seconds);
            }
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.probe_name.is_empty() {
            return Err("probe_name cannot be empty".to_string());
        }

        Url::parse(&self.provider_url)
            .map_err(|e| format!("invalid provider_url {:?}: {}", self.provider_url, e))?;

        Url::parse(&self.publisher_url)
            .map_err(|e| format!("invalid publisher_url {:?}: {}", self.publisher_url, e))?;

        if self.checks_path.is_empty() {
            return Err("checks_path cannot be empty".to_string());
        }

        if self.publish_queue_size == 0 {
            return Err("publish_queue_size must be greater than 0".to_string());
        }

        Ok(())
    }

    /// The provider endpoint as a parsed URL
    pub fn provider(&self) -> Result<Url, String> {
        Url::parse(&self.provider_url).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hysteresis_threshold, 1);
        assert_eq!(config.provider().unwrap().path(), "/probe");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            probe_name: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            provider_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("provider_url"));

        let config = Config {
            publish_queue_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

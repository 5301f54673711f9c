//! Check definitions as delivered by the control plane

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A single monitoring check: one target, one probe kind, scheduling and labels.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Check {
    pub id: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Delay before the first scrape, in milliseconds
    #[serde(default)]
    pub offset: u64,
    /// Scrape period, in milliseconds
    pub frequency: u64,
    /// Probe timeout, in milliseconds
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub labels: Vec<CheckLabel>,
    #[serde(default)]
    pub settings: Option<Settings>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckLabel {
    pub name: String,
    pub value: String,
}

/// Probe-specific settings. Exactly one kind per check.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Settings {
    Ping(PingSettings),
    Http(HttpSettings),
    Dns(DnsSettings),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PingSettings {
    pub hostname: String,
    #[serde(default)]
    pub ip_version: IpVersion,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub body: String,
    /// Raw `Name: value` header lines
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub ip_version: IpVersion,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsSettings {
    /// Resolver under test
    pub server: String,
    /// Name to query for
    pub name: String,
    #[serde(default)]
    pub record_type: DnsRecordType,
    #[serde(default)]
    pub ip_version: IpVersion,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
    #[default]
    Any,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
            HttpMethod::Head => write!(f, "HEAD"),
            HttpMethod::Options => write!(f, "OPTIONS"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    #[default]
    A,
    Aaaa,
    Cname,
    Mx,
    Ns,
    Ptr,
    Soa,
    Srv,
    Txt,
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DnsRecordType::A => "A",
            DnsRecordType::Aaaa => "AAAA",
            DnsRecordType::Cname => "CNAME",
            DnsRecordType::Mx => "MX",
            DnsRecordType::Ns => "NS",
            DnsRecordType::Ptr => "PTR",
            DnsRecordType::Soa => "SOA",
            DnsRecordType::Srv => "SRV",
            DnsRecordType::Txt => "TXT",
        };
        f.write_str(name)
    }
}

/// Load check definitions from a JSON array on disk.
pub fn load_checks(path: impl AsRef<Path>) -> Result<Vec<Check>> {
    let data = std::fs::read_to_string(path)?;
    let checks = serde_json::from_str(&data)?;
    Ok(checks)
}

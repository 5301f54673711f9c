//! Mapping from a check definition to a prober module

use crate::check::{Check, IpVersion, Settings};
use crate::errors::{Result, ScraperError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Prober kinds understood by the black-box prober
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProberKind {
    Icmp,
    Http,
    Dns,
}

impl fmt::Display for ProberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProberKind::Icmp => write!(f, "icmp"),
            ProberKind::Http => write!(f, "http"),
            ProberKind::Dns => write!(f, "dns"),
        }
    }
}

/// The `check_name` label value for each check kind
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Ping,
    Http,
    Dns,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Ping => "ping",
            CheckKind::Http => "http",
            CheckKind::Dns => "dns",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct IcmpProbe {
    pub preferred_ip_protocol: String,
    pub ip_protocol_fallback: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpProbe {
    pub preferred_ip_protocol: String,
    pub ip_protocol_fallback: bool,
    pub method: String,
    pub body: String,
    pub headers: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DnsProbe {
    pub preferred_ip_protocol: String,
    pub ip_protocol_fallback: bool,
    pub query_name: String,
    pub query_type: String,
    pub transport_protocol: String,
}

/// Prober-specific part of a module
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeSettings {
    Icmp(IcmpProbe),
    Http(HttpProbe),
    Dns(DnsProbe),
}

/// Prober configuration derived from one version of a check.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProbeModule {
    pub prober: ProberKind,
    pub timeout: Duration,
    pub settings: ProbeSettings,
}

impl ProbeModule {
    pub fn ip_protocol(&self) -> &str {
        match &self.settings {
            ProbeSettings::Icmp(icmp) => &icmp.preferred_ip_protocol,
            ProbeSettings::Http(http) => &http.preferred_ip_protocol,
            ProbeSettings::Dns(dns) => &dns.preferred_ip_protocol,
        }
    }
}

/// Everything a scraper needs from module building
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleSpec {
    /// What the prober is pointed at (hostname, URL or resolver)
    pub target: String,
    pub check_kind: CheckKind,
    /// Registration key, unique per check id
    pub module_name: String,
    pub module: ProbeModule,
}

/// Resolve an IP version into (preferred protocol, fallback allowed).
pub fn ip_protocol(version: IpVersion) -> (&'static str, bool) {
    match version {
        IpVersion::V4 => ("ip4", false),
        IpVersion::V6 => ("ip6", false),
        IpVersion::Any => ("ip6", true),
        IpVersion::Unknown => ("", false),
    }
}

/// Split `Name: value` header lines into a map; later names win.
fn parse_headers(headers: &[String]) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(headers.len());
    for header in headers {
        let (name, value) = match header.split_once(':') {
            Some((name, value)) => (name, value.trim_start_matches(' ')),
            None => (header.as_str(), ""),
        };
        map.insert(name.to_string(), value.to_string());
    }
    map
}

/// Build the prober module for a check.
pub fn build_module(check: &Check) -> Result<ModuleSpec> {
    let timeout = Duration::from_millis(check.timeout);

    let (target, check_kind, settings) = match &check.settings {
        Some(Settings::Ping(ping)) => {
            let (protocol, fallback) = ip_protocol(ping.ip_version);
            let icmp = IcmpProbe {
                preferred_ip_protocol: protocol.to_string(),
                ip_protocol_fallback: fallback,
            };
            (ping.hostname.clone(), CheckKind::Ping, ProbeSettings::Icmp(icmp))
        }
        Some(Settings::Http(http)) => {
            let (protocol, fallback) = ip_protocol(http.ip_version);
            let probe = HttpProbe {
                preferred_ip_protocol: protocol.to_string(),
                ip_protocol_fallback: fallback,
                method: http.method.to_string(),
                body: http.body.clone(),
                headers: parse_headers(&http.headers),
            };
            (http.url.clone(), CheckKind::Http, ProbeSettings::Http(probe))
        }
        Some(Settings::Dns(dns)) => {
            // The DNS prober tests the resolver, so the server is the target
            // and the query travels in the module.
            let (protocol, fallback) = ip_protocol(dns.ip_version);
            let probe = DnsProbe {
                preferred_ip_protocol: protocol.to_string(),
                ip_protocol_fallback: fallback,
                query_name: dns.name.clone(),
                query_type: dns.record_type.to_string(),
                transport_protocol: "udp".to_string(),
            };
            (dns.server.clone(), CheckKind::Dns, ProbeSettings::Dns(probe))
        }
        None => return Err(ScraperError::UnsupportedCheckKind(check.id)),
    };

    let prober = match settings {
        ProbeSettings::Icmp(_) => ProberKind::Icmp,
        ProbeSettings::Http(_) => ProberKind::Http,
        ProbeSettings::Dns(_) => ProberKind::Dns,
    };

    let module = ProbeModule {
        prober,
        timeout,
        settings,
    };

    let module_name = format!("{}_{}_{}", prober, module.ip_protocol(), check.id);

    Ok(ModuleSpec {
        target,
        check_kind,
        module_name,
        module,
    })
}

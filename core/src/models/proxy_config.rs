//! Normalized proxy configuration model
//!
//! One shape for every native proxy subsystem. Backends read their native
//! state and fold it into [`ProxyConfig`]; the control plane serializes it
//! as-is.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Protocols a manual proxy server can be configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "http_server")]
    Http,
    #[serde(rename = "https_server")]
    Https,
    #[serde(rename = "socks_server")]
    Socks,
    #[serde(rename = "ftp_server")]
    Ftp,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Http,
        Protocol::Https,
        Protocol::Socks,
        Protocol::Ftp,
    ];

    /// Short scheme-like name ("http", "socks", ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks => "socks",
            Protocol::Ftp => "ftp",
        }
    }

    /// Key used in the serialized `servers` map
    pub fn server_key(&self) -> &'static str {
        match self {
            Protocol::Http => "http_server",
            Protocol::Https => "https_server",
            Protocol::Socks => "socks_server",
            Protocol::Ftp => "ftp_server",
        }
    }
}

/// Manual proxy section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualProxy {
    /// Manual proxy active
    #[serde(rename = "enable")]
    pub enabled: bool,
    /// One address serves every protocol
    pub same_for_all: bool,
    /// Per-protocol `host:port`; absent or empty means not configured
    pub servers: BTreeMap<Protocol, String>,
    /// Comma-joined bypass patterns, native order preserved
    pub bypass: String,
}

/// Proxy auto-config section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacProxy {
    #[serde(rename = "enable")]
    pub enabled: bool,
    pub url: String,
}

/// Effective proxy settings of the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub proxy: ManualProxy,
    pub pac: PacProxy,
}

impl ProxyConfig {
    /// Configured server for `protocol`, empty when unset
    pub fn server(&self, protocol: Protocol) -> &str {
        self.proxy
            .servers
            .get(&protocol)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Store a server, dropping the entry when it normalizes to empty
    pub fn set_server(&mut self, protocol: Protocol, server: String) {
        if server.is_empty() {
            self.proxy.servers.remove(&protocol);
        } else {
            self.proxy.servers.insert(protocol, server);
        }
    }
}

/// A validated `host:port` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: String,
}

impl ServerAddr {
    /// Split on the last colon and validate both halves.
    ///
    /// Returns `None` for an empty host, an unbracketed IPv6 host, an empty
    /// or non-numeric port, or a zero port.
    pub fn parse(server: &str) -> Option<Self> {
        let (host, port) = server.rsplit_once(':')?;
        if host.is_empty() || !is_valid_port(port) || !is_valid_host(host) {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            port: port.to_string(),
        })
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// An IPv6 literal must be bracketed, otherwise the port split is ambiguous.
fn is_valid_host(host: &str) -> bool {
    match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').is_some_and(|ip| !ip.is_empty()),
        None => !host.contains(':') && !host.contains(']'),
    }
}

fn is_valid_port(port: &str) -> bool {
    !port.is_empty()
        && port.bytes().all(|b| b.is_ascii_digit())
        && port.parse::<u16>().map(|p| p != 0).unwrap_or(false)
}

/// Join a host and port read from native output.
///
/// Both halves are stripped of quoting first; anything malformed collapses
/// to an empty string rather than a half-filled address. A bare IPv6 host
/// is bracketed so the result parses back to the same host.
pub fn format_server(host: &str, port: &str) -> String {
    let host = clean_output(host);
    let port = clean_output(port);
    if host.is_empty() || !is_valid_port(&port) {
        return String::new();
    }
    if host.contains(':') && !host.starts_with('[') {
        return format!("[{host}]:{port}");
    }
    format!("{host}:{port}")
}

/// Strip whitespace and the quotes native tools wrap values in.
pub fn clean_output(raw: &str) -> String {
    raw.trim_matches(|c: char| matches!(c, '\'' | '"') || c.is_whitespace())
        .to_string()
}

/// Normalize a loosely formatted server string ("host:port" with optional
/// quoting) to `host:port` or empty.
pub fn normalize_server(raw: &str) -> String {
    let cleaned = clean_output(raw);
    match cleaned.rsplit_once(':') {
        Some((host, port)) => format_server(host, port),
        None => String::new(),
    }
}

/// Split a comma-joined bypass list, trimming entries and dropping blanks.
pub fn split_bypass(bypass: &str) -> Vec<String> {
    bypass
        .split(',')
        .map(clean_output)
        .filter(|item| !item.is_empty())
        .collect()
}

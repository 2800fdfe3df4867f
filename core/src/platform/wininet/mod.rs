//! Windows backend: WinINet per-connection option lists.
//!
//! An intent becomes one option list, applied in a single call to every
//! registered connection and to the default LAN connection. The native store
//! sits behind [`ConnectionOptionStore`]; translation and parsing here are
//! platform independent.

use crate::engine::{IssueMode, ProxyBackend, SysProxyError, Target};
use crate::models::{normalize_server, split_bypass, Protocol, ProxyConfig, ServerAddr};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

#[cfg(windows)]
mod ffi;
#[cfg(windows)]
pub use ffi::WinInetStore;

pub const PROXY_TYPE_DIRECT: u32 = 0x1;
pub const PROXY_TYPE_PROXY: u32 = 0x2;
pub const PROXY_TYPE_AUTO_PROXY_URL: u32 = 0x4;

/// Registry values under `Connections` that are not connections
const NON_CONNECTION_VALUES: [&str; 2] = ["DefaultConnectionSettings", "SavedLegacySettings"];

/// One entry of a per-connection option list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerConnOption {
    Flags(u32),
    ProxyServer(String),
    ProxyBypass(String),
    AutoConfigUrl(String),
}

/// Option list applied atomically to one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionList(pub Vec<PerConnOption>);

impl fmt::Display for OptionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InternetSetOption [")?;
        for (i, option) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match option {
                PerConnOption::Flags(flags) => write!(f, "flags={flags:#x}")?,
                PerConnOption::ProxyServer(server) => write!(f, "proxy_server={server:?}")?,
                PerConnOption::ProxyBypass(bypass) => write!(f, "proxy_bypass={bypass:?}")?,
                PerConnOption::AutoConfigUrl(url) => write!(f, "autoconfig_url={url:?}")?,
            }
        }
        f.write_str("]")
    }
}

/// Raw values read back from one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerConnSnapshot {
    pub flags: u32,
    pub proxy_server: String,
    pub proxy_bypass: String,
    pub autoconfig_url: String,
}

/// Access to the WinINet connection settings store.
///
/// `connection` is `None` for the default LAN connection.
pub trait ConnectionOptionStore: Send + Sync {
    fn connection_names(&self) -> Result<Vec<String>>;
    fn apply(&self, connection: Option<&str>, options: &[PerConnOption]) -> Result<()>;
    fn query(&self, connection: Option<&str>) -> Result<PerConnSnapshot>;
    /// Tell running applications the settings changed.
    fn notify_changed(&self) -> Result<()>;
}

pub struct WinInetBackend {
    store: Arc<dyn ConnectionOptionStore>,
}

impl WinInetBackend {
    pub fn new(store: Arc<dyn ConnectionOptionStore>) -> Self {
        Self { store }
    }
}

fn connection_of(target: &Target) -> Option<&str> {
    match target {
        Target::Named(name) => Some(name.as_str()),
        Target::Session | Target::DefaultConnection => None,
    }
}

impl ProxyBackend for WinInetBackend {
    type Op = OptionList;

    fn issue_mode(&self) -> IssueMode {
        IssueMode::Parallel
    }

    // The default connection comes first so reads consult it.
    fn discover(&self, _active_only: bool) -> Result<Vec<Target>, SysProxyError> {
        let names = self
            .store
            .connection_names()
            .map_err(|err| SysProxyError::DiscoveryUnavailable(format!("{err:#}")))?;
        let mut targets = vec![Target::DefaultConnection];
        targets.extend(
            names
                .into_iter()
                .filter(|name| !name.is_empty() && !NON_CONNECTION_VALUES.contains(&name.as_str()))
                .map(Target::Named),
        );
        Ok(targets)
    }

    fn read_settings(&self, target: &Target) -> Result<ProxyConfig, SysProxyError> {
        let snapshot = self
            .store
            .query(connection_of(target))
            .map_err(|err| SysProxyError::native(target, "InternetQueryOption", err))?;
        Ok(normalize_snapshot(&snapshot))
    }

    fn proxy_ops(&self, server: &ServerAddr, bypass: &[String]) -> Vec<OptionList> {
        vec![OptionList(vec![
            PerConnOption::Flags(PROXY_TYPE_DIRECT | PROXY_TYPE_PROXY),
            PerConnOption::ProxyServer(server.to_string()),
            PerConnOption::ProxyBypass(bypass.join(";")),
        ])]
    }

    fn pac_ops(&self, url: &str) -> Vec<OptionList> {
        vec![OptionList(vec![
            PerConnOption::Flags(PROXY_TYPE_DIRECT | PROXY_TYPE_AUTO_PROXY_URL),
            PerConnOption::AutoConfigUrl(url.to_string()),
        ])]
    }

    fn disable_ops(&self) -> Vec<OptionList> {
        vec![OptionList(vec![PerConnOption::Flags(PROXY_TYPE_DIRECT)])]
    }

    fn execute(&self, target: &Target, op: &OptionList) -> Result<()> {
        self.store.apply(connection_of(target), &op.0)
    }

    fn after_apply(&self) -> Result<()> {
        self.store.notify_changed()
    }
}

/// Fold raw WinINet values into the normalized model.
///
/// A plain `host:port` proxy server serves every protocol; the
/// `http=h:p;https=h:p;socks=h:p` form is split per protocol.
pub fn normalize_snapshot(snapshot: &PerConnSnapshot) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.proxy.enabled = snapshot.flags & PROXY_TYPE_PROXY != 0;
    config.pac.enabled = snapshot.flags & PROXY_TYPE_AUTO_PROXY_URL != 0;
    config.pac.url = snapshot.autoconfig_url.trim().to_string();

    let server = snapshot.proxy_server.trim();
    if server.contains('=') {
        for entry in server.split(';') {
            let Some((scheme, addr)) = entry.split_once('=') else {
                continue;
            };
            let protocol = match scheme.trim().to_ascii_lowercase().as_str() {
                "http" => Protocol::Http,
                "https" => Protocol::Https,
                "socks" => Protocol::Socks,
                "ftp" => Protocol::Ftp,
                _ => continue,
            };
            config.set_server(protocol, normalize_server(addr));
        }
    } else {
        let normalized = normalize_server(server);
        config.proxy.same_for_all = !normalized.is_empty();
        config.set_server(Protocol::Http, normalized);
    }

    config.proxy.bypass = split_bypass(&snapshot.proxy_bypass.replace(';', ",")).join(",");
    config
}

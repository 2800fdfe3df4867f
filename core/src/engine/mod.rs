//! Multi-platform proxy configuration engine
//!
//! A [`ProxyBackend`] knows one native proxy subsystem: how to find its
//! targets, how to spell an intent as native operations, and how to read
//! settings back. [`Engine`] drives any backend through the same four
//! operations, and [`SysProxy`] picks the backend for the running host.

pub mod applier;
pub mod environment;
mod error;
mod facade;
pub mod translate;

pub use environment::{DesktopFlavor, Environment};
pub use error::SysProxyError;
pub use facade::SysProxy;
pub use translate::Intent;

use crate::models::{ProxyConfig, ServerAddr};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Where a change is applied
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A named network service or connection
    Named(String),
    /// The implicit desktop session store
    Session,
    /// The default LAN connection of a per-connection store
    DefaultConnection,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Named(name) => f.write_str(name),
            Target::Session => f.write_str("current session"),
            Target::DefaultConnection => f.write_str("default connection"),
        }
    }
}

/// Caller's choice of targets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSelector {
    /// Explicit target name; skips discovery when set and non-empty
    pub device: Option<String>,
    /// Keep only targets with a physical link
    pub active_only: bool,
}

impl TargetSelector {
    pub fn new(device: Option<&str>, active_only: bool) -> Self {
        Self {
            device: device
                .filter(|d| !d.trim().is_empty())
                .map(str::to_string),
            active_only,
        }
    }
}

/// How operations of one target may be issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueMode {
    /// Strictly in list order, one after another
    Sequential,
    /// All at once; each native call is atomic on its own
    Parallel,
}

/// One native proxy subsystem.
///
/// Methods are blocking: they launch short-lived processes or call into the
/// OS. The engine moves them onto blocking threads.
pub trait ProxyBackend: Send + Sync + 'static {
    type Op: Clone + fmt::Display + Send + Sync + 'static;

    fn issue_mode(&self) -> IssueMode;

    /// Enumerate targets. An empty result is turned into `NoTargetsFound`
    /// by the caller.
    fn discover(&self, active_only: bool) -> Result<Vec<Target>, SysProxyError>;

    /// Read and normalize the settings of one target.
    fn read_settings(&self, target: &Target) -> Result<ProxyConfig, SysProxyError>;

    fn proxy_ops(&self, server: &ServerAddr, bypass: &[String]) -> Vec<Self::Op>;

    fn pac_ops(&self, url: &str) -> Vec<Self::Op>;

    fn disable_ops(&self) -> Vec<Self::Op>;

    fn execute(&self, target: &Target, op: &Self::Op) -> anyhow::Result<()>;

    /// Runs once after every target was updated successfully.
    fn after_apply(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The four proxy operations over one backend
pub struct Engine<B: ProxyBackend> {
    backend: Arc<B>,
}

impl<B: ProxyBackend> Clone for Engine<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: ProxyBackend> Engine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Normalized settings of the representative (first) target.
    pub async fn query(&self, selector: &TargetSelector) -> Result<ProxyConfig, SysProxyError> {
        let started = Instant::now();
        let targets = self.resolve_targets(selector).await?;
        let backend = Arc::clone(&self.backend);
        let config = blocking(move || backend.read_settings(&targets[0])).await?;
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "query took");
        Ok(config)
    }

    pub async fn set_proxy(
        &self,
        server: &str,
        bypass: &str,
        selector: &TargetSelector,
    ) -> Result<(), SysProxyError> {
        let started = Instant::now();
        let intent = Intent::SetProxy {
            server: server.to_string(),
            bypass: bypass.to_string(),
        };
        self.run(&intent, selector).await?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            server,
            bypass,
            "set proxy took"
        );
        Ok(())
    }

    pub async fn set_pac(&self, url: &str, selector: &TargetSelector) -> Result<(), SysProxyError> {
        let started = Instant::now();
        let intent = Intent::SetPac {
            url: url.to_string(),
        };
        self.run(&intent, selector).await?;
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, url, "set pac took");
        Ok(())
    }

    pub async fn disable(&self, selector: &TargetSelector) -> Result<(), SysProxyError> {
        let started = Instant::now();
        self.run(&Intent::Disable, selector).await?;
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "disable took");
        Ok(())
    }

    /// Translate an intent into native operations, reading current settings
    /// first when the intent leaves fields empty.
    pub async fn plan(
        &self,
        intent: &Intent,
        selector: &TargetSelector,
    ) -> Result<Vec<B::Op>, SysProxyError> {
        let current = if intent.needs_current() {
            Some(self.query(selector).await?)
        } else {
            None
        };
        translate::translate(self.backend.as_ref(), intent, current.as_ref())
    }

    async fn run(&self, intent: &Intent, selector: &TargetSelector) -> Result<(), SysProxyError> {
        let ops = self.plan(intent, selector).await?;
        let targets = self.resolve_targets(selector).await?;
        applier::apply(Arc::clone(&self.backend), &targets, &ops).await?;

        let backend = Arc::clone(&self.backend);
        blocking(move || {
            backend
                .after_apply()
                .map_err(|err| SysProxyError::native("all targets", "apply settings", err))
        })
        .await
    }

    async fn resolve_targets(
        &self,
        selector: &TargetSelector,
    ) -> Result<Vec<Target>, SysProxyError> {
        if let Some(device) = &selector.device {
            return Ok(vec![Target::Named(device.clone())]);
        }
        let backend = Arc::clone(&self.backend);
        let active_only = selector.active_only;
        let targets = blocking(move || backend.discover(active_only)).await?;
        if targets.is_empty() {
            return Err(SysProxyError::NoTargetsFound);
        }
        tracing::debug!(?targets, "resolved proxy targets");
        Ok(targets)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, SysProxyError>
where
    F: FnOnce() -> Result<T, SysProxyError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| SysProxyError::native("engine", "blocking native call", err))?
}

use super::{DesktopFlavor, Engine, Environment, SysProxyError, TargetSelector};
use crate::models::ProxyConfig;
use crate::platform::desktop::DesktopBackend;
use crate::platform::networksetup::NetworkSetupBackend;
use crate::platform::wininet::WinInetBackend;
use crate::platform::SystemCommandRunner;
use std::sync::Arc;

/// The proxy engine bound to the backend of the running host.
///
/// Callers pass the raw `device` / `active_only` pair; every variant turns it
/// into a [`TargetSelector`] the same way.
#[derive(Clone)]
pub enum SysProxy {
    NetworkSetup(Engine<NetworkSetupBackend>),
    Desktop(Engine<DesktopBackend>),
    WinInet(Engine<WinInetBackend>),
}

impl SysProxy {
    /// Classify the host and build its backend.
    pub fn detect() -> Result<Self, SysProxyError> {
        let environment = Environment::detect()?;
        tracing::info!(%environment, "detected proxy environment");
        Self::for_environment(environment)
    }

    pub fn for_environment(environment: Environment) -> Result<Self, SysProxyError> {
        match environment {
            Environment::NetworkSetup => Ok(SysProxy::NetworkSetup(Engine::new(
                NetworkSetupBackend::new(Arc::new(SystemCommandRunner::new())),
            ))),
            Environment::Desktop(flavor) => Ok(Self::desktop(flavor)),
            Environment::WinInet => Self::wininet(),
        }
    }

    fn desktop(flavor: DesktopFlavor) -> Self {
        SysProxy::Desktop(Engine::new(DesktopBackend::new(
            flavor,
            Arc::new(SystemCommandRunner::as_invoking_user()),
        )))
    }

    #[cfg(windows)]
    fn wininet() -> Result<Self, SysProxyError> {
        use crate::platform::wininet::WinInetStore;

        Ok(SysProxy::WinInet(Engine::new(WinInetBackend::new(
            Arc::new(WinInetStore::new()),
        ))))
    }

    #[cfg(not(windows))]
    fn wininet() -> Result<Self, SysProxyError> {
        Err(SysProxyError::UnsupportedEnvironment(
            "WinINet is only available on Windows".to_string(),
        ))
    }

    pub fn environment(&self) -> Environment {
        match self {
            SysProxy::NetworkSetup(_) => Environment::NetworkSetup,
            SysProxy::Desktop(engine) => Environment::Desktop(engine.backend().flavor()),
            SysProxy::WinInet(_) => Environment::WinInet,
        }
    }

    pub async fn query(
        &self,
        device: Option<&str>,
        active_only: bool,
    ) -> Result<ProxyConfig, SysProxyError> {
        let selector = TargetSelector::new(device, active_only);
        match self {
            SysProxy::NetworkSetup(engine) => engine.query(&selector).await,
            SysProxy::Desktop(engine) => engine.query(&selector).await,
            SysProxy::WinInet(engine) => engine.query(&selector).await,
        }
    }

    pub async fn set_proxy(
        &self,
        server: &str,
        bypass: &str,
        device: Option<&str>,
        active_only: bool,
    ) -> Result<(), SysProxyError> {
        let selector = TargetSelector::new(device, active_only);
        match self {
            SysProxy::NetworkSetup(engine) => engine.set_proxy(server, bypass, &selector).await,
            SysProxy::Desktop(engine) => engine.set_proxy(server, bypass, &selector).await,
            SysProxy::WinInet(engine) => engine.set_proxy(server, bypass, &selector).await,
        }
    }

    pub async fn set_pac(
        &self,
        url: &str,
        device: Option<&str>,
        active_only: bool,
    ) -> Result<(), SysProxyError> {
        let selector = TargetSelector::new(device, active_only);
        match self {
            SysProxy::NetworkSetup(engine) => engine.set_pac(url, &selector).await,
            SysProxy::Desktop(engine) => engine.set_pac(url, &selector).await,
            SysProxy::WinInet(engine) => engine.set_pac(url, &selector).await,
        }
    }

    pub async fn disable(&self, device: Option<&str>, active_only: bool) -> Result<(), SysProxyError> {
        let selector = TargetSelector::new(device, active_only);
        match self {
            SysProxy::NetworkSetup(engine) => engine.disable(&selector).await,
            SysProxy::Desktop(engine) => engine.disable(&selector).await,
            SysProxy::WinInet(engine) => engine.disable(&selector).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_variant_reports_its_flavor() {
        let proxy = SysProxy::for_environment(Environment::Desktop(DesktopFlavor::Kde {
            plasma6: true,
        }))
        .expect("desktop backend");
        assert_eq!(
            proxy.environment(),
            Environment::Desktop(DesktopFlavor::Kde { plasma6: true })
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn wininet_is_unsupported_off_windows() {
        let err = SysProxy::for_environment(Environment::WinInet)
            .err()
            .expect("wininet should be rejected");
        assert!(matches!(err, SysProxyError::UnsupportedEnvironment(_)));
    }
}

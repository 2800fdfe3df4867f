//! Intent to native-operation translation

use super::{ProxyBackend, SysProxyError};
use crate::models::{split_bypass, Protocol, ProxyConfig, ServerAddr};

/// What the caller wants the system proxy to become
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Manual proxy; empty fields keep their current value
    SetProxy { server: String, bypass: String },
    /// Auto-config URL; empty keeps the current URL
    SetPac { url: String },
    Disable,
}

impl Intent {
    /// Whether translation has to substitute current values
    pub fn needs_current(&self) -> bool {
        match self {
            Intent::SetProxy { server, bypass } => {
                server.trim().is_empty() || bypass.trim().is_empty()
            }
            Intent::SetPac { url } => url.trim().is_empty(),
            Intent::Disable => false,
        }
    }
}

/// Expand an intent into the backend's ordered operation list.
///
/// `current` fills fields the intent leaves empty. The server address is
/// validated after substitution, so a malformed address fails here before
/// any native operation exists.
pub fn translate<B: ProxyBackend + ?Sized>(
    backend: &B,
    intent: &Intent,
    current: Option<&ProxyConfig>,
) -> Result<Vec<B::Op>, SysProxyError> {
    match intent {
        Intent::SetProxy { server, bypass } => {
            let server = fallback(server, current.map(|c| c.server(Protocol::Http)));
            let bypass = fallback(bypass, current.map(|c| c.proxy.bypass.as_str()));
            let addr = ServerAddr::parse(&server)
                .ok_or_else(|| SysProxyError::InvalidProxyAddress(server.clone()))?;
            Ok(backend.proxy_ops(&addr, &split_bypass(&bypass)))
        }
        Intent::SetPac { url } => {
            let url = fallback(url, current.map(|c| c.pac.url.as_str()));
            Ok(backend.pac_ops(&url))
        }
        Intent::Disable => Ok(backend.disable_ops()),
    }
}

fn fallback(requested: &str, existing: Option<&str>) -> String {
    let requested = requested.trim();
    if requested.is_empty() {
        existing.unwrap_or("").trim().to_string()
    } else {
        requested.to_string()
    }
}

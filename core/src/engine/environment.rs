//! Decides which native proxy subsystem this host exposes.

use super::SysProxyError;
use std::fmt;

/// Desktop sessions that own a proxy config store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopFlavor {
    Gnome,
    Kde { plasma6: bool },
}

/// Proxy subsystem family of the running host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// macOS `networksetup`, one state per network service
    NetworkSetup,
    /// Linux/BSD desktop session store
    Desktop(DesktopFlavor),
    /// Windows WinINet per-connection option lists
    WinInet,
}

impl Environment {
    /// Classify the running process from its OS and session variables.
    pub fn detect() -> Result<Self, SysProxyError> {
        let desktop = std::env::var("XDG_CURRENT_DESKTOP").ok();
        let kde_version = std::env::var("KDE_SESSION_VERSION").ok();
        Self::classify(
            std::env::consts::OS,
            desktop.as_deref(),
            kde_version.as_deref(),
        )
    }

    pub fn classify(
        os: &str,
        desktop: Option<&str>,
        kde_version: Option<&str>,
    ) -> Result<Self, SysProxyError> {
        match os {
            "macos" => Ok(Environment::NetworkSetup),
            "windows" => Ok(Environment::WinInet),
            "linux" | "freebsd" | "openbsd" | "netbsd" | "dragonfly" => {
                let desktop = desktop.map(str::trim).unwrap_or("");
                if desktop.is_empty() {
                    return Err(SysProxyError::DiscoveryUnavailable(
                        "XDG_CURRENT_DESKTOP environment variable not set".to_string(),
                    ));
                }
                classify_desktop(desktop, kde_version)
                    .map(Environment::Desktop)
                    .ok_or_else(|| {
                        SysProxyError::UnsupportedEnvironment(format!("desktop {desktop}"))
                    })
            }
            other => Err(SysProxyError::UnsupportedEnvironment(format!(
                "operating system {other}"
            ))),
        }
    }
}

// XDG_CURRENT_DESKTOP is a colon-separated list, e.g. "ubuntu:GNOME".
fn classify_desktop(desktop: &str, kde_version: Option<&str>) -> Option<DesktopFlavor> {
    let segments: Vec<&str> = desktop.split(':').map(str::trim).collect();
    if segments.iter().any(|s| *s == "KDE") {
        return Some(DesktopFlavor::Kde {
            plasma6: kde_version.map(str::trim) == Some("6"),
        });
    }
    if segments.iter().any(|s| s.contains("GNOME") || *s == "Unity") {
        return Some(DesktopFlavor::Gnome);
    }
    None
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::NetworkSetup => f.write_str("networksetup"),
            Environment::Desktop(DesktopFlavor::Gnome) => f.write_str("gnome"),
            Environment::Desktop(DesktopFlavor::Kde { plasma6: true }) => f.write_str("kde6"),
            Environment::Desktop(DesktopFlavor::Kde { plasma6: false }) => f.write_str("kde5"),
            Environment::WinInet => f.write_str("wininet"),
        }
    }
}

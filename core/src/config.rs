//! Process configuration read from the environment.

use std::path::PathBuf;

/// Control socket used when nothing else is configured
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/sparkle-helper.sock";

pub const SOCKET_ENV: &str = "SYSPROXY_SOCKET";
pub const LOG_DIR_ENV: &str = "SYSPROXY_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

impl ServerConfig {
    /// Default config with `SYSPROXY_SOCKET` applied when set and non-empty.
    pub fn from_env() -> Self {
        match std::env::var(SOCKET_ENV) {
            Ok(path) if !path.trim().is_empty() => Self {
                socket_path: PathBuf::from(path.trim()),
            },
            _ => Self::default(),
        }
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }
}

/// Where log output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Daily-rolling files in this directory
    Directory(PathBuf),
}

impl LogTarget {
    pub fn from_env() -> Self {
        match std::env::var_os(LOG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => LogTarget::Directory(PathBuf::from(dir)),
            _ => LogTarget::Stderr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn socket_path_defaults_and_env_override() {
        std::env::remove_var(SOCKET_ENV);
        assert_eq!(
            ServerConfig::from_env().socket_path,
            PathBuf::from("/tmp/sparkle-helper.sock")
        );

        std::env::set_var(SOCKET_ENV, "/run/sysproxy/control.sock");
        assert_eq!(
            ServerConfig::from_env().socket_path,
            PathBuf::from("/run/sysproxy/control.sock")
        );

        std::env::set_var(SOCKET_ENV, "  ");
        assert_eq!(ServerConfig::from_env(), ServerConfig::default());
        std::env::remove_var(SOCKET_ENV);
    }

    #[test]
    #[serial]
    fn log_target_follows_log_dir() {
        std::env::remove_var(LOG_DIR_ENV);
        assert_eq!(LogTarget::from_env(), LogTarget::Stderr);

        std::env::set_var(LOG_DIR_ENV, "/var/log/sysproxy");
        assert_eq!(
            LogTarget::from_env(),
            LogTarget::Directory(PathBuf::from("/var/log/sysproxy"))
        );
        std::env::remove_var(LOG_DIR_ENV);
    }
}

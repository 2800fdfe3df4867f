use thiserror::Error;

/// Every failure the engine surfaces to its callers
#[derive(Debug, Error)]
pub enum SysProxyError {
    /// Target enumeration itself failed; nothing was attempted
    #[error("cannot enumerate proxy targets: {0}")]
    DiscoveryUnavailable(String),

    /// Enumeration worked but produced no usable target
    #[error("no proxy targets found")]
    NoTargetsFound,

    /// Server string is not a usable `host:port`
    #[error("invalid proxy address: {0:?}")]
    InvalidProxyAddress(String),

    /// One native call failed; sibling calls still ran to completion
    #[error("{operation} failed for {target}: {cause:#}")]
    NativeOperationFailed {
        target: String,
        operation: String,
        cause: anyhow::Error,
    },

    /// Platform or desktop has no supported proxy subsystem
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),
}

impl SysProxyError {
    pub fn native(
        target: impl ToString,
        operation: impl ToString,
        cause: impl Into<anyhow::Error>,
    ) -> Self {
        SysProxyError::NativeOperationFailed {
            target: target.to_string(),
            operation: operation.to_string(),
            cause: cause.into(),
        }
    }
}

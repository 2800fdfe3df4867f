//! Data models shared by the engine, the control plane and the CLI.

pub mod proxy_config;
pub mod request;

pub use proxy_config::*;
pub use request::*;

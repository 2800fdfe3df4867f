//! # sysproxy
//!
//! Reads and changes the operating system's proxy settings through one
//! interface, whatever native subsystem the host exposes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        sysproxy CLI         │   control socket (HTTP)    │
//! ├─────────────────────────────────────────────────────────┤
//! │   SysProxy facade: query / set_proxy / set_pac / disable │
//! ├─────────────────────────────────────────────────────────┤
//! │  Engine<B>: plan ─► resolve targets ─► concurrent apply  │
//! ├──────────────────┬───────────────────┬──────────────────┤
//! │   networksetup   │  gsettings / KDE  │     WinINet      │
//! │  (per service)   │ (session store)   │ (per connection) │
//! └──────────────────┴───────────────────┴──────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod logging;
pub mod models;
pub mod platform;
#[cfg(unix)]
pub mod server;

pub use engine::{SysProxy, SysProxyError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

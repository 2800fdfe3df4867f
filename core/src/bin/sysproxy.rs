//! Command-line front end for the system proxy engine.
//!
//! ```text
//! sysproxy proxy --server 127.0.0.1:7890 --bypass "localhost,127.0.0.1"
//! sysproxy pac --url http://127.0.0.1:7890/proxy.pac
//! sysproxy disable
//! sysproxy status
//! sysproxy server --listen /tmp/sparkle-helper.sock
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_lib_sysproxy::config::{LogTarget, ServerConfig};
use rust_lib_sysproxy::logging;
use rust_lib_sysproxy::SysProxy;

#[derive(Parser)]
#[command(name = "sysproxy", version, about = "System proxy configuration tool")]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct TargetArgs {
    /// Apply to this network device only
    #[arg(short = 'd', long, global = true, default_value = "")]
    device: String,

    /// Apply only to devices with an active link
    #[arg(short = 'a', long = "only-active-device", global = true)]
    only_active_device: bool,
}

impl TargetArgs {
    fn device(&self) -> Option<&str> {
        Some(self.device.as_str()).filter(|d| !d.is_empty())
    }
}

#[derive(Subcommand)]
enum Command {
    /// Set a fixed proxy server
    Proxy {
        /// Proxy address as host:port; empty keeps the current one
        #[arg(short, long, default_value = "")]
        server: String,
        /// Comma-separated hosts that skip the proxy
        #[arg(short, long, default_value = "")]
        bypass: String,
    },
    /// Set a PAC URL
    Pac {
        #[arg(short, long, default_value = "")]
        url: String,
    },
    /// Turn every proxy mode off
    Disable,
    /// Print the current settings as JSON
    Status,
    /// Serve the control socket until interrupted
    Server {
        /// Socket path; defaults to $SYSPROXY_SOCKET, then /tmp/sparkle-helper.sock
        #[arg(short, long)]
        listen: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match logging::init_tracing(LogTarget::from_env()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let proxy = SysProxy::detect()?;
    let device = cli.target.device();
    let active_only = cli.target.only_active_device;
    let started = Instant::now();

    match cli.command {
        Command::Proxy { server, bypass } => {
            proxy
                .set_proxy(&server, &bypass, device, active_only)
                .await
                .context("setting proxy failed")?;
            println!("proxy set in {:?}", started.elapsed());
        }
        Command::Pac { url } => {
            proxy
                .set_pac(&url, device, active_only)
                .await
                .context("setting PAC failed")?;
            println!("PAC set in {:?}", started.elapsed());
        }
        Command::Disable => {
            proxy
                .disable(device, active_only)
                .await
                .context("disabling proxy failed")?;
            println!("proxy disabled in {:?}", started.elapsed());
        }
        Command::Status => {
            let config = proxy
                .query(device, active_only)
                .await
                .context("querying proxy settings failed")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Server { listen } => serve(proxy, server_config(listen)).await?,
    }
    Ok(())
}

/// `--listen` wins over the environment.
fn server_config(listen: Option<PathBuf>) -> ServerConfig {
    let config = ServerConfig::from_env();
    match listen {
        Some(path) => config.with_socket_path(path),
        None => config,
    }
}

#[cfg(unix)]
async fn serve(proxy: SysProxy, config: ServerConfig) -> Result<()> {
    use rust_lib_sysproxy::server::ControlServer;
    use std::sync::Arc;

    let handle = ControlServer::start(config, Arc::new(proxy)).await?;
    println!("control server listening at {}", handle.socket_path().display());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt failed")?;
    handle.shutdown().await
}

#[cfg(not(unix))]
async fn serve(_proxy: SysProxy, _config: ServerConfig) -> Result<()> {
    anyhow::bail!("the control server needs Unix domain sockets")
}

//! macOS backend driving `networksetup`, one state per network service.

use super::{render_command, CommandRunner};
use crate::engine::{IssueMode, ProxyBackend, SysProxyError, Target};
use crate::models::{clean_output, format_server, Protocol, ProxyConfig, ServerAddr};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

const NETWORKSETUP: &str = "networksetup";

static ORDINAL_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(\d+\)\s*(.+)$").expect("regex"));
static DEVICE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Device:\s*([^\s,)]+)").expect("regex"));

/// Getter flag per manual-proxy protocol networksetup manages
const PROXY_GETTERS: [(Protocol, &str); 3] = [
    (Protocol::Http, "-getwebproxy"),
    (Protocol::Https, "-getsecurewebproxy"),
    (Protocol::Socks, "-getsocksfirewallproxy"),
];

/// One `networksetup <flag> <service> <args...>` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCommand {
    pub flag: &'static str,
    pub args: Vec<String>,
}

impl ServiceCommand {
    pub fn new<I, S>(flag: &'static str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flag,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn argv(&self, service: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(self.flag.to_string());
        argv.push(service.to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut args = vec![self.flag.to_string()];
        args.extend(self.args.iter().cloned());
        f.write_str(&render_command(NETWORKSETUP, &args))
    }
}

pub struct NetworkSetupBackend {
    runner: Arc<dyn CommandRunner>,
}

impl NetworkSetupBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn query(&self, flag: &str, service: &str) -> Result<String> {
        self.runner
            .run(NETWORKSETUP, &[flag.to_string(), service.to_string()])
    }
}

impl ProxyBackend for NetworkSetupBackend {
    type Op = ServiceCommand;

    // networksetup calls on one service are not order independent.
    fn issue_mode(&self) -> IssueMode {
        IssueMode::Sequential
    }

    fn discover(&self, active_only: bool) -> Result<Vec<Target>, SysProxyError> {
        let output = self
            .runner
            .run(NETWORKSETUP, &["-listnetworkserviceorder".to_string()])
            .map_err(|err| SysProxyError::DiscoveryUnavailable(format!("{err:#}")))?;
        if output.trim().is_empty() {
            return Err(SysProxyError::DiscoveryUnavailable(
                "networksetup produced no output".to_string(),
            ));
        }
        Ok(parse_service_order(&output, active_only)
            .into_iter()
            .map(Target::Named)
            .collect())
    }

    fn read_settings(&self, target: &Target) -> Result<ProxyConfig, SysProxyError> {
        let service = target.to_string();
        let mut config = ProxyConfig::default();

        match self.query("-getautoproxyurl", &service) {
            Ok(output) => {
                let (enabled, url) = parse_auto_proxy(&output);
                config.pac.enabled = enabled;
                config.pac.url = url;
            }
            Err(err) => tracing::warn!(%service, "reading auto proxy url failed: {err:#}"),
        }

        for (protocol, flag) in PROXY_GETTERS {
            match self.query(flag, &service) {
                Ok(output) => {
                    if let Some(server) = parse_proxy_state(&output) {
                        config.proxy.enabled = true;
                        config.set_server(protocol, server);
                    }
                }
                Err(err) => tracing::warn!(%service, flag, "reading proxy failed: {err:#}"),
            }
        }

        match self.query("-getproxybypassdomains", &service) {
            Ok(output) => config.proxy.bypass = parse_bypass_domains(&output),
            Err(err) => tracing::warn!(%service, "reading bypass domains failed: {err:#}"),
        }

        Ok(config)
    }

    fn proxy_ops(&self, server: &ServerAddr, bypass: &[String]) -> Vec<ServiceCommand> {
        let host = server.host.as_str();
        let port = server.port.as_str();
        let bypass_args = if bypass.is_empty() {
            vec!["Empty".to_string()]
        } else {
            bypass.to_vec()
        };
        vec![
            ServiceCommand::new("-setproxyautodiscovery", ["off"]),
            ServiceCommand::new("-setautoproxystate", ["off"]),
            ServiceCommand::new("-setwebproxy", [host, port]),
            ServiceCommand::new("-setsecurewebproxy", [host, port]),
            ServiceCommand::new("-setsocksfirewallproxy", [host, port]),
            ServiceCommand::new("-setproxybypassdomains", bypass_args),
        ]
    }

    fn pac_ops(&self, url: &str) -> Vec<ServiceCommand> {
        vec![
            ServiceCommand::new("-setwebproxystate", ["off"]),
            ServiceCommand::new("-setsecurewebproxystate", ["off"]),
            ServiceCommand::new("-setsocksfirewallproxystate", ["off"]),
            ServiceCommand::new("-setautoproxyurl", [url]),
            ServiceCommand::new("-setautoproxystate", ["on"]),
            ServiceCommand::new("-setproxyautodiscovery", ["on"]),
        ]
    }

    fn disable_ops(&self) -> Vec<ServiceCommand> {
        vec![
            ServiceCommand::new("-setproxyautodiscovery", ["off"]),
            ServiceCommand::new("-setautoproxystate", ["off"]),
            ServiceCommand::new("-setwebproxystate", ["off"]),
            ServiceCommand::new("-setsecurewebproxystate", ["off"]),
            ServiceCommand::new("-setsocksfirewallproxystate", ["off"]),
        ]
    }

    fn execute(&self, target: &Target, op: &ServiceCommand) -> Result<()> {
        self.runner
            .run(NETWORKSETUP, &op.argv(&target.to_string()))
            .map(|_| ())
    }
}

/// Services from `-listnetworkserviceorder`, in service order.
///
/// Each `(N) Name` line is followed by a hardware line whose `Device:` field
/// marks a physical link. Disabled services are printed as `(*) Name` and
/// never match.
pub fn parse_service_order(output: &str, active_only: bool) -> Vec<String> {
    let mut services = Vec::new();
    let mut lines = output.lines();
    while let Some(line) = lines.next() {
        let Some(caps) = ORDINAL_LINE.captures(line.trim()) else {
            continue;
        };
        let service = caps[1].trim().to_string();
        let device = lines
            .next()
            .and_then(|next| DEVICE_FIELD.captures(next))
            .map(|caps| caps[1].to_string());
        if active_only && device.is_none() {
            continue;
        }
        services.push(service);
    }
    services
}

/// `(enabled, url)` from `-getautoproxyurl`; the URL is kept only when enabled.
pub fn parse_auto_proxy(output: &str) -> (bool, String) {
    let enabled = output
        .lines()
        .any(|line| line.trim().starts_with("Enabled: Yes"));
    if !enabled {
        return (false, String::new());
    }
    let url = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("URL:"))
        .map(clean_output)
        .filter(|url| url != "(null)")
        .unwrap_or_default();
    (true, url)
}

/// Normalized server from `-getwebproxy` style output, `None` when disabled.
pub fn parse_proxy_state(output: &str) -> Option<String> {
    let mut enabled = false;
    let mut host = "";
    let mut port = "";
    for line in output.lines().map(str::trim) {
        if line.starts_with("Enabled: Yes") {
            enabled = true;
        } else if let Some(value) = line.strip_prefix("Server:") {
            host = value;
        } else if let Some(value) = line.strip_prefix("Port:") {
            port = value;
        }
    }
    enabled.then(|| format_server(host, port))
}

/// Comma-joined bypass list from `-getproxybypassdomains`.
pub fn parse_bypass_domains(output: &str) -> String {
    output
        .lines()
        .map(clean_output)
        .filter(|line| !line.is_empty() && !line.starts_with("There aren't any"))
        .collect::<Vec<_>>()
        .join(",")
}

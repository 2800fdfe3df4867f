//! Linux desktop backend: GNOME `gsettings` or KDE `kioslaverc`.
//!
//! Both stores are per-session, so there is a single [`Target::Session`].

use super::{render_command, CommandRunner};
use crate::engine::{DesktopFlavor, IssueMode, ProxyBackend, SysProxyError, Target};
use crate::models::{
    clean_output, format_server, normalize_server, split_bypass, Protocol, ProxyConfig,
    ServerAddr,
};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

const GNOME_PROXY: &str = "org.gnome.system.proxy";
const KDE_FILE: &str = "kioslaverc";
const KDE_GROUP: &str = "Proxy Settings";

/// Protocols written when one server serves all of them
const MANUAL_PROTOCOLS: [Protocol; 3] = [Protocol::Http, Protocol::Https, Protocol::Socks];

/// One key write in the session store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWrite {
    /// gsettings schema, or kioslaverc group
    pub scope: String,
    pub key: String,
    pub value: String,
}

impl KeyWrite {
    fn new(scope: impl Into<String>, key: &str, value: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            key: key.to_string(),
            value: value.into(),
        }
    }
}

impl fmt::Display for KeyWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set {} {}={:?}", self.scope, self.key, self.value)
    }
}

pub struct DesktopBackend {
    flavor: DesktopFlavor,
    runner: Arc<dyn CommandRunner>,
}

impl DesktopBackend {
    pub fn new(flavor: DesktopFlavor, runner: Arc<dyn CommandRunner>) -> Self {
        Self { flavor, runner }
    }

    pub fn flavor(&self) -> DesktopFlavor {
        self.flavor
    }

    fn kde_tools(plasma6: bool) -> (&'static str, &'static str) {
        if plasma6 {
            ("kreadconfig6", "kwriteconfig6")
        } else {
            ("kreadconfig5", "kwriteconfig5")
        }
    }

    fn write_command(&self, op: &KeyWrite) -> (&'static str, Vec<String>) {
        match self.flavor {
            DesktopFlavor::Gnome => (
                "gsettings",
                vec![
                    "set".to_string(),
                    op.scope.clone(),
                    op.key.clone(),
                    op.value.clone(),
                ],
            ),
            DesktopFlavor::Kde { plasma6 } => (
                Self::kde_tools(plasma6).1,
                vec![
                    "--file".to_string(),
                    KDE_FILE.to_string(),
                    "--group".to_string(),
                    op.scope.clone(),
                    "--key".to_string(),
                    op.key.clone(),
                    op.value.clone(),
                ],
            ),
        }
    }

    /// Read one key; failures degrade to an empty value.
    fn read_key(&self, scope: &str, key: &str) -> String {
        let (program, args) = match self.flavor {
            DesktopFlavor::Gnome => (
                "gsettings",
                vec!["get".to_string(), scope.to_string(), key.to_string()],
            ),
            DesktopFlavor::Kde { plasma6 } => (
                Self::kde_tools(plasma6).0,
                vec![
                    "--file".to_string(),
                    KDE_FILE.to_string(),
                    "--group".to_string(),
                    scope.to_string(),
                    "--key".to_string(),
                    key.to_string(),
                ],
            ),
        };
        match self.runner.run(program, &args) {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(
                    command = %render_command(program, &args),
                    "reading desktop proxy key failed: {err:#}"
                );
                String::new()
            }
        }
    }

    fn read_gnome(&self) -> ProxyConfig {
        let mode = clean_output(&self.read_key(GNOME_PROXY, "mode"));
        let mut config = ProxyConfig::default();
        config.proxy.enabled = mode == "manual";
        config.proxy.same_for_all = clean_output(&self.read_key(GNOME_PROXY, "use-same-proxy")) == "true";
        for protocol in Protocol::ALL {
            let schema = gnome_schema(protocol);
            let host = self.read_key(&schema, "host");
            let port = self.read_key(&schema, "port");
            config.set_server(protocol, format_server(&host, &port));
        }
        config.proxy.bypass = parse_gvariant_strv(&self.read_key(GNOME_PROXY, "ignore-hosts")).join(",");
        config.pac.enabled = mode == "auto";
        config.pac.url = clean_output(&self.read_key(GNOME_PROXY, "autoconfig-url"));
        config
    }

    fn read_kde(&self) -> ProxyConfig {
        let proxy_type = clean_output(&self.read_key(KDE_GROUP, "ProxyType"));
        let mut config = ProxyConfig::default();
        config.proxy.enabled = proxy_type == "1";
        config.proxy.same_for_all = clean_output(&self.read_key(KDE_GROUP, "UseSameProxy")) == "true";
        for protocol in Protocol::ALL {
            let raw = self.read_key(KDE_GROUP, kde_server_key(protocol));
            config.set_server(protocol, parse_kde_server(&raw));
        }
        config.proxy.bypass = split_bypass(&self.read_key(KDE_GROUP, "NoProxyFor")).join(",");
        config.pac.enabled = proxy_type == "2";
        config.pac.url = clean_output(&self.read_key(KDE_GROUP, "Proxy Config Script"));
        config
    }
}

impl ProxyBackend for DesktopBackend {
    type Op = KeyWrite;

    // kwriteconfig rewrites the whole kioslaverc on every call.
    fn issue_mode(&self) -> IssueMode {
        match self.flavor {
            DesktopFlavor::Gnome => IssueMode::Parallel,
            DesktopFlavor::Kde { .. } => IssueMode::Sequential,
        }
    }

    fn discover(&self, _active_only: bool) -> Result<Vec<Target>, SysProxyError> {
        Ok(vec![Target::Session])
    }

    fn read_settings(&self, _target: &Target) -> Result<ProxyConfig, SysProxyError> {
        Ok(match self.flavor {
            DesktopFlavor::Gnome => self.read_gnome(),
            DesktopFlavor::Kde { .. } => self.read_kde(),
        })
    }

    fn proxy_ops(&self, server: &ServerAddr, bypass: &[String]) -> Vec<KeyWrite> {
        match self.flavor {
            DesktopFlavor::Gnome => {
                let mut ops = vec![KeyWrite::new(GNOME_PROXY, "mode", "manual")];
                for protocol in MANUAL_PROTOCOLS {
                    let schema = gnome_schema(protocol);
                    ops.push(KeyWrite::new(schema.clone(), "host", server.host.clone()));
                    ops.push(KeyWrite::new(schema, "port", server.port.clone()));
                }
                ops.push(KeyWrite::new(GNOME_PROXY, "use-same-proxy", "true"));
                if !bypass.is_empty() {
                    ops.push(KeyWrite::new(GNOME_PROXY, "ignore-hosts", to_gvariant_strv(bypass)));
                }
                ops
            }
            DesktopFlavor::Kde { .. } => {
                let mut ops = vec![KeyWrite::new(KDE_GROUP, "ProxyType", "1")];
                for protocol in MANUAL_PROTOCOLS {
                    ops.push(KeyWrite::new(
                        KDE_GROUP,
                        kde_server_key(protocol),
                        kde_server_value(protocol, server),
                    ));
                }
                ops.push(KeyWrite::new(KDE_GROUP, "ftpProxy", ""));
                ops.push(KeyWrite::new(KDE_GROUP, "UseSameProxy", "true"));
                ops.push(KeyWrite::new(KDE_GROUP, "NoProxyFor", bypass.join(",")));
                ops
            }
        }
    }

    fn pac_ops(&self, url: &str) -> Vec<KeyWrite> {
        match self.flavor {
            DesktopFlavor::Gnome => vec![
                KeyWrite::new(GNOME_PROXY, "autoconfig-url", url),
                KeyWrite::new(GNOME_PROXY, "mode", "auto"),
            ],
            DesktopFlavor::Kde { .. } => vec![
                KeyWrite::new(KDE_GROUP, "Proxy Config Script", url),
                KeyWrite::new(KDE_GROUP, "ProxyType", "2"),
            ],
        }
    }

    fn disable_ops(&self) -> Vec<KeyWrite> {
        match self.flavor {
            DesktopFlavor::Gnome => vec![KeyWrite::new(GNOME_PROXY, "mode", "none")],
            DesktopFlavor::Kde { .. } => vec![KeyWrite::new(KDE_GROUP, "ProxyType", "0")],
        }
    }

    fn execute(&self, _target: &Target, op: &KeyWrite) -> Result<()> {
        let (program, args) = self.write_command(op);
        self.runner.run(program, &args).map(|_| ())
    }
}

fn gnome_schema(protocol: Protocol) -> String {
    format!("{GNOME_PROXY}.{}", protocol.as_str())
}

fn kde_server_key(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Http => "httpProxy",
        Protocol::Https => "httpsProxy",
        Protocol::Socks => "socksProxy",
        Protocol::Ftp => "ftpProxy",
    }
}

// KDE's own settings module stores "scheme://host port".
fn kde_server_value(protocol: Protocol, server: &ServerAddr) -> String {
    let scheme = match protocol {
        Protocol::Socks => "socks",
        _ => "http",
    };
    format!("{scheme}://{} {}", server.host, server.port)
}

/// Normalize a kioslaverc server entry ("http://host port", "host:port", ...)
pub fn parse_kde_server(raw: &str) -> String {
    let cleaned = clean_output(raw);
    let without_scheme = cleaned
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&cleaned);
    let joined = without_scheme.trim().replace(' ', ":");
    normalize_server(&joined)
}

/// Items of a GVariant string array as printed by `gsettings get`
pub fn parse_gvariant_strv(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("@as").unwrap_or(trimmed).trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    split_bypass(inner)
}

/// GVariant string array literal for `gsettings set`
pub fn to_gvariant_strv(items: &[String]) -> String {
    let quoted: Vec<String> = items
        .iter()
        .map(|item| format!("'{}'", item.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::ScriptedRunner;

    fn gnome(runner: ScriptedRunner) -> (DesktopBackend, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (DesktopBackend::new(DesktopFlavor::Gnome, runner.clone()), runner)
    }

    fn kde(plasma6: bool, runner: ScriptedRunner) -> (DesktopBackend, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (
            DesktopBackend::new(DesktopFlavor::Kde { plasma6 }, runner.clone()),
            runner,
        )
    }

    #[test]
    fn gvariant_arrays_parse_and_render() {
        assert_eq!(
            parse_gvariant_strv("['localhost', '127.0.0.0/8', '::1']\n"),
            vec!["localhost", "127.0.0.0/8", "::1"]
        );
        assert!(parse_gvariant_strv("@as []\n").is_empty());
        assert_eq!(
            parse_gvariant_strv("['[::1]', 'localhost']"),
            vec!["[::1]", "localhost"]
        );
        assert_eq!(
            to_gvariant_strv(&["localhost".into(), "*.local".into()]),
            "['localhost', '*.local']"
        );
    }

    #[test]
    fn kde_server_entries_normalize() {
        assert_eq!(parse_kde_server("http://127.0.0.1 7890\n"), "127.0.0.1:7890");
        assert_eq!(parse_kde_server("127.0.0.1:7890"), "127.0.0.1:7890");
        assert_eq!(parse_kde_server("socks://10.0.0.1 1080"), "10.0.0.1:1080");
        assert_eq!(parse_kde_server(""), "");
        assert_eq!(parse_kde_server("0"), "");
        assert_eq!(parse_kde_server("http://[::1] 1080"), "[::1]:1080");
    }

    #[test]
    fn gnome_proxy_writes_mode_servers_then_bypass() {
        let (backend, _) = gnome(ScriptedRunner::new());
        let addr = ServerAddr::parse("127.0.0.1:7890").unwrap();
        let ops = backend.proxy_ops(&addr, &["localhost".into()]);

        assert_eq!(ops.first(), Some(&KeyWrite::new(GNOME_PROXY, "mode", "manual")));
        assert_eq!(
            ops.last(),
            Some(&KeyWrite::new(GNOME_PROXY, "ignore-hosts", "['localhost']"))
        );
        assert!(ops.contains(&KeyWrite::new("org.gnome.system.proxy.socks", "port", "7890")));
        assert_eq!(ops.len(), 1 + 6 + 1 + 1);
        assert_eq!(backend.issue_mode(), IssueMode::Parallel);
    }

    #[test]
    fn gnome_proxy_without_bypass_leaves_ignore_hosts() {
        let (backend, _) = gnome(ScriptedRunner::new());
        let addr = ServerAddr::parse("127.0.0.1:7890").unwrap();
        let ops = backend.proxy_ops(&addr, &[]);
        assert!(ops.iter().all(|op| op.key != "ignore-hosts"));
    }

    #[test]
    fn gnome_reads_normalize_quoted_values() {
        let runner = ScriptedRunner::new()
            .reply("gsettings get org.gnome.system.proxy mode", "'manual'\n")
            .reply("gsettings get org.gnome.system.proxy use-same-proxy", "true\n")
            .reply("gsettings get org.gnome.system.proxy.http host", "'127.0.0.1'\n")
            .reply("gsettings get org.gnome.system.proxy.http port", "7890\n")
            .reply("gsettings get org.gnome.system.proxy.https host", "''\n")
            .reply("gsettings get org.gnome.system.proxy.https port", "0\n")
            .fail("gsettings get org.gnome.system.proxy.socks host", "no schema")
            .reply(
                "gsettings get org.gnome.system.proxy ignore-hosts",
                "['localhost', '127.0.0.0/8']\n",
            )
            .reply("gsettings get org.gnome.system.proxy autoconfig-url", "''\n");
        let (backend, _) = gnome(runner);

        let config = backend.read_settings(&Target::Session).unwrap();
        assert!(config.proxy.enabled);
        assert!(config.proxy.same_for_all);
        assert_eq!(config.server(Protocol::Http), "127.0.0.1:7890");
        assert_eq!(config.server(Protocol::Https), "");
        assert_eq!(config.server(Protocol::Socks), "");
        assert_eq!(config.proxy.bypass, "localhost,127.0.0.0/8");
        assert!(!config.pac.enabled);
        assert_eq!(config.pac.url, "");
    }

    #[test]
    fn gnome_pac_and_disable() {
        let (backend, runner) = gnome(ScriptedRunner::new());
        for op in backend.pac_ops("http://127.0.0.1/pac") {
            backend.execute(&Target::Session, &op).unwrap();
        }
        for op in backend.disable_ops() {
            backend.execute(&Target::Session, &op).unwrap();
        }
        let calls: Vec<String> = runner.calls().iter().map(|c| c.join(" ")).collect();
        assert_eq!(
            calls,
            vec![
                "gsettings set org.gnome.system.proxy autoconfig-url http://127.0.0.1/pac",
                "gsettings set org.gnome.system.proxy mode auto",
                "gsettings set org.gnome.system.proxy mode none",
            ]
        );
    }

    #[test]
    fn kde_writes_go_through_versioned_tool() {
        let (backend, runner) = kde(true, ScriptedRunner::new());
        let addr = ServerAddr::parse("127.0.0.1:7890").unwrap();
        let ops = backend.proxy_ops(&addr, &["localhost".into(), "127.0.0.1".into()]);
        assert_eq!(backend.issue_mode(), IssueMode::Sequential);
        assert_eq!(ops.first(), Some(&KeyWrite::new(KDE_GROUP, "ProxyType", "1")));
        assert_eq!(
            ops.last(),
            Some(&KeyWrite::new(KDE_GROUP, "NoProxyFor", "localhost,127.0.0.1"))
        );

        backend.execute(&Target::Session, &ops[1]).unwrap();
        assert_eq!(
            runner.calls(),
            vec![vec![
                "kwriteconfig6",
                "--file",
                "kioslaverc",
                "--group",
                "Proxy Settings",
                "--key",
                "httpProxy",
                "http://127.0.0.1 7890",
            ]]
        );
    }

    #[test]
    fn kde_reads_round_trip_written_values() {
        let runner = ScriptedRunner::new()
            .reply(
                "kreadconfig5 --file kioslaverc --group Proxy Settings --key ProxyType",
                "1\n",
            )
            .reply(
                "kreadconfig5 --file kioslaverc --group Proxy Settings --key httpProxy",
                "http://127.0.0.1 7890\n",
            )
            .reply(
                "kreadconfig5 --file kioslaverc --group Proxy Settings --key socksProxy",
                "socks://127.0.0.1 7890\n",
            )
            .reply(
                "kreadconfig5 --file kioslaverc --group Proxy Settings --key NoProxyFor",
                "localhost,127.0.0.1\n",
            )
            .reply(
                "kreadconfig5 --file kioslaverc --group Proxy Settings --key UseSameProxy",
                "true\n",
            );
        let (backend, _) = kde(false, runner);

        let config = backend.read_settings(&Target::Session).unwrap();
        assert!(config.proxy.enabled);
        assert!(config.proxy.same_for_all);
        assert_eq!(config.server(Protocol::Http), "127.0.0.1:7890");
        assert_eq!(config.server(Protocol::Https), "");
        assert_eq!(config.server(Protocol::Socks), "127.0.0.1:7890");
        assert_eq!(config.proxy.bypass, "localhost,127.0.0.1");
        assert!(!config.pac.enabled);
    }

    #[test]
    fn kde_reads_keep_bracketed_ipv6() {
        let runner = ScriptedRunner::new()
            .reply(
                "kreadconfig5 --file kioslaverc --group Proxy Settings --key ProxyType",
                "1\n",
            )
            .reply(
                "kreadconfig5 --file kioslaverc --group Proxy Settings --key httpProxy",
                "http://[::1] 1080\n",
            )
            .reply(
                "kreadconfig5 --file kioslaverc --group Proxy Settings --key NoProxyFor",
                "[::1],localhost\n",
            );
        let (backend, _) = kde(false, runner);

        let config = backend.read_settings(&Target::Session).unwrap();
        assert_eq!(config.server(Protocol::Http), "[::1]:1080");
        assert_eq!(config.proxy.bypass, "[::1],localhost");
        assert!(ServerAddr::parse(config.server(Protocol::Http)).is_some());
    }

    #[test]
    fn session_is_the_only_target() {
        let (backend, runner) = kde(false, ScriptedRunner::new());
        assert_eq!(backend.discover(true).unwrap(), vec![Target::Session]);
        assert!(runner.calls().is_empty());
    }
}

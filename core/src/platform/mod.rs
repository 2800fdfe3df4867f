//! Platform backends for the system proxy engine.
//!
//! Each backend reaches its native subsystem through a small seam
//! ([`CommandRunner`] or [`wininet::ConnectionOptionStore`]) so translation
//! and parsing can be exercised on any host.

pub mod desktop;
pub mod networksetup;
pub mod wininet;

use anyhow::{anyhow, Context, Result};
use std::process::Command;

/// Launches native command-line tools
pub trait CommandRunner: Send + Sync {
    /// Run `program` and return its stdout. A non-zero exit is an error.
    fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Runs commands on the host.
///
/// With `as_invoking_user`, a process running with an effective uid of root
/// launches children under its real uid/gid so desktop tools reach the
/// user's own session store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner {
    as_invoking_user: bool,
}

impl SystemCommandRunner {
    pub const fn new() -> Self {
        Self {
            as_invoking_user: false,
        }
    }

    pub const fn as_invoking_user() -> Self {
        Self {
            as_invoking_user: true,
        }
    }

    #[cfg(unix)]
    fn drop_privileges(&self, command: &mut Command) {
        use std::os::unix::process::CommandExt;

        if !self.as_invoking_user {
            return;
        }
        // SAFETY: these calls only read the process credentials.
        let (euid, uid, gid) = unsafe { (libc::geteuid(), libc::getuid(), libc::getgid()) };
        if euid == 0 {
            command.uid(uid).gid(gid);
        }
    }

    #[cfg(not(unix))]
    fn drop_privileges(&self, _command: &mut Command) {}
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let mut command = Command::new(program);
        command.args(args);
        self.drop_privileges(&mut command);

        let output = command
            .output()
            .with_context(|| format!("failed to run {program} with args {args:?}"))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(anyhow!(
            "{program} {args:?} exited with {}: {}",
            output.status,
            stderr.trim()
        ))
    }
}

/// Render an invocation the way a shell user would type it
pub(crate) fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            rendered.push_str(&format!("{arg:?}"));
        } else {
            rendered.push_str(arg);
        }
    }
    rendered
}

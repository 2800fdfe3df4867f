#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use rust_lib_sysproxy::platform::CommandRunner;

pub const SERVICE_ORDER: &str = "\
An asterisk (*) denotes that a network service is disabled.
(1) Wi-Fi
(Hardware Port: Wi-Fi, Device: en0)

(2) Ethernet
(Hardware Port: Ethernet, Device: en1)

(*) Bluetooth PAN
(Hardware Port: Bluetooth PAN, Device: en3)
";

/// Answers commands from a script keyed by the full command line and keeps
/// every argv it was asked to run.
#[derive(Default)]
pub struct RecordingRunner {
    replies: Mutex<HashMap<String, std::result::Result<String, String>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, command: &str, stdout: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(command.to_string(), Ok(stdout.to_string()));
        self
    }

    pub fn fail(self, command: &str, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(command.to_string(), Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded invocations whose second argument names `service`, as
    /// `flag args...` strings.
    pub fn service_calls(&self, service: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.get(2).map(String::as_str) == Some(service))
            .map(|call| {
                let mut parts = vec![call[1].clone()];
                parts.extend(call[3..].iter().cloned());
                parts.join(" ")
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        let key = call.join(" ");
        self.calls.lock().unwrap().push(call);
        match self.replies.lock().unwrap().get(&key) {
            Some(Ok(stdout)) => Ok(stdout.clone()),
            Some(Err(message)) => Err(anyhow!(message.clone())),
            None => Ok(String::new()),
        }
    }
}

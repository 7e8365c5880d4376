//! Scripted [`CommandRunner`] for unit tests.

use crate::error::{BrewError, Result};
use crate::events::{Event, EventSink};
use crate::executor::{CommandInvocation, CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};

#[derive(Clone)]
enum Reply {
    Output {
        stdout: String,
        stderr: String,
        code: i32,
    },
    Timeout,
}

/// Replies to argument lists (joined with spaces) with canned output.
///
/// Unknown commands exit 1 with `Error: Unknown command`. Spawned children
/// are real `sh` processes that print the canned stdout and stderr; a
/// command registered with [`ScriptedRunner::time_out`] fails to spawn.
pub struct ScriptedRunner {
    replies: HashMap<String, Reply>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, args: &str, stdout: &str) -> Self {
        self.reply(args, stdout, "", 0)
    }

    pub fn fail(self, args: &str, stderr: &str, code: i32) -> Self {
        self.reply(args, "", stderr, code)
    }

    pub fn reply(mut self, args: &str, stdout: &str, stderr: &str, code: i32) -> Self {
        self.replies.insert(
            args.to_string(),
            Reply::Output {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                code,
            },
        );
        self
    }

    pub fn time_out(mut self, args: &str) -> Self {
        self.replies.insert(args.to_string(), Reply::Timeout);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self, args: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == args)
            .count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn lookup(&self, invocation: &CommandInvocation) -> Reply {
        let key = invocation.args.join(" ");
        self.calls.lock().unwrap().push(key.clone());
        self.replies.get(&key).cloned().unwrap_or(Reply::Output {
            stdout: String::new(),
            stderr: format!("Error: Unknown command: {}", key),
            code: 1,
        })
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn output(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        let reply = self.lookup(invocation);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Output {
                stdout,
                stderr,
                code,
            } => Ok(CommandOutput::new(stdout, stderr, Some(code))),
            Reply::Timeout => Err(BrewError::Timeout {
                duration: invocation.timeout.unwrap_or_default(),
                args: invocation.args.clone(),
            }),
        }
    }

    fn spawn(&self, invocation: &CommandInvocation) -> Result<Child> {
        let (stdout, stderr, code) = match self.lookup(invocation) {
            Reply::Output {
                stdout,
                stderr,
                code,
            } => (stdout, stderr, code),
            Reply::Timeout => {
                return Err(BrewError::Spawn {
                    args: invocation.args.clone(),
                    message: "scripted spawn failure".to_string(),
                });
            }
        };

        Command::new("sh")
            .arg("-c")
            .arg("printf '%s' \"$OUT\"; printf '%s' \"$ERR\" >&2; exit \"$CODE\"")
            .env("OUT", stdout)
            .env("ERR", stderr)
            .env("CODE", code.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrewError::Spawn {
                args: invocation.args.clone(),
                message: e.to_string(),
            })
    }
}

/// Sink that records every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.name).collect()
    }

    pub fn payloads(&self, name: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .map(|e| e.payload)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &str, payload: &str) {
        self.events.lock().unwrap().push(Event {
            name: event.to_string(),
            payload: payload.to_string(),
        });
    }
}

//! Execution of the brew CLI with timeouts and a single-flight result cache.
//!
//! Read-only invocations are cached by their exact argument list. Concurrent
//! identical invocations share one process execution: the first caller runs
//! the command, the others wait for it and receive the same result. Entries
//! never expire on their own; [`Executor::clear_cache`] is the only way to
//! invalidate them. Mutating invocations always execute.

use crate::error::{BrewError, Result};
use crate::logging::LogQueue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

/// Default limit for read-only queries.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// `brew update` refreshes taps over the network.
pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(60);
/// `brew cleanup --dry-run` walks the whole Cellar.
pub const CLEANUP_DRY_RUN_TIMEOUT: Duration = Duration::from_secs(120);
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(300);
/// `brew bundle dump` queries every installed package.
pub const BUNDLE_TIMEOUT: Duration = Duration::from_secs(120);

const CACHE_CAPACITY: u64 = 512;

const MUTATING_COMMANDS: &[&str] = &[
    "install",
    "uninstall",
    "reinstall",
    "upgrade",
    "untap",
    "cleanup",
    "update",
    "bundle",
    "link",
    "unlink",
    "pin",
    "unpin",
    "autoremove",
];

/// Whether an argument list has side effects and must bypass the cache.
///
/// `tap` without a target only lists taps and is read-only.
pub fn is_mutating<S: AsRef<str>>(args: &[S]) -> bool {
    let Some(first) = args.first() else {
        return false;
    };
    match first.as_ref() {
        "tap" => args.iter().skip(1).any(|a| !a.as_ref().starts_with('-')),
        cmd => MUTATING_COMMANDS.contains(&cmd),
    }
}

/// One invocation of the brew binary. Built fresh per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// `None` runs without a limit (streamed mutating commands)
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub captured_at: DateTime<Utc>,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, code: Option<i32>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            code,
            captured_at: Utc::now(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let mut text = self.stdout.clone();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&self.stderr);
                text
            }
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self::new(
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
            output.status.code(),
        )
    }
}

/// Process-launching capability.
///
/// `output` runs to completion and reports non-zero exits as a normal
/// [`CommandOutput`]; only launch failures and timeouts are errors.
/// `spawn` starts a child with piped stdout and stderr for streaming.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn output(&self, invocation: &CommandInvocation) -> Result<CommandOutput>;

    fn spawn(&self, invocation: &CommandInvocation) -> Result<Child>;
}

/// Runs real processes through `tokio::process`.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        let child = self.spawn(invocation)?;

        // Dropping the wait future drops the child, and kill_on_drop kills it.
        let output = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    return Err(BrewError::Timeout {
                        duration: limit,
                        args: invocation.args.clone(),
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        Ok(output.into())
    }

    fn spawn(&self, invocation: &CommandInvocation) -> Result<Child> {
        invocation
            .command()
            .spawn()
            .map_err(|e| BrewError::Spawn {
                args: invocation.args.clone(),
                message: e.to_string(),
            })
    }
}

/// Executes brew commands for one application session.
///
/// Cloning is cheap and clones share the cache.
#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    brew_path: PathBuf,
    env: Vec<(String, String)>,
    cache: moka::future::Cache<Vec<String>, Arc<CommandOutput>>,
    log: LogQueue,
}

impl Executor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        brew_path: impl Into<PathBuf>,
        env: Vec<(String, String)>,
        log: LogQueue,
    ) -> Self {
        Self {
            runner,
            brew_path: brew_path.into(),
            env,
            cache: moka::future::Cache::new(CACHE_CAPACITY),
            log,
        }
    }

    pub fn brew_path(&self) -> &Path {
        &self.brew_path
    }

    fn invocation(&self, args: Vec<String>, timeout: Option<Duration>) -> CommandInvocation {
        CommandInvocation {
            program: self.brew_path.clone(),
            args,
            env: self.env.clone(),
            timeout,
        }
    }

    /// Run brew with `args`, serving read-only commands from the cache.
    pub async fn run<S: AsRef<str>>(
        &self,
        args: &[S],
        timeout: Duration,
    ) -> Result<Arc<CommandOutput>> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        if args.is_empty() {
            return Err(BrewError::Execution {
                args,
                code: None,
                output: "empty argument list".to_string(),
            });
        }

        if is_mutating(&args) {
            return self.execute(args, timeout).await.map(Arc::new);
        }

        // Only successful results are stored. A failure is handed to every
        // caller waiting on the same key and then forgotten.
        let key = args.clone();
        self.cache
            .try_get_with(key, async move { self.execute(args, timeout).await.map(Arc::new) })
            .await
            .map_err(Arc::unwrap_or_clone)
    }

    /// Run brew with `args`, always executing and never touching the cache.
    pub async fn run_fresh<S: AsRef<str>>(
        &self,
        args: &[S],
        timeout: Duration,
    ) -> Result<Arc<CommandOutput>> {
        let args = args.iter().map(|a| a.as_ref().to_string()).collect();
        self.execute(args, timeout).await.map(Arc::new)
    }

    async fn execute(&self, args: Vec<String>, timeout: Duration) -> Result<CommandOutput> {
        let invocation = self.invocation(args, Some(timeout));
        let shown = invocation.args.join(" ");
        self.log.log(format!("▶ brew {}", shown));
        tracing::debug!("Running brew {}", shown);

        let start = Instant::now();
        let result = self.runner.output(&invocation).await;
        let elapsed = start.elapsed().as_millis();

        match result {
            Ok(output) if output.success() => {
                self.log
                    .log(format!("✓ brew {} ({}ms)", shown, elapsed));
                Ok(output)
            }
            Ok(output) => {
                self.log.log(format!(
                    "✗ brew {} exited with {:?} ({}ms)",
                    shown, output.code, elapsed
                ));
                Err(BrewError::Execution {
                    args: invocation.args,
                    code: output.code,
                    output: output.combined(),
                })
            }
            Err(err) => {
                self.log.log(format!("✗ brew {}: {}", shown, err));
                tracing::warn!("brew {} failed: {}", shown, err);
                Err(err)
            }
        }
    }

    /// Start a streamed child process. Never cached, no timeout.
    pub fn spawn<S: AsRef<str>>(&self, args: &[S]) -> Result<Child> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        self.log.log(format!("▶ brew {} (streaming)", args.join(" ")));
        self.runner.spawn(&self.invocation(args, None))
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        tracing::debug!("Clearing command cache");
        self.cache.invalidate_all();
    }

    pub fn log(&self) -> &LogQueue {
        &self.log
    }

    /// Check that the configured brew exists and answers `--version`.
    pub async fn validate_installation(&self) -> Result<()> {
        if !self.brew_path.exists() {
            return Err(BrewError::NotFound(self.brew_path.display().to_string()));
        }

        match self.run(&["--version"], DEFAULT_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err(err) => Err(BrewError::NotWorking(err.to_string())),
        }
    }

    /// First line of `brew --version`, e.g. `Homebrew 4.4.2`.
    pub async fn version(&self) -> Result<String> {
        let output = self.run(&["--version"], DEFAULT_TIMEOUT).await?;
        Ok(output.stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn executor(runner: Arc<ScriptedRunner>) -> Executor {
        Executor::new(runner, "/bin/sh", Vec::new(), LogQueue::disabled())
    }

    #[test]
    fn test_is_mutating() {
        assert!(is_mutating(&["install", "wget"]));
        assert!(is_mutating(&["upgrade"]));
        assert!(is_mutating(&["cleanup", "--dry-run"]));
        assert!(is_mutating(&["tap", "homebrew/cask-fonts"]));
        assert!(!is_mutating(&["tap"]));
        assert!(!is_mutating(&["list", "--formula", "--versions"]));
        assert!(!is_mutating(&["outdated", "--json=v2"]));
        assert!(!is_mutating::<&str>(&[]));
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput::new("a", "b\n", Some(1));
        assert_eq!(out.combined(), "a\nb\n");
        assert_eq!(CommandOutput::new("", "err", Some(1)).combined(), "err");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_concurrent_identical_reads_execute_once() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .respond("list --formula --versions", "git 2.40.0\n")
                .with_delay(Duration::from_millis(50)),
        );
        let exec = executor(runner.clone());

        let calls = (0..8).map(|_| exec.run(&["list", "--formula", "--versions"], DEFAULT_TIMEOUT));
        let results = futures::future::join_all(calls).await;

        assert_eq!(runner.call_count("list --formula --versions"), 1);
        for result in results {
            assert_eq!(result.unwrap().stdout, "git 2.40.0\n");
        }
    }

    #[tokio::test]
    async fn test_clear_cache_forces_reexecution() {
        let runner = Arc::new(ScriptedRunner::new().respond("leaves", "wget\n"));
        let exec = executor(runner.clone());

        exec.run(&["leaves"], DEFAULT_TIMEOUT).await.unwrap();
        exec.run(&["leaves"], DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(runner.call_count("leaves"), 1);

        exec.clear_cache();
        exec.run(&["leaves"], DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(runner.call_count("leaves"), 2);
    }

    #[tokio::test]
    async fn test_mutating_commands_bypass_cache() {
        let runner = Arc::new(ScriptedRunner::new().respond("cleanup", "done\n"));
        let exec = executor(runner.clone());

        exec.run(&["cleanup"], DEFAULT_TIMEOUT).await.unwrap();
        exec.run(&["cleanup"], DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(runner.call_count("cleanup"), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let runner = Arc::new(ScriptedRunner::new().fail("info --json=v2 nope", "Error: No available formula", 1));
        let exec = executor(runner.clone());

        let err = exec
            .run(&["info", "--json=v2", "nope"], DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, BrewError::Execution { code: Some(1), .. }));

        exec.run(&["info", "--json=v2", "nope"], DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(runner.call_count("info --json=v2 nope"), 2);
    }

    #[tokio::test]
    async fn test_timeout_error_is_propagated() {
        let runner = Arc::new(ScriptedRunner::new().time_out("doctor"));
        let exec = executor(runner);

        let err = exec.run(&["doctor"], DEFAULT_TIMEOUT).await.unwrap_err();
        match err {
            BrewError::Timeout { duration, args } => {
                assert_eq!(duration, DEFAULT_TIMEOUT);
                assert_eq!(args, vec!["doctor"]);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_args_rejected() {
        let exec = executor(Arc::new(ScriptedRunner::new()));
        assert!(exec.run::<&str>(&[], DEFAULT_TIMEOUT).await.is_err());
    }

    #[tokio::test]
    async fn test_validate_missing_binary() {
        let exec = Executor::new(
            Arc::new(ScriptedRunner::new()),
            "/definitely/not/here/brew",
            Vec::new(),
            LogQueue::disabled(),
        );
        assert!(matches!(
            exec.validate_installation().await,
            Err(BrewError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_broken_binary() {
        let runner = Arc::new(ScriptedRunner::new().fail("--version", "dyld: Library not loaded", 6));
        let exec = executor(runner);
        assert!(matches!(
            exec.validate_installation().await,
            Err(BrewError::NotWorking(_))
        ));
    }

    #[tokio::test]
    async fn test_version_first_line() {
        let runner = Arc::new(
            ScriptedRunner::new().respond("--version", "Homebrew 4.4.2\nHomebrew/homebrew-core (git revision 1)\n"),
        );
        let exec = executor(runner);
        exec.validate_installation().await.unwrap();
        assert_eq!(exec.version().await.unwrap(), "Homebrew 4.4.2");
    }
}

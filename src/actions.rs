//! Streaming runner for mutating brew commands.
//!
//! Every operation follows the same lifecycle:
//!
//! ```text
//! Starting -> Streaming -> Succeeded | Failed | RetryEligible
//! RetryEligible -> Retrying -> Succeeded | Failed        (upgrade only)
//! ```
//!
//! stdout and stderr are read concurrently and each non-empty line is
//! published as a progress event as soon as it arrives. Line order is kept
//! within one stream but not across the two. Every operation ends with
//! exactly one `*Complete` event, including when the process cannot be
//! started. Mutating operations cannot be cancelled once started.
//!
//! An upgrade that fails because an application bundle already exists
//! (`It seems there is already an App at ...`) is retried once with
//! `--force`, but only for casks.

use crate::error::{BrewError, Result};
use crate::events::{self, EventSink, Messages};
use crate::executor::Executor;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Prefix for progress lines taken from stdout.
pub const STDOUT_PREFIX: &str = "📦 ";
/// Prefix for progress lines taken from stderr.
pub const STDERR_PREFIX: &str = "⚠️ ";

/// Lowercased stderr fragment identifying a replaceable app bundle.
const CONFLICT_SIGNATURE: &str = "already an app at";

/// Output fragments that, next to the app's own package name, mean it is being replaced.
const SELF_UPDATE_MARKERS: &[&str] = &[
    "installing",
    "upgrading",
    "pouring",
    "successfully",
    "🍺",
];

/// Whether stderr carries the recoverable "app already exists" signature.
pub fn is_recoverable_conflict(stderr: &str) -> bool {
    stderr.to_lowercase().contains(CONFLICT_SIGNATURE)
}

/// Names of the targets that failed with the recoverable signature.
///
/// brew reports them as `Error: <name>: It seems there is already an App at '...'`.
pub fn conflicting_targets(stderr: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    stderr
        .lines()
        .filter(|line| line.to_lowercase().contains(CONFLICT_SIGNATURE))
        .filter_map(|line| {
            let line = line.trim();
            let line = line.strip_prefix("Error:").unwrap_or(line).trim_start();
            let (name, _) = line.split_once(": ")?;
            let name = name.trim();
            (!name.is_empty() && !name.contains(' ')).then(|| name.to_string())
        })
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Whether a line of output shows `package` being installed or upgraded.
///
/// The name must appear as a whole token, so `brewdeck-helper` does not
/// count as `brewdeck`.
pub fn mentions_self_update(line: &str, package: &str) -> bool {
    let package = bare_token(package).to_lowercase();
    if package.is_empty() {
        return false;
    }
    let line = line.to_lowercase();
    let named = line
        .split(|c: char| c.is_whitespace() || c == '/')
        .map(bare_token)
        .any(|token| token == package);
    named && SELF_UPDATE_MARKERS.iter().any(|marker| line.contains(marker))
}

fn bare_token(text: &str) -> &str {
    text.trim_matches(|c: char| !c.is_alphanumeric())
}

/// `Error:` lines of a batch other than app conflicts of the `retried` targets.
fn unresolved_errors<'a>(stderr: &'a str, retried: &[String]) -> Vec<&'a str> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("Error:"))
        .filter(|line| {
            let targets = conflicting_targets(line);
            !targets.first().is_some_and(|name| retried.contains(name))
        })
        .collect()
}

/// Mutating operations that stream their output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Uninstall,
    Upgrade,
    Tap,
    Untap,
}

impl Operation {
    pub fn progress_event(self) -> &'static str {
        match self {
            Operation::Install => events::INSTALL_PROGRESS,
            Operation::Uninstall => events::UNINSTALL_PROGRESS,
            Operation::Upgrade => events::UPGRADE_PROGRESS,
            Operation::Tap => events::TAP_PROGRESS,
            Operation::Untap => events::UNTAP_PROGRESS,
        }
    }

    pub fn complete_event(self) -> &'static str {
        match self {
            Operation::Install => events::INSTALL_COMPLETE,
            Operation::Uninstall => events::UNINSTALL_COMPLETE,
            Operation::Upgrade => events::UPGRADE_COMPLETE,
            Operation::Tap => events::TAP_COMPLETE,
            Operation::Untap => events::UNTAP_COMPLETE,
        }
    }

    fn command(self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Uninstall => "uninstall",
            Operation::Upgrade => "upgrade",
            Operation::Tap => "tap",
            Operation::Untap => "untap",
        }
    }

    /// Only installs and upgrades can replace the app itself.
    fn watches_self(self) -> bool {
        matches!(self, Operation::Install | Operation::Upgrade)
    }
}

/// Lifecycle state of one streamed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Starting,
    Streaming,
    RetryEligible,
    Retrying,
    Succeeded,
    Failed,
}

/// Final result of a streamed operation, after its events were emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded { retried: bool, self_updated: bool },
    Failed { message: String },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded { .. })
    }
}

/// What one process run produced.
#[derive(Debug, Default)]
struct StreamResult {
    success: bool,
    code: Option<i32>,
    stderr: String,
    self_updated: bool,
}

impl StreamResult {
    /// Short reason for a failure: the last stderr line, or the exit code.
    fn reason(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(String::from)
            .unwrap_or_else(|| match self.code {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            })
    }
}

/// Per-invocation state of a streamed operation.
struct Run<'a> {
    op: Operation,
    targets: &'a str,
    state: ActionState,
}

impl<'a> Run<'a> {
    fn new(op: Operation, targets: &'a str) -> Self {
        Self {
            op,
            targets,
            state: ActionState::Starting,
        }
    }

    fn enter(&mut self, state: ActionState) {
        tracing::debug!(
            "{} {}: {:?} -> {:?}",
            self.op.command(),
            self.targets,
            self.state,
            state
        );
        self.state = state;
    }
}

/// Runs mutating operations and publishes their progress.
#[derive(Clone)]
pub struct ActionRunner {
    executor: Executor,
    sink: Arc<dyn EventSink>,
    messages: Arc<dyn Messages>,
    self_package: String,
}

impl ActionRunner {
    pub fn new(
        executor: Executor,
        sink: Arc<dyn EventSink>,
        messages: Arc<dyn Messages>,
        self_package: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            sink,
            messages,
            self_package: self_package.into(),
        }
    }

    fn text(&self, key: &str, params: &[(&str, &str)]) -> String {
        self.messages.format(key, params)
    }

    pub async fn install(&self, name: &str) -> ActionOutcome {
        self.simple(Operation::Install, name).await
    }

    pub async fn uninstall(&self, name: &str) -> ActionOutcome {
        self.simple(Operation::Uninstall, name).await
    }

    pub async fn tap(&self, name: &str) -> ActionOutcome {
        self.simple(Operation::Tap, name).await
    }

    pub async fn untap(&self, name: &str) -> ActionOutcome {
        self.simple(Operation::Untap, name).await
    }

    async fn simple(&self, op: Operation, name: &str) -> ActionOutcome {
        let key = op.command();
        let mut run = Run::new(op, name);
        self.sink.emit(
            op.progress_event(),
            &self.text(&format!("{key}.start"), &[("name", name)]),
        );

        let result = match self.stream(&mut run, &[key, name]).await {
            Ok(result) => result,
            Err(err) => return self.fail(&mut run, key, &[("name", name)], &err.to_string()),
        };

        if result.success {
            self.succeed(&mut run, key, &[("name", name)], false, result.self_updated)
        } else {
            self.fail(&mut run, key, &[("name", name)], &result.reason())
        }
    }

    /// Upgrade one package, retrying with `--force` on a cask app conflict.
    ///
    /// `is_cask` is the caller's classification of `name`.
    pub async fn upgrade(&self, name: &str, force: bool, is_cask: bool) -> ActionOutcome {
        let op = Operation::Upgrade;
        let params = [("name", name)];
        let mut run = Run::new(op, name);
        self.sink
            .emit(op.progress_event(), &self.text("upgrade.start", &params));

        let first = match self.stream(&mut run, &upgrade_args(force, &[name])).await {
            Ok(result) => result,
            Err(err) => return self.fail(&mut run, "upgrade", &params, &err.to_string()),
        };
        if first.success {
            return self.succeed(&mut run, "upgrade", &params, false, first.self_updated);
        }

        if force || !is_recoverable_conflict(&first.stderr) {
            return self.fail(&mut run, "upgrade", &params, &first.reason());
        }
        run.enter(ActionState::RetryEligible);
        if !is_cask {
            tracing::debug!("{} hit an app conflict but is not a cask, not retrying", name);
            let conflict = BrewError::RecoverableConflict {
                name: name.to_string(),
            };
            return self.fail(&mut run, "upgrade", &params, &conflict.to_string());
        }

        run.enter(ActionState::Retrying);
        self.sink
            .emit(op.progress_event(), &self.text("upgrade.retryForce", &params));
        let retry = match self.stream(&mut run, &upgrade_args(true, &[name])).await {
            Ok(result) => result,
            Err(err) => return self.fail(&mut run, "upgrade", &params, &err.to_string()),
        };

        let self_updated = first.self_updated || retry.self_updated;
        if retry.success {
            self.succeed(&mut run, "upgrade", &params, true, self_updated)
        } else {
            self.fail(&mut run, "upgrade", &params, &retry.reason())
        }
    }

    /// Upgrade several packages in one invocation.
    pub async fn upgrade_selected(
        &self,
        names: &[String],
        is_cask: impl Fn(&str) -> bool,
    ) -> ActionOutcome {
        let joined = names.join(", ");
        let targets: Vec<&str> = names.iter().map(String::as_str).collect();
        self.batch(
            "upgradeSelected",
            &joined,
            &upgrade_args(false, &targets),
            is_cask,
        )
        .await
    }

    /// Upgrade every outdated package.
    pub async fn upgrade_all(&self, is_cask: impl Fn(&str) -> bool) -> ActionOutcome {
        self.batch("upgradeAll", "all", &["upgrade".to_string()], is_cask)
            .await
    }

    async fn batch<S: AsRef<str>>(
        &self,
        key: &str,
        names: &str,
        args: &[S],
        is_cask: impl Fn(&str) -> bool,
    ) -> ActionOutcome {
        let op = Operation::Upgrade;
        let params = [("names", names)];
        let mut run = Run::new(op, names);
        self.sink
            .emit(op.progress_event(), &self.text(&format!("{key}.start"), &params));

        let first = match self.stream(&mut run, args).await {
            Ok(result) => result,
            Err(err) => return self.fail(&mut run, key, &params, &err.to_string()),
        };
        if first.success {
            return self.succeed(&mut run, key, &params, false, first.self_updated);
        }

        let retryable: Vec<String> = if is_recoverable_conflict(&first.stderr) {
            conflicting_targets(&first.stderr)
                .into_iter()
                .filter(|name| is_cask(name.as_str()))
                .collect()
        } else {
            Vec::new()
        };
        if retryable.is_empty() {
            return self.fail(&mut run, key, &params, &first.reason());
        }

        run.enter(ActionState::RetryEligible);
        run.enter(ActionState::Retrying);
        let mut succeeded = 0usize;
        let mut self_updated = first.self_updated;
        for name in &retryable {
            self.sink.emit(
                op.progress_event(),
                &self.text("upgrade.retryForce", &[("name", name.as_str())]),
            );
            // Retries are collected, not streamed; only the summary is published.
            match self.collect(&upgrade_args(true, &[name.as_str()])).await {
                Ok((true, replaced_self)) => {
                    succeeded += 1;
                    self_updated |= replaced_self;
                }
                Ok((false, _)) => tracing::warn!("Forced upgrade of {} failed", name),
                Err(err) => tracing::warn!("Forced upgrade of {} could not start: {}", name, err),
            }
        }

        let total = retryable.len().to_string();
        let ok = succeeded.to_string();
        let failed = (retryable.len() - succeeded).to_string();
        let summary = self.text(
            "upgrade.retrySummary",
            &[
                ("total", total.as_str()),
                ("succeeded", ok.as_str()),
                ("failed", failed.as_str()),
            ],
        );
        self.sink.emit(op.progress_event(), &summary);

        // Targets that failed for other reasons were never retried.
        let unresolved = unresolved_errors(&first.stderr, &retryable);
        if succeeded == retryable.len() && unresolved.is_empty() {
            self.succeed(&mut run, key, &params, true, self_updated)
        } else if unresolved.is_empty() {
            self.fail(&mut run, key, &params, &summary)
        } else {
            let reason = format!("{} ({})", unresolved.join("; "), summary);
            self.fail(&mut run, key, &params, &reason)
        }
    }

    /// Report an operation that was refused before it started.
    pub fn reject(
        &self,
        op: Operation,
        key: &str,
        params: &[(&str, &str)],
        reason: &str,
    ) -> ActionOutcome {
        let targets = params.first().map_or("", |(_, value)| *value);
        let mut run = Run::new(op, targets);
        self.fail(&mut run, key, params, reason)
    }

    fn succeed(
        &self,
        run: &mut Run<'_>,
        key: &str,
        params: &[(&str, &str)],
        retried: bool,
        self_updated: bool,
    ) -> ActionOutcome {
        run.enter(ActionState::Succeeded);
        // Whatever was cached no longer describes the installation.
        self.executor.clear_cache();

        let message = self.text(&format!("{key}.success"), params);
        self.sink.emit(run.op.progress_event(), &message);
        self.sink.emit(run.op.complete_event(), &message);

        if self_updated {
            self.sink.emit(
                events::SELF_UPDATED,
                &self.text("self.updated", &[("name", self.self_package.as_str())]),
            );
        }
        ActionOutcome::Succeeded {
            retried,
            self_updated,
        }
    }

    fn fail(
        &self,
        run: &mut Run<'_>,
        key: &str,
        params: &[(&str, &str)],
        reason: &str,
    ) -> ActionOutcome {
        run.enter(ActionState::Failed);
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("error", reason));
        let message = self.text(&format!("{key}.failed"), &all);
        self.sink.emit(run.op.progress_event(), &message);
        self.sink.emit(run.op.complete_event(), &message);
        ActionOutcome::Failed { message }
    }

    /// Launch `args` and publish its output line by line until it exits.
    async fn stream<S: AsRef<str>>(&self, run: &mut Run<'_>, args: &[S]) -> Result<StreamResult> {
        let mut child = self.executor.spawn(args)?;
        run.enter(ActionState::Streaming);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let progress = run.op.progress_event();
        let watch = run.op.watches_self().then_some(self.self_package.as_str());

        let ((_, out_self), (err_text, err_self)) = tokio::join!(
            pump(stdout, STDOUT_PREFIX, progress, self.sink.as_ref(), watch),
            pump(stderr, STDERR_PREFIX, progress, self.sink.as_ref(), watch),
        );

        let status = child.wait().await?;
        self.executor.log().log(format!(
            "{} brew {} exited with {:?}",
            if status.success() { "✓" } else { "✗" },
            args.iter().map(|a| a.as_ref()).collect::<Vec<&str>>().join(" "),
            status.code()
        ));

        Ok(StreamResult {
            success: status.success(),
            code: status.code(),
            stderr: err_text,
            self_updated: out_self || err_self,
        })
    }

    /// Run `args` to completion without streaming.
    ///
    /// Returns whether it succeeded and whether its output showed a self-update.
    async fn collect(&self, args: &[String]) -> Result<(bool, bool)> {
        let child = self.executor.spawn(args)?;
        let output = child.wait_with_output().await?;
        let self_updated = [&output.stdout, &output.stderr].into_iter().any(|bytes| {
            String::from_utf8_lossy(bytes)
                .lines()
                .any(|line| mentions_self_update(line, &self.self_package))
        });
        Ok((output.status.success(), self_updated))
    }
}

fn upgrade_args(force: bool, names: &[&str]) -> Vec<String> {
    let mut args = vec!["upgrade".to_string()];
    if force {
        args.push("--force".to_string());
    }
    args.extend(names.iter().map(|n| n.to_string()));
    args
}

/// Read `reader` line by line, emitting each non-empty trimmed line.
///
/// Returns the raw text read and whether a self-update was seen.
async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    prefix: &str,
    event: &str,
    sink: &dyn EventSink,
    watch: Option<&str>,
) -> (String, bool) {
    let Some(reader) = reader else {
        return (String::new(), false);
    };

    let mut reader = BufReader::new(reader);
    let mut text = String::new();
    let mut self_updated = false;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!("Stopped reading command output: {}", err);
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        text.push_str(&line);

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(package) = watch {
            if mentions_self_update(trimmed, package) {
                self_updated = true;
            }
        }
        sink.emit(event, &format!("{}{}", prefix, trimmed));
    }

    (text, self_updated)
}

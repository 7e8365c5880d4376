//! Non-blocking session log.
//!
//! Lines are pushed into a bounded queue with `try_send` and drained by a
//! single background task. A full or closed queue drops the line, so the
//! command path never waits on logging.

use std::sync::Arc;
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 256;

/// Receiver of session log lines (e.g. an on-disk log buffer).
pub trait SessionLog: Send + Sync {
    fn append(&self, line: &str);
}

/// Session log that only forwards to `tracing`.
pub struct TracingLog;

impl SessionLog for TracingLog {
    fn append(&self, _line: &str) {}
}

/// Handle used to enqueue log lines.
#[derive(Clone)]
pub struct LogQueue {
    tx: Option<mpsc::Sender<String>>,
}

impl LogQueue {
    /// Spawn the drain task on the current tokio runtime.
    ///
    /// Outside a runtime the queue is created disabled and every line is
    /// dropped.
    pub fn spawn(log: Arc<dyn SessionLog>) -> Self {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No tokio runtime, session log disabled");
            return Self::disabled();
        };

        let (tx, mut rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        handle.spawn(async move {
            while let Some(line) = rx.recv().await {
                tracing::debug!(target: "brewdeck::session", "{}", line);
                log.append(&line);
            }
        });

        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Enqueue a line, prefixed with a local timestamp.
    pub fn log(&self, line: impl AsRef<str>) {
        let Some(tx) = &self.tx else {
            return;
        };
        let stamped = format!(
            "[{}] {}",
            chrono::Local::now().format("%H:%M:%S"),
            line.as_ref()
        );
        let _ = tx.try_send(stamped);
    }
}

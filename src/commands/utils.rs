use anyhow::{Result, bail};
use brewdeck::actions::{STDERR_PREFIX, STDOUT_PREFIX};
use brewdeck::{ActionOutcome, Event, events};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

pub fn is_tty() -> bool {
    std::io::stdout().is_terminal()
}

/// Spinner on a TTY, hidden otherwise.
pub fn spinner(message: impl Into<String>, enabled: bool) -> ProgressBar {
    if !enabled || !is_tty() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Print events until every sender is dropped.
pub fn spawn_printer(mut rx: UnboundedReceiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    })
}

fn print_event(event: &Event) {
    let payload = event.payload.as_str();
    match event.name.as_str() {
        events::DATABASE_UPDATED => {
            println!("{} Database updated: {}", "==>".bold().green(), payload);
        }
        events::SELF_UPDATED => println!("{}", payload.bold().magenta()),
        name if name.ends_with("Complete") => {
            // The final line was already shown as progress.
            tracing::debug!("{}: {}", name, payload);
        }
        _ => {
            if let Some(line) = payload.strip_prefix(STDOUT_PREFIX) {
                println!("  {}", line.dimmed());
            } else if let Some(line) = payload.strip_prefix(STDERR_PREFIX) {
                println!("  {}", line.yellow());
            } else if payload.starts_with('❌') {
                println!("{}", payload.red().bold());
            } else if payload.starts_with('✅') {
                println!("{}", payload.green().bold());
            } else {
                println!("{}", payload.bold());
            }
        }
    }
}

/// Turn a failed action into a CLI error.
pub fn finish(outcome: ActionOutcome) -> Result<()> {
    match outcome {
        ActionOutcome::Succeeded { .. } => Ok(()),
        ActionOutcome::Failed { message } => bail!(message),
    }
}

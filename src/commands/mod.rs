pub mod encode;
pub mod scan;
pub mod version;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, warn};

use crate::codec::WorkerOnlyCodec;
use crate::config::{Config, JsonSettingsStore};
use crate::instance::InstanceManager;
use crate::session::{CompletionCode, ProgressSnapshot, RunningPhase, SessionEvent, SessionEvents};

/// How following a session ended
pub(crate) enum SessionEnd {
    Completed(CompletionCode),
    Interrupted,
    /// The session was dropped without completing
    Closed,
}

/// Build an instance manager from the environment and initialise the codec library
pub(crate) async fn start_manager(no_hardware: bool) -> Result<InstanceManager> {
    let config = Config::from_env();
    debug!("Using configuration: {:?}", config);

    let settings = Arc::new(JsonSettingsStore::new(config.settings_path.clone()));
    let manager = InstanceManager::new(config, settings, Arc::new(WorkerOnlyCodec));
    manager.init(no_hardware).await?;
    Ok(manager)
}

/// Turn a completion code into the command's result
pub(crate) fn completion_result(code: CompletionCode, what: &str) -> Result<()> {
    let outcome = code.into_result();
    if outcome.as_ref().is_err_and(|e| e.is_worker_exited()) {
        warn!("The worker crashed. Its log output above may say why.");
    }
    outcome.with_context(|| format!("{} failed with code {}", what, code.code()))
}

pub(crate) fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(1000);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] [{bar:40}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

/// Draw session progress until it completes or the user interrupts
pub(crate) async fn follow_session(events: &mut SessionEvents, bar: &ProgressBar) -> SessionEnd {
    tokio::pin! {
        let shutdown_signal = signal::ctrl_c();
    }

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => return SessionEnd::Interrupted,
            event = events.recv() => match event {
                Some(SessionEvent::Progress(snapshot)) => render(bar, &snapshot),
                Some(SessionEvent::Completed(code)) => return SessionEnd::Completed(code),
                None => return SessionEnd::Closed,
            },
        }
    }
}

fn render(bar: &ProgressBar, snapshot: &ProgressSnapshot) {
    bar.set_position((snapshot.fraction_complete.clamp(0.0, 1.0) * 1000.0) as u64);

    let mut message = match snapshot.phase {
        RunningPhase::Scanning => "Scanning".to_string(),
        RunningPhase::Searching => "Searching".to_string(),
        RunningPhase::Encoding => "Encoding".to_string(),
        RunningPhase::Paused => "Paused".to_string(),
    };
    if let Some(scan) = snapshot.scan {
        message.push_str(&format!(" title {} of {}", scan.title, scan.title_count));
    }
    if let Some(pass) = snapshot.pass {
        message.push_str(&format!(" pass {} of {}", pass.pass, pass.pass_count));
    }
    if let Some(rate) = snapshot.current_rate {
        message.push_str(&format!(", {:.1} fps", rate));
    }
    if let Some(eta) = snapshot.estimated_time_left {
        message.push_str(&format!(", {}s left", eta.as_secs()));
    }
    bar.set_message(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;

    #[test]
    fn test_completion_result_carries_worker_error() {
        assert!(completion_result(CompletionCode::Success, "Scan").is_ok());

        let err = completion_result(CompletionCode::Unresponsive, "Scan").unwrap_err();
        assert_eq!(err.to_string(), "Scan failed with code -11");
        assert!(matches!(
            err.downcast_ref::<WorkerError>(),
            Some(WorkerError::Unresponsive)
        ));

        let err = completion_result(CompletionCode::Worker(2), "Encode").unwrap_err();
        assert!(format!("{:#}", err).contains("worker reported error code 2"));
    }
}

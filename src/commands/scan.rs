use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use super::{completion_result, follow_session, progress_bar, start_manager, SessionEnd};
use crate::job::ScanJob;
use crate::session::ScanResults;

/// Command to scan a source for titles
pub struct ScanCommand {
    source: PathBuf,
    title_index: u32,
    preview_count: u32,
    min_duration: Duration,
    no_hardware: bool,
}

impl ScanCommand {
    pub fn new(
        source: PathBuf,
        title_index: u32,
        preview_count: u32,
        min_duration: Duration,
        no_hardware: bool,
    ) -> Self {
        Self {
            source,
            title_index,
            preview_count,
            min_duration,
            no_hardware,
        }
    }

    fn job(&self) -> ScanJob {
        ScanJob {
            title_index: self.title_index,
            preview_count: self.preview_count,
            min_duration: self.min_duration,
            ..ScanJob::new(self.source.clone())
        }
    }

    pub async fn execute(&self) -> Result<()> {
        if !self.source.exists() {
            return Err(anyhow!("Source does not exist: {:?}", self.source));
        }

        let manager = start_manager(self.no_hardware).await?;
        let (instance, mut events) = manager.acquire_scan().await?;

        info!("🔎 Scanning: {:?}", self.source);
        instance.start(&self.job()).await?;

        let bar = progress_bar();
        let end = follow_session(&mut events, &bar).await;
        bar.finish_and_clear();

        let result = match end {
            SessionEnd::Completed(code) => completion_result(code, "Scan")
                .map(|()| print_results(instance.results().as_ref())),
            SessionEnd::Interrupted => {
                warn!("🛑 Interrupted. Stopping scan.");
                instance.stop().await;
                Err(anyhow!("Scan interrupted"))
            }
            SessionEnd::Closed => Err(anyhow!("Scan ended without completing")),
        };

        instance.dispose().await;
        manager.release().await;
        result
    }
}

fn print_results(results: Option<&ScanResults>) {
    let Some(titles) = results.and_then(|r| r.titles.as_ref()) else {
        println!("No titles found");
        return;
    };

    let main_title = results.and_then(|r| r.main_title);
    println!("Found {} titles:", titles.title_list.len());
    for title in &titles.title_list {
        let marker = if Some(title.index) == main_title { "*" } else { " " };
        let name = if title.name.is_empty() {
            &title.path
        } else {
            &title.name
        };
        println!(
            "{} {:>3}  {:>6}s  {}",
            marker,
            title.index,
            title.duration.total_seconds(),
            name
        );
    }
}

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use super::{completion_result, follow_session, progress_bar, start_manager, SessionEnd};
use crate::job::EncodeJob;

/// Command to run one encode described by a codec job document
pub struct EncodeCommand {
    job_file: PathBuf,
    no_hardware: bool,
}

impl EncodeCommand {
    pub fn new(job_file: PathBuf, no_hardware: bool) -> Self {
        Self {
            job_file,
            no_hardware,
        }
    }

    /// Read the job document and check it names a source and destination
    pub fn load_job(&self) -> Result<EncodeJob> {
        let content = std::fs::read_to_string(&self.job_file)
            .with_context(|| format!("Failed to read job file {:?}", self.job_file))?;
        let document: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Job file {:?} is not valid JSON", self.job_file))?;

        EncodeJob::from_document(document).ok_or_else(|| {
            anyhow!(
                "Job file {:?} must set Source.Path and Destination.File",
                self.job_file
            )
        })
    }

    pub async fn execute(&self) -> Result<()> {
        let job = self.load_job()?;
        if !job.source.exists() {
            return Err(anyhow!("Source does not exist: {:?}", job.source));
        }

        let manager = start_manager(self.no_hardware).await?;
        let (instance, mut events) = manager.acquire_encode().await?;

        info!("🚀 Encoding {:?} -> {:?}", job.source, job.destination);
        instance.start(&job).await?;

        let bar = progress_bar();
        let end = follow_session(&mut events, &bar).await;
        bar.finish_and_clear();

        let result = match end {
            SessionEnd::Completed(code) => completion_result(code, "Encode")
                .map(|()| info!("✅ Encode complete: {:?}", job.destination)),
            SessionEnd::Interrupted => {
                warn!("🛑 Interrupted. Stopping encode.");
                instance.stop().await;
                Err(anyhow!("Encode interrupted"))
            }
            SessionEnd::Closed => Err(anyhow!("Encode ended without completing")),
        };

        instance.dispose().await;
        manager.release().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_job_reads_paths_from_document() {
        let temp_dir = TempDir::new().unwrap();
        let job_file = temp_dir.path().join("job.json");
        fs::write(
            &job_file,
            r#"{"Source":{"Path":"/media/in.mkv"},"Destination":{"File":"/media/out.mp4"}}"#,
        )
        .unwrap();

        let job = EncodeCommand::new(job_file, false).load_job().unwrap();
        assert_eq!(job.source, PathBuf::from("/media/in.mkv"));
        assert_eq!(job.destination, PathBuf::from("/media/out.mp4"));
    }

    #[test]
    fn test_load_job_requires_destination() {
        let temp_dir = TempDir::new().unwrap();
        let job_file = temp_dir.path().join("job.json");
        fs::write(&job_file, r#"{"Source":{"Path":"/media/in.mkv"}}"#).unwrap();

        assert!(EncodeCommand::new(job_file, false).load_job().is_err());
    }
}

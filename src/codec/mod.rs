//! Boundary to the in-process codec library.
//!
//! The library itself lives outside this crate. The instance manager only needs
//! to initialise it once and create instances that run scans and encodes on the
//! host's own threads, reporting through a [`SessionTracker`].

use std::sync::Arc;

use crate::error::{WorkerError, WorkerResult};
use crate::job::{EncodeJob, ScanJob};
use crate::session::{ScanResults, SessionTracker};

/// Process-wide entry points of a codec library
pub trait CodecLibrary: Send + Sync {
    /// One-time global setup. May block for a long time on broken GPU drivers.
    fn global_init(&self, no_hardware: bool) -> Result<(), String>;

    fn create_instance(
        &self,
        verbosity: u8,
        no_hardware: bool,
    ) -> WorkerResult<Box<dyn CodecInstance>>;
}

/// An in-process codec instance.
///
/// Implementations report progress and completion through the tracker they are
/// handed; the tracker has already begun the session.
pub trait CodecInstance: Send + Sync {
    fn start_scan(&self, job: &ScanJob, tracker: Arc<SessionTracker>) -> WorkerResult<()>;

    fn stop_scan(&self);

    fn scan_results(&self) -> Option<ScanResults>;

    fn start_encode(&self, job: &EncodeJob, tracker: Arc<SessionTracker>) -> WorkerResult<()>;

    fn stop_encode(&self);

    fn dispose(&self);
}

/// Codec binding for hosts that only ever run work in the worker process.
///
/// Global init is a no-op and in-process instances are refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerOnlyCodec;

impl CodecLibrary for WorkerOnlyCodec {
    fn global_init(&self, _no_hardware: bool) -> Result<(), String> {
        Ok(())
    }

    fn create_instance(
        &self,
        _verbosity: u8,
        _no_hardware: bool,
    ) -> WorkerResult<Box<dyn CodecInstance>> {
        Err(WorkerError::CodecUnavailable(
            "no in-process codec is linked; enable process isolation".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_only_codec_refuses_local_instances() {
        let codec = WorkerOnlyCodec;
        assert!(codec.global_init(false).is_ok());
        assert!(matches!(
            codec.create_instance(1, false),
            Err(WorkerError::CodecUnavailable(_))
        ));
    }
}

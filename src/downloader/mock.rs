// Scripted engine used to drive tests without touching the network.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::engine::{CancelFn, FetchRequest, MediaEngine, ProgressFn};
use super::errors::DownloadError;
use super::models::{FlatEntry, FormatChoice, JobProgress, MediaMetadata};
use crate::strategy::FetchConfig;

pub struct MockEngine {
    pub list_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub entries: Vec<FlatEntry>,
    pub metadata: MediaMetadata,
    pub script: Vec<JobProgress>,
    pub file_stem: String,
    pub file_body: Vec<u8>,
    pub fail_list: bool,
    /// Slows the scripted transfer down so tests can cancel mid-flight.
    pub step_delay_ms: u64,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            list_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            entries: Vec::new(),
            metadata: MediaMetadata {
                id: "vid01".to_string(),
                title: "Test Clip".to_string(),
                uploader: Some("tester".to_string()),
                duration: Some(120.0),
                thumbnail: None,
                webpage_url: None,
            },
            script: vec![
                JobProgress::downloading("[download] 0.0% of 3.00MiB ETA 00:10 at 300KiB/s"),
                JobProgress::downloading("[download] 50.0% of 3.00MiB ETA 00:05 at 300KiB/s"),
                JobProgress::downloading("[download] 100% of 3.00MiB ETA 00:00 at 300KiB/s"),
                JobProgress::finishing("[download] 100% - Processing file..."),
            ],
            file_stem: "Test Clip".to_string(),
            file_body: b"media-bytes".to_vec(),
            fail_list: false,
            step_delay_ms: 0,
        }
    }
}

impl MockEngine {
    pub fn with_entries(entries: Vec<FlatEntry>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    pub fn listing_failure() -> Self {
        Self {
            fail_list: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch_metadata(
        &self,
        _url: &str,
        _config: &FetchConfig,
    ) -> Result<MediaMetadata, DownloadError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.metadata.clone())
    }

    async fn list(
        &self,
        _query: &str,
        _config: &FetchConfig,
    ) -> Result<Vec<FlatEntry>, DownloadError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(DownloadError::UpstreamFetchFailed("mock failure".into()));
        }
        Ok(self.entries.clone())
    }

    async fn fetch_media(
        &self,
        request: &FetchRequest,
        _config: &FetchConfig,
        progress: ProgressFn,
        cancel: CancelFn,
    ) -> Result<PathBuf, DownloadError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        // Same contract as the real engine: the cancel flag is polled on
        // every callback invocation, nothing is preemptive.
        for update in &self.script {
            if cancel() {
                return Err(DownloadError::Cancelled);
            }
            progress(update.clone());
            if self.step_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.step_delay_ms)).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
        if cancel() {
            return Err(DownloadError::Cancelled);
        }

        let ext = match request.choice {
            FormatChoice::Audio(codec) => codec.ext(),
            _ => "mp4",
        };
        let path = request.dest_dir.join(format!("{}.{}", self.file_stem, ext));
        std::fs::create_dir_all(&request.dest_dir)
            .map_err(|e| DownloadError::PostprocessFailed(e.to_string()))?;
        std::fs::write(&path, &self.file_body)
            .map_err(|e| DownloadError::PostprocessFailed(e.to_string()))?;
        Ok(path)
    }
}

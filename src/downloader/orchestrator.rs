// Drives one fetch-and-convert job end to end
//
// Resolves the fetch strategy, wires the engine's progress callback and
// cancel predicate to the job registry, branches on the requested output
// format, and hands back a file path plus MIME type. Serving and deleting
// the file is the caller's job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use super::engine::{CancelFn, FetchRequest, MediaEngine, ProgressFn};
use super::errors::DownloadError;
use super::models::{mime_for_path, FormatChoice, JobProgress};
use crate::registry::JobRegistry;
use crate::strategy::{FetchOverrides, StrategyResolver};

/// Bodies under this size are the upstream's "not found" placeholder image,
/// not a real cover.
const MIN_THUMBNAIL_BYTES: usize = 1000;

const DEFAULT_THUMB_BASE: &str = "https://i.ytimg.com";

pub struct Orchestrator {
    engine: Arc<dyn MediaEngine>,
    resolver: Arc<StrategyResolver>,
    registry: Arc<JobRegistry>,
    scratch_dir: PathBuf,
    http: reqwest::Client,
    thumb_base: String,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        resolver: Arc<StrategyResolver>,
        registry: Arc<JobRegistry>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            resolver,
            registry,
            scratch_dir: scratch_dir.into(),
            http: reqwest::Client::new(),
            thumb_base: DEFAULT_THUMB_BASE.to_string(),
        }
    }

    pub fn with_thumbnail_base(mut self, base: impl Into<String>) -> Self {
        self.thumb_base = base.into();
        self
    }

    /// Run a job to completion. A failure of the targeted download is final
    /// for this job; repeated attempts are a new job started by the user.
    pub async fn run(
        &self,
        url: &str,
        choice: FormatChoice,
        session_id: &str,
    ) -> Result<(PathBuf, &'static str), DownloadError> {
        if url.trim().is_empty() {
            return Err(DownloadError::InvalidInput("URL not provided".into()));
        }

        // A reused client id must not inherit a previous job's cancel flag.
        self.registry.begin(session_id);

        let job_dir = self.scratch_dir.join(job_dir_name(session_id));
        tokio::fs::create_dir_all(&job_dir)
            .await
            .map_err(|e| DownloadError::PostprocessFailed(format!("scratch dir: {}", e)))?;

        info!(session = session_id, url, "starting job");
        let path = match choice {
            FormatChoice::Thumbnail => self.fetch_thumbnail(url, session_id, &job_dir).await?,
            _ => self.fetch_media(url, choice, session_id, &job_dir).await?,
        };

        // A cancel that lands after the engine finished still wins: the
        // output is discarded rather than served.
        if self.registry.is_cancelled(session_id) {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(DownloadError::Cancelled);
        }

        if !path.is_file() {
            error!(session = session_id, path = %path.display(), "output missing");
            return Err(DownloadError::FileMissing(path.display().to_string()));
        }

        Ok((path.clone(), mime_for_path(&path)))
    }

    async fn fetch_media(
        &self,
        url: &str,
        choice: FormatChoice,
        session_id: &str,
        job_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let config = self.resolver.resolve(FetchOverrides::default());

        let progress: ProgressFn = {
            let registry = Arc::clone(&self.registry);
            let session = session_id.to_string();
            Arc::new(move |update: JobProgress| registry.set_progress(&session, update))
        };
        let cancel: CancelFn = {
            let registry = Arc::clone(&self.registry);
            let session = session_id.to_string();
            Arc::new(move || registry.is_cancelled(&session))
        };

        let request = FetchRequest {
            url: url.to_string(),
            choice,
            dest_dir: job_dir.to_path_buf(),
        };
        let path = self
            .engine
            .fetch_media(&request, &config, progress, cancel)
            .await?;

        // Audio transcoding substitutes the target extension; the engine's
        // own naming convention stands for everything else.
        match choice {
            FormatChoice::Audio(codec) => Ok(path.with_extension(codec.ext())),
            _ => Ok(path),
        }
    }

    /// Cover image branch: metadata only, then a direct image fetch using
    /// the fixed high-resolution template, falling back to the lower one
    /// when the high-resolution body is the undersized placeholder.
    async fn fetch_thumbnail(
        &self,
        url: &str,
        session_id: &str,
        job_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        self.registry.set_progress(
            session_id,
            JobProgress::downloading("[download] Fetching video cover..."),
        );

        let config = self.resolver.resolve(FetchOverrides::default());
        let meta = self.engine.fetch_metadata(url, &config).await?;
        if self.registry.is_cancelled(session_id) {
            return Err(DownloadError::Cancelled);
        }

        let high_res = format!("{}/vi/{}/maxresdefault.jpg", self.thumb_base, meta.id);
        let low_res = format!("{}/vi/{}/hqdefault.jpg", self.thumb_base, meta.id);

        let body = match self.fetch_image(&high_res).await {
            Ok(body) if body.len() >= MIN_THUMBNAIL_BYTES => body,
            _ => self.fetch_image(&low_res).await?,
        };

        let path = job_dir.join(format!("{}.jpg", sanitize_filename(&meta.title)));
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| DownloadError::PostprocessFailed(format!("writing cover: {}", e)))?;

        self.registry.set_progress(
            session_id,
            JobProgress::downloading("[download] 100% - Cover downloaded!"),
        );
        Ok(path)
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DownloadError::UpstreamFetchFailed(format!("cover fetch: {}", e)))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownloadError::UpstreamFetchFailed(format!("cover fetch: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

/// Strip path separators so an upstream-controlled title cannot escape the
/// job directory.
fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect();
    if cleaned.trim().is_empty() {
        "thumbnail".to_string()
    } else {
        cleaned
    }
}

/// Per-job scratch subdirectory, keyed by a sanitized session id.
fn job_dir_name(session_id: &str) -> String {
    let cleaned: String = session_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        "job-anonymous".to_string()
    } else {
        format!("job-{}", cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::mock::MockEngine;
    use crate::downloader::models::{AudioCodec, ProgressPhase};
    use crate::strategy::StrategyVariant;
    use axum::{routing::get, Router};
    use std::time::Duration;

    fn test_resolver() -> Arc<StrategyResolver> {
        Arc::new(StrategyResolver::new(
            StrategyVariant::AndroidClient,
            "/nonexistent/cookies.txt",
        ))
    }

    fn make_orchestrator(
        engine: MockEngine,
        scratch: &Path,
    ) -> (Arc<Orchestrator>, Arc<JobRegistry>) {
        let registry = Arc::new(JobRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(engine),
            test_resolver(),
            Arc::clone(&registry),
            scratch,
        ));
        (orchestrator, registry)
    }

    #[tokio::test]
    async fn test_empty_url_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = make_orchestrator(MockEngine::default(), dir.path());

        let err = orchestrator
            .run("  ", FormatChoice::Video, "abc")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_audio_job_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, registry) = make_orchestrator(MockEngine::default(), dir.path());

        let (path, mime) = orchestrator
            .run(
                "https://valid/video",
                FormatChoice::Audio(AudioCodec::Mp3),
                "abc",
            )
            .await
            .unwrap();

        assert_eq!(mime, "audio/mpeg");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp3"));
        assert!(path.is_file());

        // Engine callbacks landed in the registry; the last scripted update
        // is the finishing phase.
        let progress = registry.get_progress("abc").unwrap();
        assert_eq!(progress.phase, ProgressPhase::Finishing);
    }

    #[tokio::test]
    async fn test_cancel_mid_fetch_aborts_with_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine {
            script: std::iter::repeat_with(|| {
                JobProgress::downloading("[download] 1.0% of 3.00MiB ETA 01:00 at 50KiB/s")
            })
            .take(200)
            .collect(),
            step_delay_ms: 2,
            ..MockEngine::default()
        };
        let (orchestrator, registry) = make_orchestrator(engine, dir.path());

        let handle = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .run("https://valid/video", FormatChoice::Video, "abc")
                    .await
            })
        };

        // Wait for the job to produce its first callback, then cancel.
        for _ in 0..200 {
            if registry.get_progress("abc").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        registry.request_cancel("abc");

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, DownloadError::Cancelled);
        // No completed file may be reported for a cancelled job.
        assert!(std::fs::read_dir(dir.path().join("job-abc"))
            .map(|mut d| d.next().is_none())
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn test_fresh_job_ignores_stale_cancel_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, registry) = make_orchestrator(MockEngine::default(), dir.path());

        registry.request_cancel("abc");
        let result = orchestrator
            .run(
                "https://valid/video",
                FormatChoice::Audio(AudioCodec::M4a),
                "abc",
            )
            .await;
        assert!(result.is_ok());
    }

    /// Serves a tiny placeholder for the high-res template and a real-sized
    /// body for the low-res one.
    async fn spawn_thumbnail_host() -> String {
        let app = Router::new()
            .route(
                "/vi/{id}/maxresdefault.jpg",
                get(|| async { vec![0u8; 10] }),
            )
            .route(
                "/vi/{id}/hqdefault.jpg",
                get(|| async { vec![1u8; 2048] }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_thumbnail_falls_back_to_low_res() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let engine = MockEngine {
            metadata: crate::downloader::models::MediaMetadata {
                id: "vid01".to_string(),
                title: "My/Clip".to_string(),
                uploader: None,
                duration: None,
                thumbnail: None,
                webpage_url: None,
            },
            ..MockEngine::default()
        };
        let base = spawn_thumbnail_host().await;
        let orchestrator = Orchestrator::new(
            Arc::new(engine),
            test_resolver(),
            Arc::clone(&registry),
            dir.path(),
        )
        .with_thumbnail_base(base);

        let (path, mime) = orchestrator
            .run("https://valid/video", FormatChoice::Thumbnail, "abc")
            .await
            .unwrap();

        assert_eq!(mime, "image/jpeg");
        // The undersized placeholder must not be returned.
        assert!(std::fs::metadata(&path).unwrap().len() >= 1000);
        // Path separators stripped from the upstream title.
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("My_Clip.jpg")
        );
    }

    #[test]
    fn test_job_dir_name_sanitization() {
        assert_eq!(job_dir_name("abc-123"), "job-abc-123");
        assert_eq!(job_dir_name("../../etc"), "job-etc");
        assert_eq!(job_dir_name(""), "job-anonymous");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_filename("  "), "thumbnail");
    }
}

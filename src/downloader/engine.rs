// External extraction engine boundary
//
// The actual media fetch is delegated to the yt-dlp binary and treated as a
// black box: the orchestrator only observes it through the progress callback
// and can only stop it cooperatively through the cancel predicate, which is
// polled once per emitted output line.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::errors::DownloadError;
use super::models::{FlatEntry, FormatChoice, JobProgress, MediaMetadata};
use crate::strategy::FetchConfig;

/// Invoked synchronously from the engine's read loop with the latest
/// human-readable progress state.
pub type ProgressFn = Arc<dyn Fn(JobProgress) + Send + Sync>;

/// Polled at the same cadence as the progress callback; returning true makes
/// the engine kill the in-flight transfer.
pub type CancelFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// One fetch-and-convert request, scoped to its own scratch directory.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub choice: FormatChoice,
    pub dest_dir: PathBuf,
}

/// Capability boundary around the extraction engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Name of the engine (for logging)
    fn name(&self) -> &'static str;

    /// Deep extraction of a single item's metadata, no media transfer.
    async fn fetch_metadata(
        &self,
        url: &str,
        config: &FetchConfig,
    ) -> Result<MediaMetadata, DownloadError>;

    /// Shallow listing for a free-text or URL query. Per-item failures are
    /// skipped when the config tolerates them.
    async fn list(
        &self,
        query: &str,
        config: &FetchConfig,
    ) -> Result<Vec<FlatEntry>, DownloadError>;

    /// Fetch and convert media, reporting through `progress` and honoring
    /// `cancel`. Returns the path of the produced file.
    async fn fetch_media(
        &self,
        request: &FetchRequest,
        config: &FetchConfig,
        progress: ProgressFn,
        cancel: CancelFn,
    ) -> Result<PathBuf, DownloadError>;
}

/// Parse a yt-dlp `--newline` output line into a progress update, e.g.
/// `[download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32`
pub fn parse_progress(line: &str) -> Option<JobProgress> {
    lazy_static! {
        static ref PROGRESS_RE: Regex = Regex::new(
            r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\d+\.?\d*\s*\w+)\s+at\s+(\d+\.?\d*\s*\w+/s)(?:\s+ETA\s+(\S+))?"
        )
        .unwrap();
        static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
        static ref MERGE_RE: Regex = Regex::new(r"\[Merger?\]\s+Merging").unwrap();
        static ref EXTRACT_RE: Regex = Regex::new(r"\[ExtractAudio\]").unwrap();
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent = caps.get(1).map(|m| m.as_str()).unwrap_or("0");
        let size = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("?");
        let speed = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("N/A");
        let eta = caps.get(4).map(|m| m.as_str()).unwrap_or("N/A");
        return Some(JobProgress::downloading(format!(
            "[download] {}% of {} ETA {} at {}",
            percent, size, eta, speed
        )));
    }

    if let Some(caps) = DEST_RE.captures(line) {
        let filename = caps.get(1).map(|m| m.as_str()).unwrap_or("file");
        let short: String = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename)
            .chars()
            .take(60)
            .collect();
        return Some(JobProgress::downloading(format!(
            "[download] Starting: {}",
            short
        )));
    }

    if MERGE_RE.is_match(line) || EXTRACT_RE.is_match(line) {
        return Some(JobProgress::finishing(
            "[download] 100% - Processing file...",
        ));
    }

    None
}

/// Run a command to completion with a hard timeout, capturing both pipes.
pub(crate) async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DownloadError::ToolNotFound(format!("{}: {}", program, e)))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::PostprocessFailed("failed to capture stdout".into()))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::PostprocessFailed("failed to capture stderr".into()))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status_res) => {
            let status = status_res.map_err(|e| {
                DownloadError::UpstreamFetchFailed(format!("waiting for {}: {}", program, e))
            })?;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::UpstreamFetchFailed(format!(
                "{} timed out after {}s",
                program, timeout_secs
            )))
        }
    }
}

/// Production engine: drives the native yt-dlp binary.
pub struct YtDlpEngine {
    ytdlp_path: String,
}

impl YtDlpEngine {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
        }
    }

    /// Resolve the binary from `YTDLP_PATH` or common install locations.
    pub fn from_env() -> Self {
        if let Ok(path) = std::env::var("YTDLP_PATH") {
            if !path.trim().is_empty() {
                return Self::new(path.trim());
            }
        }
        Self::new(Self::find_ytdlp())
    }

    fn find_ytdlp() -> String {
        let common_paths = [
            "/opt/homebrew/bin/yt-dlp",
            "/usr/local/bin/yt-dlp",
            "/usr/bin/yt-dlp",
        ];

        for path in common_paths {
            if Path::new(path).exists() {
                return path.to_string();
            }
        }

        // Last resort: hope it's in PATH
        "yt-dlp".to_string()
    }

    /// Map the resolved FetchConfig onto engine flags. All policy is data on
    /// the config; nothing here branches on the calling code path.
    fn build_common_args(&self, config: &FetchConfig) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-update".to_string(),
            "--no-color".to_string(),
            "--socket-timeout".to_string(),
            config.socket_timeout_secs.to_string(),
            "--retries".to_string(),
            config.retries.to_string(),
            "--user-agent".to_string(),
            config.user_agent.clone(),
            "--extractor-args".to_string(),
            format!("youtube:player_client={}", config.player_clients.join(",")),
        ];

        if config.force_ipv4 {
            args.push("--force-ipv4".to_string());
        }
        if !config.check_certificates {
            args.push("--no-check-certificates".to_string());
        }
        if config.geo_bypass {
            args.push("--geo-bypass".to_string());
        }
        if config.ignore_errors {
            args.push("--ignore-errors".to_string());
        }
        if let Some(path) = &config.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        args
    }

    fn build_media_args(&self, request: &FetchRequest, config: &FetchConfig) -> Vec<String> {
        let mut args = self.build_common_args(config);

        match request.choice {
            FormatChoice::Audio(codec) => {
                args.extend([
                    "-f".to_string(),
                    "bestaudio/best".to_string(),
                    "-x".to_string(),
                    "--audio-format".to_string(),
                    codec.ext().to_string(),
                    "--audio-quality".to_string(),
                    "192K".to_string(),
                ]);
            }
            FormatChoice::Video => {
                args.extend([
                    "-f".to_string(),
                    "bv*+ba/best".to_string(),
                    "--merge-output-format".to_string(),
                    "mp4".to_string(),
                ]);
            }
            // The cover branch never reaches the engine.
            FormatChoice::Thumbnail => {}
        }

        args.extend([
            "-P".to_string(),
            request.dest_dir.to_string_lossy().to_string(),
            "-o".to_string(),
            "%(title)s.%(ext)s".to_string(),
            "--newline".to_string(),
            request.url.clone(),
        ]);

        args
    }

    /// Find the produced file inside the job's scratch directory. The engine
    /// names files itself; for audio the post-processor substitutes the
    /// target extension.
    fn locate_output(dest_dir: &Path, choice: FormatChoice) -> Result<PathBuf, DownloadError> {
        let wanted_ext = match choice {
            FormatChoice::Audio(codec) => Some(codec.ext()),
            FormatChoice::Video => Some("mp4"),
            FormatChoice::Thumbnail => None,
        };

        let mut files: Vec<PathBuf> = std::fs::read_dir(dest_dir)
            .map_err(|e| DownloadError::FileMissing(format!("{}: {}", dest_dir.display(), e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        if let Some(ext) = wanted_ext {
            if let Some(found) = files
                .iter()
                .find(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
            {
                return Ok(found.clone());
            }
        }

        // Merge/transcode may leave a single file with an unexpected
        // extension; take it rather than failing a finished transfer.
        files.sort();
        files
            .pop()
            .ok_or_else(|| DownloadError::FileMissing(dest_dir.display().to_string()))
    }
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch_metadata(
        &self,
        url: &str,
        config: &FetchConfig,
    ) -> Result<MediaMetadata, DownloadError> {
        let mut args = self.build_common_args(config);
        args.push("--dump-json".to_string());
        args.push(url.to_string());

        let wall_clock = config.socket_timeout_secs as u64 + 15;
        let output = run_output_with_timeout(&self.ytdlp_path, args, wall_clock).await?;
        if !output.status.success() {
            return Err(DownloadError::from_engine(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DownloadError::ParseError(format!("metadata JSON: {}", e)))
    }

    async fn list(
        &self,
        query: &str,
        config: &FetchConfig,
    ) -> Result<Vec<FlatEntry>, DownloadError> {
        let mut args = self.build_common_args(config);
        if config.flat {
            args.push("--flat-playlist".to_string());
        }
        args.extend([
            "--dump-json".to_string(),
            "--default-search".to_string(),
            "ytsearch20".to_string(),
            query.to_string(),
        ]);

        let wall_clock = config.socket_timeout_secs as u64 + 30;
        let output = run_output_with_timeout(&self.ytdlp_path, args, wall_clock).await?;
        if !output.status.success() && output.stdout.is_empty() {
            return Err(DownloadError::from_engine(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        // One JSON document per line; tolerant mode skips bad entries.
        let mut entries = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<FlatEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) if config.ignore_errors => {
                    debug!("skipping unparsable listing entry: {}", e);
                }
                Err(e) => {
                    return Err(DownloadError::ParseError(format!("listing JSON: {}", e)));
                }
            }
        }
        Ok(entries)
    }

    async fn fetch_media(
        &self,
        request: &FetchRequest,
        config: &FetchConfig,
        progress: ProgressFn,
        cancel: CancelFn,
    ) -> Result<PathBuf, DownloadError> {
        if cancel() {
            return Err(DownloadError::Cancelled);
        }

        let args = self.build_media_args(request, config);
        debug!("starting {}: {}", self.ytdlp_path, args.join(" "));

        let mut child = TokioCommand::new(&self.ytdlp_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::ToolNotFound(format!("{}: {}", self.ytdlp_path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::PostprocessFailed("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::PostprocessFailed("failed to capture stderr".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected.join("\n")
        });

        // Cooperative cancellation point: the transfer is opaque except for
        // this per-line loop, so the flag is checked on every callback.
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if cancel() {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(DownloadError::Cancelled);
            }
            if let Some(update) = parse_progress(&line) {
                progress(update);
            }
        }

        let status = child.wait().await.map_err(|e| {
            DownloadError::UpstreamFetchFailed(format!("waiting for {}: {}", self.ytdlp_path, e))
        })?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if cancel() {
            return Err(DownloadError::Cancelled);
        }
        if !status.success() {
            warn!("engine exited with {}: {}", status, stderr_output);
            return Err(DownloadError::from_engine(&stderr_output));
        }

        Self::locate_output(&request.dest_dir, request.choice)
    }
}

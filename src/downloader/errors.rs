// Error types for the download pipeline

use std::fmt;

/// Failure taxonomy for a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// Missing or malformed request parameter (user-correctable)
    InvalidInput(String),

    /// Extraction or network failure reported by the upstream engine
    UpstreamFetchFailed(String),

    /// User-requested abort; surfaced distinctly from generic failures
    Cancelled,

    /// The fetch nominally succeeded but post-processing went wrong
    PostprocessFailed(String),

    /// The engine reported success but no output file exists on disk
    FileMissing(String),

    /// The external engine binary could not be found or started
    ToolNotFound(String),

    /// Engine output could not be parsed
    ParseError(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Self::UpstreamFetchFailed(msg) => write!(f, "Upstream fetch failed: {}", msg),
            Self::Cancelled => write!(f, "Download cancelled."),
            Self::PostprocessFailed(msg) => write!(f, "Post-processing failed: {}", msg),
            Self::FileMissing(msg) => write!(f, "File not found after download: {}", msg),
            Self::ToolNotFound(tool) => write!(f, "Tool not found: {}", tool),
            Self::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    /// Classify raw engine stderr into an upstream failure, enriched with a
    /// blocking diagnosis when one is recognizable.
    pub fn from_engine(stderr: &str) -> Self {
        let mut tail: Vec<&str> = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .rev()
            .take(3)
            .collect();
        tail.reverse();
        let summary = tail.join(" | ");

        match diagnose_block(stderr) {
            Some(reason) => {
                Self::UpstreamFetchFailed(format!("{} ({})", reason.description(), summary))
            }
            None => Self::UpstreamFetchFailed(summary),
        }
    }
}

/// Why the upstream source rejected a request.
///
/// The upstream actively varies its anti-automation defenses; this list
/// covers the signatures seen in practice and nothing speculative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// HTTP 403 - general access denied
    Forbidden,
    /// Automated-access detection triggered
    BotDetection,
    /// 429 or similar throttling
    RateLimited,
    /// Geographic restriction
    GeoBlocked,
    /// Login wall for age-gated content
    AgeRestricted,
    /// Socket timeout (often a soft IP block)
    NetworkTimeout,
    /// Item deleted, private, or otherwise gone
    Unavailable,
}

impl BlockReason {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Forbidden => "Access denied (HTTP 403)",
            Self::BotDetection => "Automated access detected by upstream",
            Self::RateLimited => "Rate limited by upstream",
            Self::GeoBlocked => "Blocked in this region",
            Self::AgeRestricted => "Age-restricted content, sign-in required",
            Self::NetworkTimeout => "Network timeout (possible throttling)",
            Self::Unavailable => "Media unavailable",
        }
    }
}

/// Map raw engine stderr to a blocking reason. Order matters: the most
/// specific signatures are checked first.
pub fn diagnose_block(stderr: &str) -> Option<BlockReason> {
    let lower = stderr.to_lowercase();

    if lower.contains("confirm your age") || lower.contains("age-restricted") {
        return Some(BlockReason::AgeRestricted);
    }
    if lower.contains("available in your country") || lower.contains("geo restricted") {
        return Some(BlockReason::GeoBlocked);
    }
    if lower.contains("sign in to confirm") || lower.contains("not a bot") {
        return Some(BlockReason::BotDetection);
    }
    if lower.contains("429") || lower.contains("too many requests") {
        return Some(BlockReason::RateLimited);
    }
    if lower.contains("403") || lower.contains("forbidden") {
        return Some(BlockReason::Forbidden);
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return Some(BlockReason::NetworkTimeout);
    }
    if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("has been removed")
    {
        return Some(BlockReason::Unavailable);
    }

    None
}

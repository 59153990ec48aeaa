// Strategy resolution: network, impersonation and credential policy
//
// Upstream sites rotate their anti-automation defenses over time, so all of
// the bypass policy lives behind one resolve() call. Callers only ever see a
// FetchConfig; they never encode client identities or cookie handling
// themselves.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;

/// One concrete bundle of network/identity/credential policy choices.
/// The active variant is picked once at process start, not per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyVariant {
    /// Impersonate the mobile app client (least bot protection upstream)
    #[default]
    AndroidClient,
    /// Impersonate a desktop browser, pairing with imported session cookies
    DesktopBrowser,
    /// Impersonate a TV device class
    TvEmbedded,
}

impl FromStr for StrategyVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "android" => Ok(Self::AndroidClient),
            "desktop" => Ok(Self::DesktopBrowser),
            "tv" => Ok(Self::TvEmbedded),
            other => Err(format!("unknown strategy variant: {}", other)),
        }
    }
}

impl StrategyVariant {
    fn player_clients(&self) -> &'static [&'static str] {
        match self {
            Self::AndroidClient => &["android", "web_embedded"],
            Self::DesktopBrowser => &["web", "web_safari"],
            Self::TvEmbedded => &["tv", "web_embedded"],
        }
    }

    fn user_agent(&self) -> &'static str {
        match self {
            Self::AndroidClient => {
                "com.google.android.youtube/19.05.36 (Linux; U; Android 11; en_US; Pixel 5 Build/RD2A.211001.002) gzip"
            }
            Self::DesktopBrowser => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36"
            }
            Self::TvEmbedded => {
                "Mozilla/5.0 (SMART-TV; Linux; Tizen 5.0) AppleWebKit/538.1 (KHTML, like Gecko) Version/5.0 TV Safari/538.1"
            }
        }
    }
}

/// Fully-specified fetch configuration handed to the engine.
///
/// Immutable per call: built fresh by the resolver and only merged with
/// caller-supplied overrides at construction time.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Pin egress to IPv4; IPv6 ranges are frequently throttled upstream
    pub force_ipv4: bool,
    /// Impersonation clients tried by the engine, in order
    pub player_clients: Vec<String>,
    /// Request user agent matching the impersonated device class
    pub user_agent: String,
    /// Credential artifact, present only when the file exists on disk
    pub cookies_path: Option<PathBuf>,
    /// Upstream certificate validation
    pub check_certificates: bool,
    /// Work around geographic restrictions
    pub geo_bypass: bool,
    /// Continue past individual item failures instead of aborting
    pub ignore_errors: bool,
    /// Shallow listing mode: summary metadata without per-item resolution
    pub flat: bool,
    pub socket_timeout_secs: u32,
    pub retries: u32,
}

/// Caller-supplied overrides merged into the resolved config.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOverrides {
    pub flat: Option<bool>,
    pub ignore_errors: Option<bool>,
    pub socket_timeout_secs: Option<u32>,
}

impl FetchOverrides {
    pub fn flat_listing() -> Self {
        Self {
            flat: Some(true),
            ignore_errors: Some(true),
            socket_timeout_secs: None,
        }
    }
}

/// Resolves a fully-specified `FetchConfig` from the active strategy variant
/// and the presence of the locally stored credential file.
///
/// Deterministic given its inputs and that file's existence; a missing
/// credential file means the unauthenticated profile, never an error.
pub struct StrategyResolver {
    variant: StrategyVariant,
    cookies_path: PathBuf,
}

impl StrategyResolver {
    pub fn new(variant: StrategyVariant, cookies_path: impl Into<PathBuf>) -> Self {
        Self {
            variant,
            cookies_path: cookies_path.into(),
        }
    }

    pub fn variant(&self) -> StrategyVariant {
        self.variant
    }

    pub fn resolve(&self, overrides: FetchOverrides) -> FetchConfig {
        let cookies_path = if self.cookies_path.is_file() {
            info!(
                "{}",
                log_safe(&format!(
                    "Applying cookies from {}",
                    self.cookies_path.display()
                ))
            );
            Some(self.cookies_path.clone())
        } else {
            None
        };

        FetchConfig {
            force_ipv4: true,
            player_clients: self
                .variant
                .player_clients()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            user_agent: self.variant.user_agent().to_string(),
            cookies_path,
            check_certificates: false,
            geo_bypass: true,
            ignore_errors: overrides.ignore_errors.unwrap_or(false),
            flat: overrides.flat.unwrap_or(false),
            socket_timeout_secs: overrides.socket_timeout_secs.unwrap_or(30),
            retries: 2,
        }
    }
}

const SENSITIVE_MARKERS: [&str; 4] = ["SID", "HSID", "SSID", "cookies"];
const REDACTED_PLACEHOLDER: &str = "[auth] filtered sensitive diagnostic info";

/// Replace log lines carrying session-token markers with a fixed
/// placeholder. Lines mentioning "download" are legitimate progress text and
/// pass through untouched.
pub fn log_safe(message: &str) -> String {
    let is_progress = message.to_lowercase().contains("download");
    if !is_progress && SENSITIVE_MARKERS.iter().any(|m| message.contains(m)) {
        REDACTED_PLACEHOLDER.to_string()
    } else {
        message.to_string()
    }
}

/// A config is self-consistent when every policy field needed by the engine
/// is populated and the client list matches the impersonated device class.
#[cfg(test)]
fn assert_valid_config(config: &FetchConfig) {
    assert!(!config.player_clients.is_empty());
    assert!(!config.user_agent.is_empty());
    assert!(config.force_ipv4);
    assert!(config.geo_bypass);
    assert!(config.socket_timeout_secs > 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_android_variant_produces_valid_config() {
        let resolver = StrategyResolver::new(
            StrategyVariant::AndroidClient,
            "/nonexistent/cookies.txt",
        );
        let config = resolver.resolve(FetchOverrides::default());
        assert_valid_config(&config);
        assert_eq!(config.player_clients[0], "android");
        assert!(config.user_agent.contains("Android"));
        assert!(config.cookies_path.is_none());
    }

    #[test]
    fn test_desktop_variant_produces_valid_config() {
        let resolver = StrategyResolver::new(
            StrategyVariant::DesktopBrowser,
            "/nonexistent/cookies.txt",
        );
        let config = resolver.resolve(FetchOverrides::default());
        assert_valid_config(&config);
        assert_eq!(config.player_clients[0], "web");
        assert!(config.user_agent.contains("Mozilla"));
    }

    #[test]
    fn test_tv_variant_produces_valid_config() {
        let resolver =
            StrategyResolver::new(StrategyVariant::TvEmbedded, "/nonexistent/cookies.txt");
        let config = resolver.resolve(FetchOverrides::default());
        assert_valid_config(&config);
        assert_eq!(config.player_clients[0], "tv");
    }

    #[test]
    fn test_missing_credential_file_is_not_an_error() {
        let resolver = StrategyResolver::new(
            StrategyVariant::AndroidClient,
            "/definitely/not/here/cookies.txt",
        );
        let config = resolver.resolve(FetchOverrides::default());
        assert!(config.cookies_path.is_none());
    }

    #[test]
    fn test_present_credential_file_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# Netscape HTTP Cookie File").unwrap();

        let resolver = StrategyResolver::new(StrategyVariant::DesktopBrowser, &path);
        let config = resolver.resolve(FetchOverrides::default());
        assert_eq!(config.cookies_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_overrides_are_merged() {
        let resolver =
            StrategyResolver::new(StrategyVariant::AndroidClient, "/nonexistent/cookies.txt");
        let config = resolver.resolve(FetchOverrides::flat_listing());
        assert!(config.flat);
        assert!(config.ignore_errors);

        let config = resolver.resolve(FetchOverrides {
            socket_timeout_secs: Some(15),
            ..Default::default()
        });
        assert_eq!(config.socket_timeout_secs, 15);
        assert!(!config.flat);
    }

    #[test]
    fn test_log_safe_filters_session_tokens() {
        assert_eq!(
            log_safe("rejected header SID=abc123"),
            REDACTED_PLACEHOLDER
        );
        assert_eq!(log_safe("Applying cookies from /x"), REDACTED_PLACEHOLDER);
    }

    #[test]
    fn test_log_safe_keeps_progress_lines() {
        let line = "[download] 42.0% of 10MiB (SID marker inside)";
        assert_eq!(log_safe(line), line);
        let plain = "[download] 42.0% of 10MiB";
        assert_eq!(log_safe(plain), plain);
    }
}

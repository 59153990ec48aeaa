// Search and trending catalog over the engine's flat extraction mode
//
// Listing goes through shallow extraction for speed, so entries may be
// missing a thumbnail or canonical URL; those are synthesized from the item
// id with fixed templates rather than treated as missing data.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::downloader::engine::MediaEngine;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{FlatEntry, MediaSummary};
use crate::strategy::{FetchOverrides, StrategyResolver};

const TRENDING_TTL: Duration = Duration::from_secs(3600);

// There is no real trending feed here; a generic query stands in for one.
// Fixed on purpose: no per-caller regions or categories.
const TRENDING_QUERY: &str = "trending music gaming";

struct TrendingSlot {
    results: Vec<MediaSummary>,
    fetched_at: Instant,
}

pub struct Catalog {
    engine: Arc<dyn MediaEngine>,
    resolver: Arc<StrategyResolver>,
    trending: Mutex<Option<TrendingSlot>>,
    trending_ttl: Duration,
}

impl Catalog {
    pub fn new(engine: Arc<dyn MediaEngine>, resolver: Arc<StrategyResolver>) -> Self {
        Self {
            engine,
            resolver,
            trending: Mutex::new(None),
            trending_ttl: TRENDING_TTL,
        }
    }

    pub fn with_trending_ttl(mut self, ttl: Duration) -> Self {
        self.trending_ttl = ttl;
        self
    }

    /// Free-text or URL search in tolerant flat mode.
    pub async fn search(&self, query: &str) -> Result<Vec<MediaSummary>, DownloadError> {
        let config = self.resolver.resolve(FetchOverrides::flat_listing());
        let entries = self.engine.list(query, &config).await?;
        Ok(summarize(entries))
    }

    /// Cached heuristic trending set. Served as-is while younger than the
    /// TTL; one recomputation replaces the slot afterwards.
    pub async fn trending(&self) -> Result<Vec<MediaSummary>, DownloadError> {
        if let Some(slot) = self.trending.lock().as_ref() {
            if slot.fetched_at.elapsed() < self.trending_ttl {
                return Ok(slot.results.clone());
            }
        }

        debug!("trending cache stale, recomputing");
        let results = self.search(TRENDING_QUERY).await?;
        *self.trending.lock() = Some(TrendingSlot {
            results: results.clone(),
            fetched_at: Instant::now(),
        });
        Ok(results)
    }
}

/// Normalize flat entries, deriving thumbnail and playable URL from the id
/// when shallow extraction left them out. Entries without any usable URL
/// are dropped.
fn summarize(entries: Vec<FlatEntry>) -> Vec<MediaSummary> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry.id.unwrap_or_default();

            let thumbnail = entry.thumbnail.filter(|t| !t.is_empty()).or_else(|| {
                (!id.is_empty()).then(|| format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id))
            })?;
            let url = entry
                .url
                .or(entry.webpage_url)
                .filter(|u| !u.is_empty())
                .or_else(|| {
                    (!id.is_empty()).then(|| format!("https://www.youtube.com/watch?v={}", id))
                })?;

            Some(MediaSummary {
                id,
                title: entry.title.unwrap_or_default(),
                thumbnail,
                url,
                duration: entry.duration,
                uploader: entry.uploader,
                view_count: entry.view_count,
            })
        })
        .collect()
}

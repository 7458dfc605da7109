//! Memory-bounded cache of engine result pages.
//!
//! Two pools are tracked independently: chunk pages (raw signal windows) and
//! overview pages (downsampled whole-file views). Each pool is capped by an
//! entry count; sweeps evict the least recently updated pages first.

use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{CacheStats, ChunkRequest, OverviewRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePool {
    Chunk,
    Overview,
}

impl CachePool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::Overview => "overview",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub pool: CachePool,
    pub file_path: String,
    pub selector: String,
    pub preprocessing: String,
}

impl CacheKey {
    pub fn chunk(
        file_path: impl Into<String>,
        start_sample: u64,
        sample_count: u64,
        channels: &[String],
        preprocessing: &Value,
    ) -> Self {
        Self {
            pool: CachePool::Chunk,
            file_path: file_path.into(),
            selector: format!("{start_sample}+{sample_count}:{}", channels.join(",")),
            preprocessing: preprocessing.to_string(),
        }
    }

    pub fn overview(file_path: impl Into<String>, channels: &[String], max_points: usize) -> Self {
        Self {
            pool: CachePool::Overview,
            file_path: file_path.into(),
            selector: format!("{max_points}:{}", channels.join(",")),
            preprocessing: String::new(),
        }
    }
}

impl From<&ChunkRequest> for CacheKey {
    fn from(request: &ChunkRequest) -> Self {
        Self::chunk(
            request.file_path.as_str(),
            request.start_sample,
            request.sample_count,
            &request.channels,
            &request.preprocessing,
        )
    }
}

impl From<&OverviewRequest> for CacheKey {
    fn from(request: &OverviewRequest) -> Self {
        Self::overview(request.file_path.as_str(), &request.channels, request.max_points)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` while the page is still loading.
    data: Option<Value>,
    last_updated: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPriority {
    Normal,
    /// One-shot shrink applied when the application is hidden.
    Backgrounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub chunk: usize,
    pub overview: usize,
    pub background_divisor: usize,
}

impl CacheLimits {
    pub fn limit_for(&self, pool: CachePool, priority: SweepPriority) -> usize {
        let base = match pool {
            CachePool::Chunk => self.chunk,
            CachePool::Overview => self.overview,
        };
        match priority {
            SweepPriority::Normal => base,
            SweepPriority::Backgrounded => base / self.background_divisor.max(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entries.get(key).and_then(|entry| entry.data.clone())
    }

    pub fn insert(&mut self, key: CacheKey, value: Value, now: Instant) {
        self.entries.insert(
            key,
            CacheEntry {
                data: Some(value),
                last_updated: now,
            },
        );
    }

    /// Records a page as loading. Returns `false` if the key is already present.
    pub fn mark_loading(&mut self, key: CacheKey, now: Instant) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            CacheEntry {
                data: None,
                last_updated: now,
            },
        );
        true
    }

    /// Drops a loading marker; pages that already have data are left alone.
    pub fn clear_loading(&mut self, key: &CacheKey) {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.data.is_none())
        {
            self.entries.remove(key);
        }
    }

    pub fn invalidate_file(&mut self, file_path: &str) -> usize {
        self.remove_where(|key, _| key.file_path == file_path)
    }

    pub fn invalidate_pool(&mut self, pool: CachePool) -> usize {
        self.remove_where(|key, _| key.pool == pool)
    }

    pub fn clear_all(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Normal expiry: drops pages not refreshed within `max_age`, and loading
    /// markers whose fetch never reported back within the same window.
    pub fn expire_stale(&mut self, max_age: Duration, now: Instant) -> usize {
        self.remove_where(|_, entry| now.saturating_duration_since(entry.last_updated) >= max_age)
    }

    /// Evicts the least recently updated data-bearing pages of `pool` until at
    /// most `limit` remain. Returns the number of evicted pages.
    ///
    /// Victims are chosen by repeated minimum selection, O(k·n) for k evictions
    /// over n pages. This assumes k stays small next to n, which holds while
    /// sweeps run often enough against a capped pool; it is not meant for
    /// shrinking an arbitrarily large pool in one pass.
    pub fn sweep(&mut self, pool: CachePool, limit: usize) -> usize {
        let mut candidates: Vec<(&CacheKey, Instant)> = self
            .entries
            .iter()
            .filter(|(key, entry)| key.pool == pool && entry.data.is_some())
            .map(|(key, entry)| (key, entry.last_updated))
            .collect();

        if candidates.len() <= limit {
            return 0;
        }

        let evict_count = candidates.len() - limit;
        let mut victims: Vec<CacheKey> = Vec::with_capacity(evict_count);
        for _ in 0..evict_count {
            let mut oldest: Option<usize> = None;
            for (idx, (_, updated)) in candidates.iter().enumerate() {
                let is_older = match oldest {
                    Some(current) => *updated < candidates[current].1,
                    None => true,
                };
                if is_older {
                    oldest = Some(idx);
                }
            }
            let Some(idx) = oldest else {
                break;
            };
            let (key, _) = candidates.swap_remove(idx);
            victims.push(key.clone());
        }
        drop(candidates);

        for key in &victims {
            self.entries.remove(key);
        }

        info!(
            pool = pool.as_str(),
            evicted = victims.len(),
            limit,
            "Evicted cached result pages"
        );
        victims.len()
    }

    pub fn enforce_limits(&mut self, limits: &CacheLimits, priority: SweepPriority) -> usize {
        [CachePool::Chunk, CachePool::Overview]
            .into_iter()
            .map(|pool| self.sweep(pool, limits.limit_for(pool, priority)))
            .sum()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for (key, entry) in &self.entries {
            match (key.pool, entry.data.is_some()) {
                (CachePool::Chunk, true) => stats.chunk_entries += 1,
                (CachePool::Chunk, false) => stats.chunk_loading += 1,
                (CachePool::Overview, true) => stats.overview_entries += 1,
                (CachePool::Overview, false) => stats.overview_loading += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_where(&mut self, predicate: impl Fn(&CacheKey, &CacheEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| !predicate(key, entry));
        before - self.entries.len()
    }

    #[cfg(test)]
    fn last_updated(&self, key: &CacheKey) -> Option<Instant> {
        self.entries.get(key).map(|entry| entry.last_updated)
    }
}

/// Process-wide handle to the result cache and its limits.
#[derive(Debug, Clone)]
pub struct PageCache {
    inner: Arc<Mutex<ResultCache>>,
    limits: CacheLimits,
    entry_ttl: Duration,
}

impl PageCache {
    pub fn new(limits: CacheLimits, entry_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ResultCache::new())),
            limits,
            entry_ttl,
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        self.inner.lock().await.get(key)
    }

    pub async fn insert(&self, key: CacheKey, value: Value) {
        self.inner.lock().await.insert(key, value, Instant::now());
    }

    /// Returns the cached page or runs `fetch` and caches its output.
    ///
    /// A loading marker sits in the pool while the fetch runs; it never counts
    /// toward the limit. The call that placed the marker removes it again if
    /// the fetch fails or the returned future is dropped before finishing.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: CacheKey, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let placed_marker = {
            let mut cache = self.inner.lock().await;
            if let Some(value) = cache.get(&key) {
                debug!(file_path = %key.file_path, pool = key.pool.as_str(), "Result page cache hit");
                return Ok(value);
            }
            cache.mark_loading(key.clone(), Instant::now())
        };
        let mut marker = LoadingMarker {
            cache: &self.inner,
            key: placed_marker.then(|| key.clone()),
        };

        let fetched = fetch().await;
        let mut cache = self.inner.lock().await;
        let owned = marker.disarm();
        match fetched {
            Ok(value) => {
                cache.insert(key, value.clone(), Instant::now());
                Ok(value)
            }
            Err(err) => {
                if let Some(key) = owned {
                    cache.clear_loading(&key);
                }
                Err(err)
            }
        }
    }

    pub async fn invalidate_file(&self, file_path: &str) -> usize {
        let removed = self.inner.lock().await.invalidate_file(file_path);
        info!(file_path = %file_path, removed, "Invalidated cached pages for file");
        removed
    }

    pub async fn invalidate_all_chunks(&self) -> usize {
        self.inner.lock().await.invalidate_pool(CachePool::Chunk)
    }

    pub async fn invalidate_all_overviews(&self) -> usize {
        self.inner.lock().await.invalidate_pool(CachePool::Overview)
    }

    pub async fn clear_all(&self) -> usize {
        self.inner.lock().await.clear_all()
    }

    /// Expires stale pages, then sweeps both pools at `priority`.
    pub async fn enforce_limits(&self, priority: SweepPriority) -> usize {
        let mut cache = self.inner.lock().await;
        let expired = cache.expire_stale(self.entry_ttl, Instant::now());
        if expired > 0 {
            debug!(expired, "Expired stale result pages");
        }
        cache.enforce_limits(&self.limits, priority)
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats()
    }
}

/// Removes a loading marker when the fetch that placed it is abandoned.
///
/// Drop cannot wait for the lock, so a contended cleanup is left to
/// `expire_stale`.
struct LoadingMarker<'a> {
    cache: &'a Mutex<ResultCache>,
    key: Option<CacheKey>,
}

impl LoadingMarker<'_> {
    fn disarm(&mut self) -> Option<CacheKey> {
        self.key.take()
    }
}

impl Drop for LoadingMarker<'_> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Ok(mut cache) = self.cache.try_lock() {
            cache.clear_loading(&key);
            debug!(file_path = %key.file_path, pool = key.pool.as_str(), "Dropped abandoned loading marker");
        }
    }
}

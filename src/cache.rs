//! The fetch cache.
//!
//! Many chains submitted for fixing share the same intermediates, so the
//! same issuer URLs turn up again and again. The [`UrlCache`] makes sure
//! each of them is fetched only once, even if many workers ask for it at
//! the same time.
//!
//! Every URL gets its own entry with its own lock. The first worker to
//! take the lock of a fresh entry performs the fetch while holding it.
//! Everyone else asking for the same URL in the meantime blocks on that
//! lock and then finds the result. Successful results are kept forever;
//! issuer certificates don’t change. Failures are handed to those already
//! waiting but only kept for later callers if a failure TTL has been
//! configured, so a temporary network problem doesn’t poison a URL.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use bytes::Bytes;
use log::debug;
use crate::fetch::{Fetch, FetchError};
use crate::utils::sync::Mutex;


//------------ UrlCache ------------------------------------------------------

/// A single-flight cache of fetched resources keyed by URL.
pub struct UrlCache {
    /// The actual fetcher.
    fetcher: Arc<dyn Fetch>,

    /// The entries.
    entries: Mutex<HashMap<String, Arc<Mutex<Entry>>>>,

    /// How long to keep failures around for later callers.
    failure_ttl: Duration,

    /// The metrics of the cache.
    metrics: CacheMetrics,
}

/// The state of a single URL.
#[derive(Debug, Default)]
enum Entry {
    /// Nothing has been fetched yet or the last failure has expired.
    #[default]
    Empty,

    /// The resource has been fetched successfully.
    Fetched(Bytes),

    /// The last fetch failed at the given time.
    Failed(Instant, FetchError),
}

impl UrlCache {
    /// Creates a new cache atop the given fetcher.
    ///
    /// Failures will be served to later callers for `failure_ttl`. If this
    /// is zero, only callers that were waiting for the failed fetch to
    /// finish will see the failure.
    pub fn new(fetcher: Arc<dyn Fetch>, failure_ttl: Duration) -> Self {
        UrlCache {
            fetcher,
            entries: Default::default(),
            failure_ttl,
            metrics: Default::default(),
        }
    }

    /// Returns the content behind the URL.
    ///
    /// Performs a fetch unless the content is already available.
    pub fn get(&self, url: &str) -> Result<Fetched, FetchError> {
        let arrived = Instant::now();
        let entry = self.entries.lock().entry(
            url.into()
        ).or_default().clone();

        // Holding the entry lock during the fetch is the whole point.
        let mut entry = entry.lock();
        match *entry {
            Entry::Fetched(ref data) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Fetched { data: data.clone(), cached: true })
            }
            Entry::Failed(when, ref err) => {
                if when >= arrived || when.elapsed() < self.failure_ttl {
                    debug!("{}: reusing failure: {}", url, err);
                    return Err(err.clone())
                }
            }
            Entry::Empty => { }
        }

        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        match self.fetcher.fetch(url) {
            Ok(data) => {
                *entry = Entry::Fetched(data.clone());
                Ok(Fetched { data, cached: false })
            }
            Err(err) => {
                debug!("{}: fetch failed: {}", url, err);
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                *entry = Entry::Failed(Instant::now(), err.clone());
                Err(err)
            }
        }
    }

    /// Returns the number of URLs with successfully fetched content.
    pub fn len(&self) -> usize {
        let entries: Vec<_> = self.entries.lock().values().cloned().collect();
        entries.iter().filter(|entry| {
            matches!(*entry.lock(), Entry::Fetched(_))
        }).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}


//------------ Fetched -------------------------------------------------------

/// The content of a URL.
#[derive(Clone, Debug)]
pub struct Fetched {
    /// The data behind the URL.
    pub data: Bytes,

    /// Was the data already available without fetching?
    pub cached: bool,
}


//------------ CacheMetrics --------------------------------------------------

/// The metrics of a URL cache.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// The number of requests answered from the cache.
    hits: AtomicU64,

    /// The number of requests that resulted in a fetch.
    misses: AtomicU64,

    /// The number of fetches that failed.
    failures: AtomicU64,
}

impl CacheMetrics {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}


//============ Tests =========================================================

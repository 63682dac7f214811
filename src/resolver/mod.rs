//! Media reference resolution with a process-wide URL cache.
//!
//! Opaque storage keys are exchanged for URLs through a [`Presigner`]. Successful
//! exchanges are cached for the lifetime of the resolver; failures are not, so a later
//! request retries. At most one exchange per key is outstanding at any time: callers that
//! arrive while one is running attach to it instead of issuing their own.
//!
//! Nothing here returns an error to the caller. A reference that cannot be resolved
//! yields an empty string, which rendering code treats as "media unavailable".
//!
//! Resolution spawns onto the ambient tokio runtime, so every async entry point and
//! [`MediaResolver::prefetch`] must run inside one.

mod subscription;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::{CachedUrl, UrlCache};
use crate::media::MediaRef;
use crate::presign::Presigner;

pub use subscription::{BatchSubscription, UrlSubscription};

type PendingUrl = Shared<BoxFuture<'static, String>>;

pub type FailureObserver = Arc<dyn Fn(&ResolveFailure) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The exchange itself failed (network, status, body).
    Backend(String),
    /// The backend answered without a usable URL.
    EmptyUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveFailure {
    pub key: String,
    pub reason: FailureReason,
}

impl fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            FailureReason::Backend(message) => write!(f, "'{}': {}", self.key, message),
            FailureReason::EmptyUrl => write!(f, "'{}': no download URL returned", self.key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStats {
    pub cached: usize,
    pub in_flight: usize,
    pub backend_calls: u64,
    pub failures: u64,
}

struct Inner {
    presigner: Arc<dyn Presigner>,
    cache: UrlCache,
    in_flight: Mutex<HashMap<String, PendingUrl>>,
    failure_observer: Option<FailureObserver>,
    batch_concurrency: usize,
    backend_calls: AtomicU64,
    failures: AtomicU64,
}

impl Inner {
    async fn fetch(self: Arc<Self>, key: String) -> String {
        let _in_flight = InFlightGuard {
            inner: Arc::clone(&self),
            key: key.clone(),
        };

        self.backend_calls.fetch_add(1, Ordering::Relaxed);

        match self.presigner.presign(&key).await {
            Ok(Some(url)) if !url.is_empty() => {
                debug!("Resolved media key '{}'", key);
                self.cache.store_url(&key, url.clone());
                url
            }
            Ok(_) => {
                self.report(ResolveFailure {
                    key,
                    reason: FailureReason::EmptyUrl,
                });
                String::new()
            }
            Err(err) => {
                self.report(ResolveFailure {
                    key,
                    reason: FailureReason::Backend(err.to_string()),
                });
                String::new()
            }
        }
    }

    fn report(&self, failure: ResolveFailure) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        warn!("Media resolution failed for {}", failure);
        if let Some(observer) = &self.failure_observer {
            observer(&failure);
        }
    }
}

// Clears the in-flight slot once the exchange finishes, panics and cancellation included.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.key);
    }
}

pub struct MediaResolverBuilder {
    presigner: Arc<dyn Presigner>,
    cache: UrlCache,
    failure_observer: Option<FailureObserver>,
    batch_concurrency: usize,
}

impl MediaResolverBuilder {
    pub fn cache(mut self, cache: UrlCache) -> Self {
        self.cache = cache;
        self
    }

    /// Upper bound on exchanges a single batch runs at once. 1 resolves sequentially.
    pub fn batch_concurrency(mut self, limit: usize) -> Self {
        self.batch_concurrency = limit.max(1);
        self
    }

    pub fn failure_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ResolveFailure) + Send + Sync + 'static,
    {
        self.failure_observer = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> MediaResolver {
        MediaResolver {
            inner: Arc::new(Inner {
                presigner: self.presigner,
                cache: self.cache,
                in_flight: Mutex::new(HashMap::new()),
                failure_observer: self.failure_observer,
                batch_concurrency: self.batch_concurrency,
                backend_calls: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }
}

/// Shared handle to one resolver; clones see the same cache and in-flight table.
#[derive(Clone)]
pub struct MediaResolver {
    inner: Arc<Inner>,
}

impl MediaResolver {
    pub fn new(presigner: Arc<dyn Presigner>) -> Self {
        Self::builder(presigner).build()
    }

    pub fn builder(presigner: Arc<dyn Presigner>) -> MediaResolverBuilder {
        MediaResolverBuilder {
            presigner,
            cache: UrlCache::new(),
            failure_observer: None,
            batch_concurrency: 1,
        }
    }

    /// Resolves a reference to a usable URL, or `""` when it is absent or unavailable.
    pub async fn resolve(&self, value: Option<&str>) -> String {
        let key = match MediaRef::classify(value) {
            MediaRef::Empty => return String::new(),
            MediaRef::Absolute(url) => return url,
            MediaRef::Opaque(key) => key,
        };

        if let Some(url) = self.inner.cache.get_url(key) {
            return url;
        }

        self.pending(key).await
    }

    /// Like [`resolve`](Self::resolve) but never waits and never calls the backend.
    pub fn resolve_cached(&self, value: Option<&str>) -> String {
        match MediaRef::classify(value) {
            MediaRef::Empty => String::new(),
            MediaRef::Absolute(url) => url,
            MediaRef::Opaque(key) => self.inner.cache.get_url(key).unwrap_or_default(),
        }
    }

    /// Cache entry behind an opaque key, if one was resolved. Absolute and empty
    /// references never have one.
    pub fn cache_entry(&self, value: Option<&str>) -> Option<CachedUrl> {
        match MediaRef::classify(value) {
            MediaRef::Opaque(key) => self.inner.cache.get(key),
            _ => None,
        }
    }

    /// Resolves the unique references of `refs` and returns the non-empty results in
    /// completion order.
    pub async fn resolve_batch<S: AsRef<str>>(&self, refs: &[S]) -> Vec<String> {
        self.resolve_unique_while(unique_refs(refs), || true)
            .await
            .unwrap_or_default()
    }

    /// Starts resolution of every unresolved key without waiting for it.
    /// Returns how many exchanges were started or joined.
    pub fn prefetch<S: AsRef<str>>(&self, refs: &[S]) -> usize {
        let mut queued = 0;
        for value in unique_refs(refs) {
            if let MediaRef::Opaque(key) = MediaRef::classify(Some(value.as_str())) {
                if self.inner.cache.get_url(key).is_none() {
                    // The exchange runs in its own task, the handle is not needed.
                    drop(self.pending(key));
                    queued += 1;
                }
            }
        }
        debug!("Prefetching {} media keys", queued);
        queued
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            cached: self.inner.cache.len(),
            in_flight: self.inner.in_flight.lock().len(),
            backend_calls: self.inner.backend_calls.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }

    pub fn subscribe<F>(&self, value: Option<&str>, on_change: F) -> UrlSubscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        UrlSubscription::start(self.clone(), value, Box::new(on_change))
    }

    pub fn subscribe_batch<S, F>(&self, refs: &[S], on_change: F) -> BatchSubscription
    where
        S: AsRef<str>,
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        BatchSubscription::start(self.clone(), refs, Box::new(on_change))
    }

    // Joins the running exchange for `key` or starts one. Lookup and insertion happen
    // under one lock, so two callers can never both start an exchange for the same key.
    fn pending(&self, key: &str) -> PendingUrl {
        let mut in_flight = self.inner.in_flight.lock();

        if let Some(pending) = in_flight.get(key) {
            debug!("Joining in-flight resolution for '{}'", key);
            return pending.clone();
        }

        // An exchange may have completed since the caller's cache lookup.
        if let Some(url) = self.inner.cache.get_url(key) {
            return future::ready(url).boxed().shared();
        }

        let handle = tokio::spawn(Arc::clone(&self.inner).fetch(key.to_string()));
        let pending = async move { handle.await.unwrap_or_default() }
            .boxed()
            .shared();

        in_flight.insert(key.to_string(), pending.clone());
        pending
    }

    // Resolves `unique` in order with at most `batch_concurrency` exchanges running.
    // Stops starting new ones once `still_relevant` turns false and then returns `None`.
    pub(crate) async fn resolve_unique_while<F>(
        &self,
        unique: Vec<String>,
        still_relevant: F,
    ) -> Option<Vec<String>>
    where
        F: Fn() -> bool,
    {
        let resolved: Vec<String> = stream::iter(unique)
            .take_while(|_| future::ready(still_relevant()))
            .map(|value| {
                let resolver = self.clone();
                async move { resolver.resolve(Some(value.as_str())).await }
            })
            .buffer_unordered(self.inner.batch_concurrency)
            .filter(|url| future::ready(!url.is_empty()))
            .collect()
            .await;

        if still_relevant() {
            Some(resolved)
        } else {
            None
        }
    }
}

/// Non-empty references in order of first occurrence.
pub fn unique_refs<S: AsRef<str>>(refs: &[S]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(refs.len());
    for value in refs.iter().map(AsRef::as_ref) {
        if !value.is_empty() && !unique.iter().any(|seen| seen == value) {
            unique.push(value.to_string());
        }
    }
    unique
}

/// Identity of a batch: its unique references joined in order.
pub fn batch_key<S: AsRef<str>>(refs: &[S]) -> String {
    unique_refs(refs).join("|")
}

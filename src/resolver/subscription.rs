use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;

use super::{unique_refs, MediaResolver};

type UrlListener = Box<dyn Fn(&str) + Send + Sync>;
type UrlListListener = Box<dyn Fn(&[String]) + Send + Sync>;

// Every restart bumps `generation`; a completion only lands if its generation is
// still current and the subscription is open. Listeners run under `listeners`, which
// `close` also takes, so no listener runs once `close` has returned. Reentrant so a
// listener may drop its own subscription.
struct Relevance {
    generation: AtomicU64,
    closed: AtomicBool,
    listeners: ReentrantMutex<()>,
}

impl Relevance {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            listeners: ReentrantMutex::new(()),
        }
    }

    fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    fn close(&self) {
        let _listeners = self.listeners.lock();
        self.closed.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_if_current(&self, generation: u64, notify: impl FnOnce()) {
        let _listeners = self.listeners.lock();
        if self.is_current(generation) {
            notify();
        }
    }
}

struct SingleState {
    relevance: Relevance,
    reference: Mutex<Option<String>>,
    value: watch::Sender<String>,
    on_change: UrlListener,
}

impl SingleState {
    fn apply(&self, generation: u64, url: String) {
        let changed = {
            // Held so a concurrent `set_reference` cannot slip in between check and write.
            let _reference = self.reference.lock();
            if !self.relevance.is_current(generation) {
                debug!("Discarding stale media resolution");
                return;
            }
            self.value.send_if_modified(|current| {
                if *current == url {
                    false
                } else {
                    *current = url.clone();
                    true
                }
            })
        };

        if changed {
            self.relevance
                .notify_if_current(generation, || (self.on_change)(&url));
        }
    }
}

/// Reactive URL for one media reference.
///
/// Starts out as `""` and is updated once the reference resolves. Changing the reference
/// restarts resolution; results for a superseded reference are dropped, although the
/// exchange itself still completes and fills the shared cache. Dropping the handle
/// unsubscribes.
pub struct UrlSubscription {
    resolver: MediaResolver,
    state: Arc<SingleState>,
}

impl UrlSubscription {
    pub(super) fn start(resolver: MediaResolver, value: Option<&str>, on_change: UrlListener) -> Self {
        let (tx, _) = watch::channel(String::new());
        let subscription = Self {
            resolver,
            state: Arc::new(SingleState {
                relevance: Relevance::new(),
                reference: Mutex::new(value.map(str::to_string)),
                value: tx,
                on_change,
            }),
        };

        let generation = subscription.state.relevance.advance();
        subscription.spawn(generation, value.map(str::to_string));
        subscription
    }

    pub fn current(&self) -> String {
        self.state.value.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<String> {
        self.state.value.subscribe()
    }

    /// Points the subscription at another reference. Setting the same reference again
    /// is a no-op.
    pub fn set_reference(&self, value: Option<&str>) {
        let generation = {
            let mut reference = self.state.reference.lock();
            if reference.as_deref() == value {
                return;
            }
            *reference = value.map(str::to_string);
            self.state.relevance.advance()
        };
        self.spawn(generation, value.map(str::to_string));
    }

    pub fn unsubscribe(self) {}

    fn spawn(&self, generation: u64, value: Option<String>) {
        let resolver = self.resolver.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let url = resolver.resolve(value.as_deref()).await;
            state.apply(generation, url);
        });
    }
}

impl Drop for UrlSubscription {
    fn drop(&mut self) {
        self.state.relevance.close();
    }
}

struct BatchState {
    relevance: Relevance,
    key: Mutex<String>,
    value: watch::Sender<Vec<String>>,
    on_change: UrlListListener,
}

impl BatchState {
    fn apply(&self, generation: u64, urls: Vec<String>) {
        let changed = {
            let _key = self.key.lock();
            if !self.relevance.is_current(generation) {
                debug!("Discarding stale media batch");
                return;
            }
            self.value.send_if_modified(|current| {
                if *current == urls {
                    false
                } else {
                    *current = urls.clone();
                    true
                }
            })
        };

        if changed {
            self.relevance
                .notify_if_current(generation, || (self.on_change)(&urls));
        }
    }
}

/// Reactive list of resolved URLs for a set of references.
///
/// The list holds only references that resolved to a non-empty URL, in the order their
/// resolutions completed. It is published once the whole batch has been resolved.
/// Resolution restarts only when the unique references (in first-occurrence order)
/// change.
pub struct BatchSubscription {
    resolver: MediaResolver,
    state: Arc<BatchState>,
}

impl BatchSubscription {
    pub(super) fn start<S: AsRef<str>>(
        resolver: MediaResolver,
        refs: &[S],
        on_change: UrlListListener,
    ) -> Self {
        let unique = unique_refs(refs);
        let (tx, _) = watch::channel(Vec::new());
        let subscription = Self {
            resolver,
            state: Arc::new(BatchState {
                relevance: Relevance::new(),
                key: Mutex::new(unique.join("|")),
                value: tx,
                on_change,
            }),
        };

        let generation = subscription.state.relevance.advance();
        subscription.spawn(generation, unique);
        subscription
    }

    pub fn current(&self) -> Vec<String> {
        self.state.value.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<String>> {
        self.state.value.subscribe()
    }

    pub fn set_references<S: AsRef<str>>(&self, refs: &[S]) {
        let unique = unique_refs(refs);
        let generation = {
            let mut key = self.state.key.lock();
            let next = unique.join("|");
            if *key == next {
                return;
            }
            *key = next;
            self.state.relevance.advance()
        };
        self.spawn(generation, unique);
    }

    pub fn unsubscribe(self) {}

    fn spawn(&self, generation: u64, unique: Vec<String>) {
        let resolver = self.resolver.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let relevant = || state.relevance.is_current(generation);
            if let Some(urls) = resolver.resolve_unique_while(unique, relevant).await {
                state.apply(generation, urls);
            }
        });
    }
}

impl Drop for BatchSubscription {
    fn drop(&mut self) {
        self.state.relevance.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::super::testing::{Scripted, ScriptedPresigner};
    use super::*;

    async fn next<T: Clone>(rx: &mut watch::Receiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("subscription update")
            .expect("sender alive");
        let value = rx.borrow_and_update().clone();
        value
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_close_waits_for_running_listener() {
        let relevance = Arc::new(Relevance::new());
        let generation = relevance.advance();
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let listener = {
            let relevance = relevance.clone();
            let started = started.clone();
            let finished = finished.clone();
            std::thread::spawn(move || {
                relevance.notify_if_current(generation, || {
                    started.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                });
            })
        };

        while !started.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        relevance.close();
        assert!(finished.load(Ordering::SeqCst));
        listener.join().unwrap();

        let called = AtomicBool::new(false);
        relevance.notify_if_current(generation, || called.store(true, Ordering::SeqCst));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_listener_may_close_its_own_subscription() {
        let relevance = Relevance::new();
        let generation = relevance.advance();
        relevance.notify_if_current(generation, || relevance.close());
        assert!(!relevance.is_current(generation));
    }

    #[tokio::test]
    async fn test_single_starts_empty_then_updates() {
        let presigner = Arc::new(ScriptedPresigner::new());
        let gate = presigner.gate("k");
        let resolver = MediaResolver::new(presigner.clone());

        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        let subscription = resolver.subscribe(Some("k"), move |url| sink.lock().push(url.to_string()));
        let mut rx = subscription.watch();
        assert_eq!(subscription.current(), "");

        gate.send(Some("https://cdn.test/k-signed".to_string())).unwrap();
        assert_eq!(next(&mut rx).await, "https://cdn.test/k-signed");
        assert_eq!(subscription.current(), "https://cdn.test/k-signed");
        assert_eq!(*notified.lock(), vec!["https://cdn.test/k-signed".to_string()]);
    }

    #[tokio::test]
    async fn test_single_discards_superseded_reference() {
        let presigner = Arc::new(ScriptedPresigner::new());
        let old_gate = presigner.gate("old");
        let resolver = MediaResolver::new(presigner.clone());

        let subscription = resolver.subscribe(Some("old"), |_| {});
        let mut rx = subscription.watch();
        while presigner.calls() == 0 {
            tokio::task::yield_now().await;
        }

        subscription.set_reference(Some("new"));
        assert_eq!(next(&mut rx).await, "https://cdn.test/new");

        old_gate.send(Some("https://cdn.test/old".to_string())).unwrap();
        while resolver.resolve_cached(Some("old")).is_empty() {
            tokio::task::yield_now().await;
        }
        settle().await;

        // The late result filled the cache but did not replace the current value
        assert_eq!(subscription.current(), "https://cdn.test/new");
    }

    #[tokio::test]
    async fn test_single_same_reference_is_noop() {
        let presigner = Arc::new(ScriptedPresigner::new());
        let resolver = MediaResolver::new(presigner.clone());

        let subscription = resolver.subscribe(Some("k"), |_| {});
        let mut rx = subscription.watch();
        assert_eq!(next(&mut rx).await, "https://cdn.test/k");

        subscription.set_reference(Some("k"));
        settle().await;
        assert_eq!(presigner.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_unsubscribe_drops_result() {
        let presigner = Arc::new(ScriptedPresigner::new());
        let gate = presigner.gate("k");
        let resolver = MediaResolver::new(presigner.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = resolver.subscribe(Some("k"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        while presigner.calls() == 0 {
            tokio::task::yield_now().await;
        }
        subscription.unsubscribe();

        gate.send(Some("https://cdn.test/k".to_string())).unwrap();
        while resolver.resolve_cached(Some("k")).is_empty() {
            tokio::task::yield_now().await;
        }
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_absolute_reference() {
        let presigner = Arc::new(ScriptedPresigner::new());
        let resolver = MediaResolver::new(presigner.clone());

        let subscription = resolver.subscribe(Some("//cdn.example.com/x.png"), |_| {});
        let mut rx = subscription.watch();
        assert_eq!(next(&mut rx).await, "https://cdn.example.com/x.png");
        assert_eq!(presigner.calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_sequential_dedup() {
        let presigner = Arc::new(ScriptedPresigner::new());
        presigner.push("b", Scripted::Empty);
        let resolver = MediaResolver::new(presigner.clone());

        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        let subscription =
            resolver.subscribe_batch(&["a", "b", "a", "c"], move |urls| sink.lock().push(urls.to_vec()));
        let mut rx = subscription.watch();

        let urls = next(&mut rx).await;
        assert_eq!(urls, vec!["https://cdn.test/a", "https://cdn.test/c"]);
        assert_eq!(presigner.calls(), 3);
        assert_eq!(notified.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_same_unique_set_does_not_restart() {
        let presigner = Arc::new(ScriptedPresigner::new());
        presigner.push("a", Scripted::Fail);
        let resolver = MediaResolver::new(presigner.clone());

        let subscription = resolver.subscribe_batch(&["a", "b"], |_| {});
        let mut rx = subscription.watch();
        assert_eq!(next(&mut rx).await, vec!["https://cdn.test/b"]);

        // Duplicates do not change the identity of the batch
        subscription.set_references(&["a", "b", "b", "a"]);
        settle().await;
        assert_eq!(presigner.calls_for("a"), 1);

        // A reordering does, and the failed key gets another attempt
        subscription.set_references(&["b", "a"]);
        assert_eq!(
            next(&mut rx).await,
            vec!["https://cdn.test/b", "https://cdn.test/a"]
        );
        assert_eq!(presigner.calls_for("a"), 2);
        assert_eq!(presigner.calls_for("b"), 1);
    }

    #[tokio::test]
    async fn test_batch_stale_run_stops_early() {
        let presigner = Arc::new(ScriptedPresigner::new());
        let gate = presigner.gate("slow");
        let resolver = MediaResolver::new(presigner.clone());

        let subscription = resolver.subscribe_batch(&["slow", "never"], |_| {});
        let mut rx = subscription.watch();
        while presigner.calls() == 0 {
            tokio::task::yield_now().await;
        }

        subscription.set_references(&["other"]);
        assert_eq!(next(&mut rx).await, vec!["https://cdn.test/other"]);

        gate.send(Some("https://cdn.test/slow".to_string())).unwrap();
        while resolver.resolve_cached(Some("slow")).is_empty() {
            tokio::task::yield_now().await;
        }
        settle().await;

        // The superseded run never started "never" and published nothing
        assert_eq!(presigner.calls_for("never"), 0);
        assert_eq!(subscription.current(), vec!["https://cdn.test/other"]);
    }
}

//! Per-key debounced coalescing with managed timers
//!
//! Collapses bursts of change notifications by:
//! - Tracking one pending entry per policy key
//! - Replacing the stored snapshot on repeated notifications
//! - Running exactly one timer task per pending key
//! - Emitting the latest snapshot once the key has been quiet for the window
//!
//! Example: if a manifest is touched 100 times in one second by a build,
//! one event is emitted 500ms after the last touch (or after the max wait,
//! whichever comes first).

use crate::config::CoalescerConfig;
use crate::error::{Error, Result};
use crate::event::{ChangeKey, Snapshot, WorkspaceEvent};
use crate::key::KeyPolicy;
use crate::resolve::PayloadResolver;
use crate::sink::Sink;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Debounced coalescer, generic over its key policy
///
/// Cloning is cheap and every clone drives the same pending set.
pub struct Coalescer<P: KeyPolicy> {
    inner: Arc<Inner<P>>,
}

impl<P: KeyPolicy> Clone for Coalescer<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<P: KeyPolicy> {
    /// Key equality policy
    policy: P,

    /// Quiet period after the last notification
    window: Duration,

    /// Upper bound on time spent pending
    max_wait: Duration,

    /// Pending entries, keyed by policy key
    pending: Mutex<HashMap<P::Key, PendingEntry>>,

    resolver: Arc<dyn PayloadResolver>,
    sink: Arc<dyn Sink>,

    /// Runtime that owns the timer tasks
    runtime: Handle,

    /// Cancelled on shutdown
    shutdown: CancellationToken,

    /// Source of cycle ids, one per idle-to-pending transition
    cycles: AtomicU64,

    stats: Counters,
}

/// State of one pending key
struct PendingEntry {
    /// Latest change identity (the emitted kind is the last one seen)
    key: ChangeKey,

    /// Latest snapshot
    snapshot: Snapshot,

    /// When this key became pending
    first_seen: Instant,

    /// When the timer should emit, if nothing else arrives
    deadline: Instant,

    /// Cycle that owns this entry
    cycle: u64,

    /// The single timer task for this cycle
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Counters {
    notified: AtomicU64,
    merged: AtomicU64,
    scheduled: AtomicU64,
    emitted: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of the coalescer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Notifications accepted
    pub notified: u64,
    /// Notifications merged into an already pending key
    pub merged: u64,
    /// Timer tasks started (one per idle-to-pending transition)
    pub scheduled: u64,
    /// Events handed to the sink
    pub emitted: u64,
    /// Emissions dropped because resolution failed
    pub failed: u64,
    /// Pending entries thrown away by shutdown
    pub discarded: u64,
}

impl<P: KeyPolicy> Coalescer<P> {
    /// Create a coalescer from configuration
    ///
    /// Must be called inside a tokio runtime; timers run on that runtime
    /// even when `notify` is called from other threads.
    pub fn new(
        policy: P,
        config: &CoalescerConfig,
        resolver: Arc<dyn PayloadResolver>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self> {
        config.validate()?;
        Self::with_timing(policy, config.window(), config.max_wait(), resolver, sink)
    }

    /// Create a coalescer with explicit timing
    pub fn with_timing(
        policy: P,
        window: Duration,
        max_wait: Duration,
        resolver: Arc<dyn PayloadResolver>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self> {
        if window.is_zero() || max_wait < window {
            return Err(Error::InvalidConfig(format!(
                "window must be non-zero and max wait at least the window (window {:?}, max wait {:?})",
                window, max_wait
            )));
        }
        let runtime = Handle::try_current()?;

        debug!(
            "Coalescer created (policy: {}, window: {:?}, max wait: {:?})",
            policy.name(),
            window,
            max_wait
        );

        Ok(Self {
            inner: Arc::new(Inner {
                policy,
                window,
                max_wait,
                pending: Mutex::new(HashMap::new()),
                resolver,
                sink,
                runtime,
                shutdown: CancellationToken::new(),
                cycles: AtomicU64::new(0),
                stats: Counters::default(),
            }),
        })
    }

    /// Record a change
    ///
    /// An idle key becomes pending and gets its timer. A pending key has its
    /// snapshot replaced and its deadline pushed back; no second timer is
    /// started. Never blocks on I/O.
    pub fn notify(&self, key: ChangeKey, snapshot: Snapshot) {
        let inner = &self.inner;
        let pending_key = inner.policy.pending_key(&key);
        let now = Instant::now();

        let mut pending = inner.pending.lock();

        // Checked under the lock so shutdown's drain cannot miss an insert
        if inner.shutdown.is_cancelled() {
            debug!("Ignoring {} for {} after shutdown", key.kind, key.subject.display());
            return;
        }
        inner.stats.notified.fetch_add(1, Ordering::Relaxed);

        match pending.entry(pending_key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.deadline = (now + inner.window).min(entry.first_seen + inner.max_wait);
                entry.key = key;
                entry.snapshot = snapshot;
                inner.stats.merged.fetch_add(1, Ordering::Relaxed);

                trace!(
                    "Merged {} for {} into cycle {}",
                    entry.key.kind,
                    entry.key.subject.display(),
                    entry.cycle
                );
            }
            Entry::Vacant(vacant) => {
                let cycle = inner.cycles.fetch_add(1, Ordering::Relaxed);
                let deadline = now + inner.window;
                let timer = inner.runtime.spawn(run_timer(
                    Arc::clone(inner),
                    vacant.key().clone(),
                    cycle,
                    deadline,
                ));
                inner.stats.scheduled.fetch_add(1, Ordering::Relaxed);

                trace!("Scheduled cycle {} for {}", cycle, key.subject.display());

                vacant.insert(PendingEntry {
                    key,
                    snapshot,
                    first_seen: now,
                    deadline,
                    cycle,
                    timer: Some(timer),
                });
            }
        }
    }

    /// Emit every pending entry now
    ///
    /// Timers of flushed entries are cancelled. Returns the number of
    /// events handed to the sink.
    pub async fn flush(&self) -> usize {
        let drained = self.drain();
        let mut emitted = 0;

        for entry in drained {
            if deliver(&self.inner, entry.key, entry.snapshot).await {
                emitted += 1;
            }
        }

        if emitted > 0 {
            debug!("Flushed {} pending events", emitted);
        }
        emitted
    }

    /// Stop the coalescer
    ///
    /// Cancels every outstanding timer and discards pending entries.
    /// Later notifications are ignored. Returns the number discarded.
    pub fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();
        let discarded = self.drain().len();

        self.inner
            .stats
            .discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        info!(
            "Coalescer ({}) shut down, discarded {} pending entries",
            self.inner.policy.name(),
            discarded
        );
        discarded
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of keys currently inside a window
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Whether `key` (under this coalescer's policy) is pending
    pub fn is_pending(&self, key: &ChangeKey) -> bool {
        let pending_key = self.inner.policy.pending_key(key);
        self.inner.pending.lock().contains_key(&pending_key)
    }

    pub fn stats(&self) -> CoalescerStats {
        let stats = &self.inner.stats;
        CoalescerStats {
            notified: stats.notified.load(Ordering::Relaxed),
            merged: stats.merged.load(Ordering::Relaxed),
            scheduled: stats.scheduled.load(Ordering::Relaxed),
            emitted: stats.emitted.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            discarded: stats.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    pub fn policy(&self) -> &P {
        &self.inner.policy
    }

    /// Remove every pending entry and abort its timer
    fn drain(&self) -> Vec<PendingEntry> {
        let mut drained: Vec<PendingEntry> = {
            let mut pending = self.inner.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };

        for entry in &mut drained {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
        drained
    }
}

/// Timer body for one pending cycle
///
/// Sleeps until the entry's deadline, following extensions, then takes the
/// entry out of the pending set and delivers it outside the lock.
async fn run_timer<P: KeyPolicy>(
    inner: Arc<Inner<P>>,
    pending_key: P::Key,
    cycle: u64,
    mut deadline: Instant,
) {
    let entry = loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            _ = sleep_until(deadline) => {}
        }

        let mut pending = inner.pending.lock();
        match pending.get(&pending_key) {
            Some(entry) if entry.cycle == cycle && entry.deadline > deadline => {
                deadline = entry.deadline;
                continue;
            }
            Some(entry) if entry.cycle == cycle => {}
            // Flushed, shut down, or already replaced by a newer cycle
            _ => return,
        }

        match pending.remove(&pending_key) {
            Some(entry) => break entry,
            None => return,
        }
    };

    trace!("Cycle {} elapsed for {}", cycle, entry.key.subject.display());
    deliver(&inner, entry.key, entry.snapshot).await;
}

/// Resolve and emit one event; returns whether it reached the sink
async fn deliver<P: KeyPolicy>(inner: &Inner<P>, key: ChangeKey, snapshot: Snapshot) -> bool {
    let payload = if key.kind.is_removal() {
        None
    } else {
        // Own task so a panicking resolver only loses this emission
        let resolver = Arc::clone(&inner.resolver);
        let (task_key, task_snapshot) = (key.clone(), snapshot.clone());
        let mut resolving = inner
            .runtime
            .spawn(async move { resolver.resolve(&task_key, &task_snapshot).await });

        let resolved = tokio::select! {
            _ = inner.shutdown.cancelled() => {
                resolving.abort();
                return false;
            }
            resolved = &mut resolving => resolved,
        };

        let failure = match resolved {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(e) if e.is_panic() => Err("resolver panicked".to_string()),
            Err(e) => Err(e.to_string()),
        };
        match failure {
            Ok(payload) => payload,
            Err(reason) => {
                inner.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Dropping {} for {}: {}",
                    key.kind,
                    key.subject.display(),
                    reason
                );
                return false;
            }
        }
    };

    if inner.shutdown.is_cancelled() {
        return false;
    }

    let event = WorkspaceEvent::new(&key, &snapshot, payload);
    if catch_unwind(AssertUnwindSafe(|| inner.sink.emit(event))).is_err() {
        inner.stats.failed.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Dropping {} for {}: sink panicked",
            key.kind,
            key.subject.display()
        );
        return false;
    }
    inner.stats.emitted.fetch_add(1, Ordering::Relaxed);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use crate::key::{BySubject, BySubjectAndKind};
    use crate::resolve::NullResolver;
    use crate::sink::ChannelSink;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::sleep;

    const WINDOW: Duration = Duration::from_millis(500);
    const SLACK: Duration = Duration::from_millis(50);

    /// Resolver that counts calls and fails for subjects named "bad"
    #[derive(Default)]
    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PayloadResolver for CountingResolver {
        async fn resolve(&self, key: &ChangeKey, _snapshot: &Snapshot) -> anyhow::Result<Option<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key.subject.ends_with("bad") {
                anyhow::bail!("no metadata provider is reachable");
            }
            Ok(Some(json!({ "subject": key.subject.to_string_lossy() })))
        }
    }

    struct PanickingResolver;

    #[async_trait]
    impl PayloadResolver for PanickingResolver {
        async fn resolve(&self, key: &ChangeKey, _snapshot: &Snapshot) -> anyhow::Result<Option<Value>> {
            if key.subject.ends_with("boom") {
                panic!("resolver blew up");
            }
            Ok(None)
        }
    }

    fn coalescer<P: KeyPolicy>(
        policy: P,
        max_wait: Duration,
        resolver: Arc<dyn PayloadResolver>,
    ) -> (Coalescer<P>, UnboundedReceiver<WorkspaceEvent>) {
        let (sink, rx) = ChannelSink::new();
        let coalescer =
            Coalescer::with_timing(policy, WINDOW, max_wait, resolver, Arc::new(sink)).unwrap();
        (coalescer, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<WorkspaceEvent>) -> Vec<WorkspaceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn key(path: &str, kind: ChangeKind) -> ChangeKey {
        ChangeKey::new(path, kind)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_emits_once_with_last_snapshot() {
        let resolver = Arc::new(CountingResolver::default());
        let (coalescer, mut rx) = coalescer(BySubject, Duration::from_secs(10), resolver.clone());

        for version in 0..5 {
            coalescer.notify(
                key("src/lib.rs", ChangeKind::DocumentChanged),
                Snapshot::with_version(format!("v{}", version)),
            );
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(coalescer.pending_count(), 1);

        sleep(WINDOW + SLACK).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version_id.as_deref(), Some("v4"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        let stats = coalescer.stats();
        assert_eq!(stats.notified, 5);
        assert_eq!(stats.merged, 4);
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.emitted, 1);
        assert_eq!(coalescer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_emitted_before_window() {
        let (coalescer, mut rx) = coalescer(BySubject, WINDOW, Arc::new(NullResolver));

        coalescer.notify(key("a.rs", ChangeKind::DocumentAdded), Snapshot::new());
        sleep(WINDOW - SLACK).await;

        assert!(drain(&mut rx).is_empty());
        assert!(coalescer.is_pending(&key("a.rs", ChangeKind::DocumentAdded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_then_change_emits_single_changed() {
        let (coalescer, mut rx) =
            coalescer(BySubject, Duration::from_secs(2), Arc::new(CountingResolver::default()));

        coalescer.notify(key("app/Cargo.toml", ChangeKind::ProjectAdded), Snapshot::new());
        sleep(Duration::from_millis(10)).await;
        coalescer.notify(key("app/Cargo.toml", ChangeKind::ProjectChanged), Snapshot::new());

        sleep(WINDOW + SLACK).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::ProjectChanged);
        assert_eq!(events[0].file_name, "app/Cargo.toml");
        assert_eq!(events[0].payload, Some(json!({ "subject": "app/Cargo.toml" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subject_and_kind_keeps_kinds_apart() {
        let (coalescer, mut rx) = coalescer(
            BySubjectAndKind,
            Duration::from_secs(2),
            Arc::new(CountingResolver::default()),
        );

        coalescer.notify(key("app/Cargo.toml", ChangeKind::ProjectAdded), Snapshot::new());
        coalescer.notify(key("app/Cargo.toml", ChangeKind::ProjectChanged), Snapshot::new());
        coalescer.notify(key("app/Cargo.toml", ChangeKind::ProjectChanged), Snapshot::new());
        assert_eq!(coalescer.pending_count(), 2);

        sleep(WINDOW + SLACK).await;

        let mut kinds: Vec<_> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
        kinds.sort_by_key(|kind| kind.as_str());
        assert_eq!(kinds, vec![ChangeKind::ProjectAdded, ChangeKind::ProjectChanged]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearms_after_emission() {
        let (coalescer, mut rx) = coalescer(BySubject, WINDOW, Arc::new(NullResolver));

        coalescer.notify(key("app/Cargo.toml", ChangeKind::ProjectAdded), Snapshot::new());
        sleep(WINDOW + SLACK).await;
        assert_eq!(drain(&mut rx).len(), 1);

        coalescer.notify(key("app/Cargo.toml", ChangeKind::ProjectChanged), Snapshot::new());
        sleep(WINDOW + SLACK).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::ProjectChanged);
        assert_eq!(coalescer.stats().scheduled, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_key_does_not_delay_others() {
        let (coalescer, mut rx) = coalescer(BySubject, Duration::from_secs(10), Arc::new(NullResolver));

        coalescer.notify(key("quiet.rs", ChangeKind::DocumentChanged), Snapshot::new());
        for _ in 0..6 {
            coalescer.notify(key("busy.rs", ChangeKind::DocumentChanged), Snapshot::new());
            sleep(Duration::from_millis(100)).await;
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].file_name, "quiet.rs");
        assert!(coalescer.is_pending(&key("busy.rs", ChangeKind::DocumentChanged)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_bounds_continuous_updates() {
        let (coalescer, mut rx) =
            coalescer(BySubject, Duration::from_millis(1_500), Arc::new(NullResolver));

        // One change every 100ms for 5 seconds never leaves a quiet window
        for i in 0..50 {
            coalescer.notify(
                key("generated.rs", ChangeKind::DocumentChanged),
                Snapshot::with_version(i.to_string()),
            );
            sleep(Duration::from_millis(100)).await;
        }
        sleep(WINDOW + SLACK).await;

        let events = drain(&mut rx);
        assert!(
            (3..=4).contains(&events.len()),
            "expected 3-4 capped emissions, got {}",
            events.len()
        );
        assert_eq!(events.last().unwrap().version_id.as_deref(), Some("49"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_skips_resolver() {
        let resolver = Arc::new(CountingResolver::default());
        let (coalescer, mut rx) = coalescer(BySubject, WINDOW, resolver.clone());

        coalescer.notify(
            key("app/Cargo.toml", ChangeKind::ProjectRemoved),
            Snapshot::with_version("3"),
        );
        sleep(WINDOW + SLACK).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::ProjectRemoved);
        assert_eq!(events[0].payload, None);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_then_remove_collapses_to_removal() {
        let resolver = Arc::new(CountingResolver::default());
        let (coalescer, mut rx) = coalescer(BySubject, WINDOW, resolver.clone());

        coalescer.notify(key("tmp.rs", ChangeKind::DocumentAdded), Snapshot::new());
        coalescer.notify(key("tmp.rs", ChangeKind::DocumentRemoved), Snapshot::new());
        sleep(WINDOW + SLACK).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::DocumentRemoved);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolver_failure_drops_only_that_emission() {
        let (coalescer, mut rx) =
            coalescer(BySubject, WINDOW, Arc::new(CountingResolver::default()));

        coalescer.notify(key("bad", ChangeKind::ProjectChanged), Snapshot::new());
        coalescer.notify(key("good", ChangeKind::ProjectChanged), Snapshot::new());
        sleep(WINDOW + SLACK).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].file_name, "good");
        assert_eq!(coalescer.stats().failed, 1);

        // The failed key still cycles normally
        coalescer.notify(key("bad", ChangeKind::ProjectRemoved), Snapshot::new());
        sleep(WINDOW + SLACK).await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolver_panic_is_contained() {
        let (coalescer, mut rx) = coalescer(BySubject, WINDOW, Arc::new(PanickingResolver));

        coalescer.notify(key("boom", ChangeKind::DocumentChanged), Snapshot::new());
        sleep(WINDOW + SLACK).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(coalescer.pending_count(), 0);
        assert_eq!(coalescer.stats().failed, 1);

        coalescer.notify(key("boom", ChangeKind::DocumentRemoved), Snapshot::new());
        coalescer.notify(key("fine.rs", ChangeKind::DocumentChanged), Snapshot::new());
        sleep(WINDOW + SLACK).await;
        assert_eq!(drain(&mut rx).len(), 2);
    }

    /// Sink that panics on subjects named "boom" and forwards the rest
    struct PanickingSink {
        inner: ChannelSink,
    }

    impl Sink for PanickingSink {
        fn emit(&self, event: WorkspaceEvent) {
            if event.file_name.ends_with("boom") {
                panic!("sink blew up");
            }
            self.inner.emit(event);
        }
    }

    fn panicking_sink_coalescer() -> (Coalescer<BySubject>, UnboundedReceiver<WorkspaceEvent>) {
        let (inner, rx) = ChannelSink::new();
        let coalescer = Coalescer::with_timing(
            BySubject,
            WINDOW,
            WINDOW,
            Arc::new(NullResolver),
            Arc::new(PanickingSink { inner }),
        )
        .unwrap();
        (coalescer, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_panic_on_timer_is_counted() {
        let (coalescer, mut rx) = panicking_sink_coalescer();

        coalescer.notify(key("boom", ChangeKind::DocumentChanged), Snapshot::new());
        coalescer.notify(key("fine.rs", ChangeKind::DocumentChanged), Snapshot::new());
        sleep(WINDOW + SLACK).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].file_name, "fine.rs");

        let stats = coalescer.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.emitted, 1);
        assert_eq!(coalescer.pending_count(), 0);

        // The key cycles normally afterwards
        coalescer.notify(key("boom", ChangeKind::DocumentChanged), Snapshot::new());
        assert!(coalescer.is_pending(&key("boom", ChangeKind::DocumentChanged)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_panic_during_flush_keeps_other_entries() {
        let (coalescer, mut rx) = panicking_sink_coalescer();

        coalescer.notify(key("boom", ChangeKind::DocumentChanged), Snapshot::new());
        coalescer.notify(key("a.rs", ChangeKind::DocumentChanged), Snapshot::new());
        coalescer.notify(key("b.rs", ChangeKind::DocumentRemoved), Snapshot::new());

        assert_eq!(coalescer.flush().await, 2);
        assert_eq!(drain(&mut rx).len(), 2);
        assert_eq!(coalescer.pending_count(), 0);

        let stats = coalescer.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.emitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_emits_immediately_and_cancels_timers() {
        let (coalescer, mut rx) = coalescer(BySubject, WINDOW, Arc::new(NullResolver));

        coalescer.notify(key("a.rs", ChangeKind::DocumentChanged), Snapshot::new());
        coalescer.notify(key("b.rs", ChangeKind::DocumentChanged), Snapshot::new());
        coalescer.notify(key("c.rs", ChangeKind::DocumentRemoved), Snapshot::new());

        assert_eq!(coalescer.flush().await, 3);
        assert_eq!(drain(&mut rx).len(), 3);
        assert_eq!(coalescer.pending_count(), 0);

        sleep(WINDOW * 2).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(coalescer.stats().emitted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_and_ignores_later_notifies() {
        let (coalescer, mut rx) = coalescer(BySubject, WINDOW, Arc::new(NullResolver));

        coalescer.notify(key("a.rs", ChangeKind::DocumentChanged), Snapshot::new());
        coalescer.notify(key("b.rs", ChangeKind::DocumentChanged), Snapshot::new());

        assert_eq!(coalescer.shutdown(), 2);
        assert!(coalescer.is_shut_down());

        coalescer.notify(key("c.rs", ChangeKind::DocumentChanged), Snapshot::new());
        assert_eq!(coalescer.pending_count(), 0);

        sleep(WINDOW * 2).await;
        assert!(drain(&mut rx).is_empty());

        let stats = coalescer.stats();
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.notified, 2);
        assert_eq!(stats.emitted, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_notifies_schedule_one_timer() {
        let resolver = Arc::new(CountingResolver::default());
        let (sink, mut rx) = ChannelSink::new();
        let coalescer = Coalescer::with_timing(
            BySubject,
            Duration::from_millis(250),
            Duration::from_secs(30),
            resolver.clone(),
            Arc::new(sink),
        )
        .unwrap();

        // Half the producers are plain OS threads, half are runtime tasks
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let mut threads = Vec::new();
        for producer in 0..4 {
            let coalescer = coalescer.clone();
            let barrier = Arc::clone(&barrier);
            threads.push(std::thread::spawn(move || {
                barrier.wait();
                for i in 0..500 {
                    coalescer.notify(
                        key("shared/Cargo.toml", ChangeKind::ProjectChanged),
                        Snapshot::with_version(format!("{}-{}", producer, i)),
                    );
                }
            }));
        }
        let mut tasks = Vec::new();
        for producer in 4..8 {
            let coalescer = coalescer.clone();
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::task::spawn_blocking(move || {
                barrier.wait();
                for i in 0..500 {
                    coalescer.notify(
                        key("shared/Cargo.toml", ChangeKind::ProjectChanged),
                        Snapshot::with_version(format!("{}-{}", producer, i)),
                    );
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
        for task in tasks {
            task.await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(600)).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        let stats = coalescer.stats();
        assert_eq!(stats.notified, 4_000);
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.merged, 3_999);
    }

    #[test]
    fn test_requires_runtime() {
        let result = Coalescer::with_timing(
            BySubject,
            WINDOW,
            WINDOW,
            Arc::new(NullResolver),
            Arc::new(crate::sink::NullSink),
        );
        assert!(matches!(result, Err(Error::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_rejects_max_wait_below_window() {
        let result = Coalescer::with_timing(
            BySubject,
            WINDOW,
            WINDOW / 2,
            Arc::new(NullResolver),
            Arc::new(crate::sink::NullSink),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}

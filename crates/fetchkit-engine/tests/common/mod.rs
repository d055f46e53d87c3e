//! Shared fixtures for engine integration tests: a scripted processor, a
//! recording observer, and a harness wiring them to a real in-memory index.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;

use fetchkit_cache::{SqliteCacheIndex, setup_test_database};
use fetchkit_engine::{
    DownloadError, Downloadable, FileMirror, Processor, ProcessorObserver, Resource,
    ResourceCompletion, ResourceManager, ResourceManagerConfig, ResourceManagerDeps,
    ResourceObserver, TaskSnapshot, WeightedMirrorPolicy, build_resource_manager,
};

/// Scripted outcome for one mirror location.
#[derive(Clone)]
pub enum MirrorBehavior {
    /// Spool the bytes and report success.
    Succeed(Vec<u8>),
    /// Report a transport failure.
    Fail,
}

/// In-process processor claiming `test://` locations, driven by a script.
///
/// Unscripted locations fail, so a test only has to name its happy paths.
pub struct FakeProcessor {
    behaviors: Mutex<HashMap<String, MirrorBehavior>>,
    attempts: Mutex<Vec<String>>,
    delay: Duration,
    spool_dir: PathBuf,
    paused: AtomicBool,
    pending: Mutex<Vec<Arc<Downloadable>>>,
    observer: Mutex<Option<Weak<dyn ProcessorObserver>>>,
    counter: AtomicUsize,
}

impl FakeProcessor {
    pub fn new(spool_dir: PathBuf) -> Arc<Self> {
        Self::with_delay(spool_dir, Duration::ZERO)
    }

    pub fn with_delay(spool_dir: PathBuf, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            delay,
            spool_dir,
            paused: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            observer: Mutex::new(None),
            counter: AtomicUsize::new(0),
        })
    }

    pub fn succeed(&self, location: &str, bytes: Vec<u8>) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(location.to_string(), MirrorBehavior::Succeed(bytes));
    }

    pub fn fail(&self, location: &str) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(location.to_string(), MirrorBehavior::Fail);
    }

    /// Locations in attempt order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempted(&self, location: &str) -> bool {
        self.attempts.lock().unwrap().iter().any(|l| l == location)
    }

    fn observer(&self) -> Option<Arc<dyn ProcessorObserver>> {
        self.observer.lock().unwrap().as_ref()?.upgrade()
    }

    async fn run(&self, downloadable: Arc<Downloadable>) {
        self.attempts
            .lock()
            .unwrap()
            .push(downloadable.location().to_string());

        let Some(observer) = self.observer() else {
            return;
        };

        downloadable.start();
        observer.download_began(&downloadable).await;

        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                () = downloadable.cancelled() => {
                    if downloadable.try_terminate() {
                        downloadable.mark_finished();
                        observer
                            .download_failed(&downloadable, DownloadError::Cancelled)
                            .await;
                    }
                    return;
                }
                () = tokio::time::sleep(self.delay) => {}
            }
        }

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(downloadable.location())
            .cloned()
            .unwrap_or(MirrorBehavior::Fail);

        match behavior {
            MirrorBehavior::Succeed(bytes) => {
                let total = bytes.len() as u64;
                downloadable.set_total_bytes(total);
                downloadable.set_transferred_bytes(total);

                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                let temp_file = self.spool_dir.join(format!("attempt-{n}.part"));
                tokio::fs::create_dir_all(&self.spool_dir).await.unwrap();
                tokio::fs::write(&temp_file, &bytes).await.unwrap();

                observer
                    .bytes_transferred(&downloadable, total, Some(total))
                    .await;
                if downloadable.try_terminate() {
                    downloadable.mark_finished();
                    observer.download_finished(&downloadable, temp_file).await;
                }
            }
            MirrorBehavior::Fail => {
                if downloadable.try_terminate() {
                    downloadable.mark_finished();
                    observer
                        .download_failed(
                            &downloadable,
                            DownloadError::transport("simulated mirror failure"),
                        )
                        .await;
                }
            }
        }
    }
}

#[async_trait]
impl Processor for FakeProcessor {
    fn can_process(&self, downloadable: &Downloadable) -> bool {
        downloadable.location().starts_with("test://")
    }

    async fn process(&self, downloadable: Arc<Downloadable>) {
        if self.paused.load(Ordering::Acquire) {
            self.pending.lock().unwrap().push(downloadable);
            return;
        }
        self.run(downloadable).await;
    }

    async fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    async fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        !self.paused.load(Ordering::Acquire)
    }

    async fn enqueue_pending(&self) {
        if self.paused.load(Ordering::Acquire) {
            return;
        }
        let buffered: Vec<_> = std::mem::take(&mut *self.pending.lock().unwrap());
        for downloadable in buffered {
            self.run(downloadable).await;
        }
    }

    fn set_observer(&self, observer: Weak<dyn ProcessorObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }
}

/// One observed lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Started { mirror_id: String },
    WillRetry { failed: String, next: String },
    Finished { error: Option<String> },
}

/// Observer recording `(resource_id, event)` pairs in order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(String, Event)>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<(String, Event)> {
        self.events.lock().unwrap().clone()
    }

    /// `(failed, next)` mirror-id pairs for one resource, in order.
    pub fn retries(&self, resource_id: &str) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == resource_id)
            .filter_map(|(_, event)| match event {
                Event::WillRetry { failed, next } => Some((failed.clone(), next.clone())),
                _ => None,
            })
            .collect()
    }

    /// Terminal events for one resource (`None` = success).
    pub fn finished(&self, resource_id: &str) -> Vec<Option<String>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == resource_id)
            .filter_map(|(_, event)| match event {
                Event::Finished { error } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn started_count(&self, resource_id: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, event)| id == resource_id && matches!(event, Event::Started { .. }))
            .count()
    }
}

#[async_trait]
impl ResourceObserver for RecordingObserver {
    async fn did_start_downloading(&self, task: &TaskSnapshot) {
        self.events.lock().unwrap().push((
            task.resource_id.clone(),
            Event::Started {
                mirror_id: task.mirror_id.clone(),
            },
        ));
    }

    async fn will_retry_failed_download(
        &self,
        task: &TaskSnapshot,
        failed: &FileMirror,
        next: &FileMirror,
        _error: &DownloadError,
    ) {
        self.events.lock().unwrap().push((
            task.resource_id.clone(),
            Event::WillRetry {
                failed: failed.id().to_string(),
                next: next.id().to_string(),
            },
        ));
    }

    async fn did_finish_download(&self, task: &TaskSnapshot, error: Option<&DownloadError>) {
        self.events.lock().unwrap().push((
            task.resource_id.clone(),
            Event::Finished {
                error: error.map(ToString::to_string),
            },
        ));
    }
}

/// Counts completion-handler invocations. Cloning shares the counters.
#[derive(Clone, Default)]
pub struct CompletionProbe {
    successes: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl CompletionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler feeding this probe.
    pub fn handler(&self) -> ResourceCompletion {
        let probe = self.clone();
        Box::new(move |success: bool, _resource_id: &str| {
            if success {
                probe.successes.fetch_add(1, Ordering::SeqCst);
            } else {
                probe.failures.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.successes() + self.failures()
    }
}

/// Everything a scenario needs, wired together.
pub struct Harness {
    pub manager: Arc<ResourceManager>,
    pub processor: Arc<FakeProcessor>,
    pub observer: Arc<RecordingObserver>,
    pub index: Arc<SqliteCacheIndex>,
    pub dir: tempfile::TempDir,
}

pub async fn harness() -> Harness {
    harness_with(Duration::ZERO, |config| config).await
}

pub async fn harness_with(
    delay: Duration,
    configure: impl FnOnce(ResourceManagerConfig) -> ResourceManagerConfig,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let pool = setup_test_database().await.unwrap();
    let index = Arc::new(SqliteCacheIndex::new(pool));
    let processor = FakeProcessor::with_delay(dir.path().join("spool"), delay);
    let config = configure(ResourceManagerConfig::new(dir.path().join("cache")));

    let manager = build_resource_manager(ResourceManagerDeps {
        cache_index: Arc::clone(&index) as Arc<dyn fetchkit_engine::CacheIndex>,
        processors: vec![Arc::clone(&processor) as Arc<dyn Processor>],
        priority_processors: Vec::new(),
        mirror_policy: Arc::new(WeightedMirrorPolicy::default()),
        config,
    });

    let observer = Arc::new(RecordingObserver::default());
    manager.add_observer(Arc::clone(&observer) as Arc<dyn ResourceObserver>);

    Harness {
        manager,
        processor,
        observer,
        index,
        dir,
    }
}

/// Poll a condition for up to ~5 seconds.
pub async fn wait_until(label: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {label}");
}

pub fn mirror(id: &str, location: impl Into<String>) -> FileMirror {
    FileMirror::new(id, location)
}

/// A single-mirror resource at `test://m/{id}`.
pub fn simple_resource(id: &str) -> Resource {
    Resource::new(id, mirror("m", format!("test://m/{id}")))
}

/// The three-mirror resource the weighted-policy scenarios use:
/// main `m0` (no weight), alternatives `a100` (weight 100), `a50` (weight 50).
pub fn weighted_resource(id: &str) -> Resource {
    Resource::new(id, mirror("m0", format!("test://m0/{id}"))).with_alternatives(vec![
        mirror("a100", format!("test://a100/{id}")).with_weight(100),
        mirror("a50", format!("test://a50/{id}")).with_weight(50),
    ])
}

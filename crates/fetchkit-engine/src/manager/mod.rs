//! Resource manager implementation.
//!
//! The manager translates resources into download tasks, deduplicates by
//! resource id, applies the mirror policy, owns retry, couples successes
//! into the cache, and fans completion out to handlers and observers.
//!
//! # Concurrency Model
//!
//! - Task, completion, and observer maps live behind sync mutexes with
//!   short, never-across-await scopes
//! - Queue events arrive through the `QueueObserver` implementation; the
//!   manager decides retry vs. terminal under the task lock and performs
//!   I/O afterwards
//! - Stale events are dropped by pointer-comparing the reporting
//!   downloadable against the task's current one
//! - Lock order: tasks → completions (consistent everywhere)

mod paths;
mod task;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use url::Url;

use fetchkit_cache::{MemoryCache, MemoryCacheConfig};
use fetchkit_core::ports::{
    CacheIndex, ObserverToken, Processor, QueueObserver, ResourceCompletion, ResourceObserver,
    TaskSnapshot,
};
use fetchkit_core::resource::{
    DownloadError, DownloadPriority, DownloadRequest, Downloadable, FileMirror, RequestOptions,
    Resource,
};

use crate::policy::MirrorPolicy;
use crate::queue::{DownloadQueue, DownloadQueueConfig, QueueMetrics};

use task::{DownloadTask, QueueKind};

/// Configuration for the resource manager.
#[derive(Clone, Debug)]
pub struct ResourceManagerConfig {
    /// Directory resource files are materialized into.
    pub cache_dir: PathBuf,
    /// Simultaneous-download ceiling of the normal queue.
    pub simultaneous_downloads: u32,
    /// Ceiling of the priority queue; defaults to the normal ceiling.
    pub priority_downloads: Option<u32>,
    /// Budgets for the in-memory hot tier.
    pub memory_cache: MemoryCacheConfig,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("."),
            simultaneous_downloads: crate::queue::DEFAULT_SIMULTANEOUS_DOWNLOADS,
            priority_downloads: None,
            memory_cache: MemoryCacheConfig::default(),
        }
    }
}

impl ResourceManagerConfig {
    /// Create a config with the cache directory.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Set the normal queue's simultaneous-download ceiling.
    #[must_use]
    pub const fn with_simultaneous_downloads(mut self, ceiling: u32) -> Self {
        self.simultaneous_downloads = ceiling;
        self
    }

    /// Set a dedicated ceiling for the priority queue.
    #[must_use]
    pub const fn with_priority_downloads(mut self, ceiling: u32) -> Self {
        self.priority_downloads = Some(ceiling);
        self
    }

    /// Set the memory-cache budgets.
    #[must_use]
    pub const fn with_memory_cache(mut self, config: MemoryCacheConfig) -> Self {
        self.memory_cache = config;
        self
    }
}

/// Dependencies for creating a resource manager.
///
/// This struct bundles the ports and configuration needed to construct a
/// `ResourceManager`. A priority queue is created when
/// `priority_processors` is non-empty; high-priority requests route to it.
pub struct ResourceManagerDeps {
    /// The persistent cache index.
    pub cache_index: Arc<dyn CacheIndex>,
    /// Processors admitted to the normal queue.
    pub processors: Vec<Arc<dyn Processor>>,
    /// Processors admitted to the priority queue (empty = no priority queue).
    pub priority_processors: Vec<Arc<dyn Processor>>,
    /// Mirror selection policy.
    pub mirror_policy: Arc<dyn MirrorPolicy>,
    /// Configuration for the manager.
    pub config: ResourceManagerConfig,
}

/// Build a resource manager from its dependencies and wire the queues.
pub fn build_resource_manager(deps: ResourceManagerDeps) -> Arc<ResourceManager> {
    let ResourceManagerDeps {
        cache_index,
        processors,
        priority_processors,
        mirror_policy,
        config,
    } = deps;

    let queue = DownloadQueue::new(
        DownloadQueueConfig::new("main").with_simultaneous_downloads(config.simultaneous_downloads),
    );
    let priority_queue = if priority_processors.is_empty() {
        None
    } else {
        Some(DownloadQueue::new(
            DownloadQueueConfig::new("priority").with_simultaneous_downloads(
                config.priority_downloads.unwrap_or(config.simultaneous_downloads),
            ),
        ))
    };

    let memory = MemoryCache::new(config.memory_cache);
    let manager = Arc::new_cyclic(|weak| ResourceManager {
        config,
        index: cache_index,
        memory,
        policy: mirror_policy,
        queue,
        priority_queue,
        tasks: Mutex::new(HashMap::new()),
        completions: Mutex::new(HashMap::new()),
        observers: Mutex::new(ObserverRegistry::default()),
        active: AtomicBool::new(true),
        self_ref: weak.clone(),
    });

    let queue_observer: Arc<dyn QueueObserver> = Arc::clone(&manager) as Arc<dyn QueueObserver>;
    manager.queue.set_observer(Arc::downgrade(&queue_observer));
    for processor in processors {
        manager.queue.add_processor(processor);
    }
    if let Some(priority_queue) = &manager.priority_queue {
        priority_queue.set_observer(Arc::downgrade(&queue_observer));
        for processor in priority_processors {
            priority_queue.add_processor(processor);
        }
    }

    manager
}

#[derive(Default)]
struct ObserverRegistry {
    next_token: u64,
    observers: Vec<(ObserverToken, Arc<dyn ResourceObserver>)>,
}

enum FailureAction {
    Stale,
    Finish(TaskSnapshot, DownloadError),
    Retry {
        snapshot: TaskSnapshot,
        failed: FileMirror,
        next: FileMirror,
        next_downloadable: Arc<Downloadable>,
        queue_kind: QueueKind,
    },
}

/// Coordinator between resources, queues, policy, and the cache layer.
pub struct ResourceManager {
    config: ResourceManagerConfig,
    index: Arc<dyn CacheIndex>,
    memory: MemoryCache,
    policy: Arc<dyn MirrorPolicy>,
    queue: Arc<DownloadQueue>,
    priority_queue: Option<Arc<DownloadQueue>>,
    /// Live tasks keyed by resource id; at most one per resource.
    tasks: Mutex<HashMap<String, DownloadTask>>,
    /// Completion handlers keyed by resource id.
    completions: Mutex<HashMap<String, Vec<ResourceCompletion>>>,
    observers: Mutex<ObserverRegistry>,
    active: AtomicBool,
    self_ref: Weak<Self>,
}

impl ResourceManager {
    /// Request materialization of resources with default options.
    ///
    /// Returns one request handle per resource that is not already cached at
    /// the required-or-higher storage priority.
    pub async fn request(&self, resources: &[Resource]) -> Vec<DownloadRequest> {
        self.request_with_options(resources, RequestOptions::default())
            .await
    }

    /// Request materialization of resources.
    pub async fn request_with_options(
        &self,
        resources: &[Resource],
        options: RequestOptions,
    ) -> Vec<DownloadRequest> {
        let mut requests = Vec::new();
        for resource in resources {
            if let Some(request) = self.admit(resource, options).await {
                requests.push(request);
            }
        }
        requests
    }

    /// Explicitly admit a request created while the manager was inactive.
    ///
    /// Normally requests admit eagerly; this is the test/debug path. Returns
    /// the task's current snapshot, or `None` for unknown requests.
    pub async fn process(&self, request: &DownloadRequest) -> Option<TaskSnapshot> {
        let (downloadable, queue_kind, snapshot) = {
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks.get_mut(request.resource_id())?;
            if task.admitted {
                return Some(task.snapshot());
            }
            task.admitted = true;
            (Arc::clone(&task.current), task.queue_kind, task.snapshot())
        };
        self.queue_for(queue_kind).enqueue(downloadable);
        Some(snapshot)
    }

    /// Register a completion handler for a resource.
    ///
    /// Attached to the live task when one exists; otherwise resolved against
    /// the cache on the next scheduling tick (`true` on a hit, `false`
    /// otherwise). Every handler fires exactly once.
    pub fn add_resource_completion(&self, resource_id: &str, handler: ResourceCompletion) {
        {
            let tasks = self.tasks.lock().unwrap();
            if tasks.contains_key(resource_id) {
                self.completions
                    .lock()
                    .unwrap()
                    .entry(resource_id.to_string())
                    .or_default()
                    .push(handler);
                return;
            }
        }

        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let resource_id = resource_id.to_string();
        tokio::spawn(async move {
            let hit = matches!(manager.index.get(&resource_id).await, Ok(Some(_)));
            handler(hit, &resource_id);
        });
    }

    /// Cancel the task behind a request handle.
    pub async fn cancel(&self, request: &DownloadRequest) {
        self.cancel_resource(request.resource_id()).await;
    }

    /// Cancel several requests.
    pub async fn cancel_many(&self, requests: &[DownloadRequest]) {
        for request in requests {
            self.cancel_resource(request.resource_id()).await;
        }
    }

    /// Cancel every live task.
    pub async fn cancel_all(&self) {
        let ids: Vec<String> = self.tasks.lock().unwrap().keys().cloned().collect();
        tracing::info!(target: "fetchkit.engine", count = ids.len(), "Cancelling all tasks");
        for id in ids {
            self.cancel_resource(&id).await;
        }
    }

    /// Subscribe to task lifecycle events. Deregister with the token.
    pub fn add_observer(&self, observer: Arc<dyn ResourceObserver>) -> ObserverToken {
        let mut registry = self.observers.lock().unwrap();
        let token = ObserverToken::from_raw(registry.next_token);
        registry.next_token += 1;
        registry.observers.push((token, observer));
        token
    }

    /// Remove an observer registration. Returns `false` for unknown tokens.
    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        let mut registry = self.observers.lock().unwrap();
        let before = registry.observers.len();
        registry.observers.retain(|(t, _)| *t != token);
        registry.observers.len() < before
    }

    /// Halt or resume admission.
    ///
    /// While inactive, requests still return handles and register tasks;
    /// nothing is admitted to the queues until activity resumes. Running
    /// downloads continue either way.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
        tracing::info!(target: "fetchkit.engine", active, "Manager activity changed");
        if !active {
            return;
        }

        let to_admit: Vec<(Arc<Downloadable>, QueueKind)> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks
                .values_mut()
                .filter(|task| !task.admitted && !task.cancelled)
                .map(|task| {
                    task.admitted = true;
                    (Arc::clone(&task.current), task.queue_kind)
                })
                .collect()
        };
        for (downloadable, queue_kind) in to_admit {
            self.queue_for(queue_kind).enqueue(downloadable);
        }
    }

    /// Whether admission is running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// In-flight downloads across both queues.
    pub fn current_download_count(&self) -> usize {
        self.queue.current_download_count()
            + self
                .priority_queue
                .as_ref()
                .map_or(0, |q| q.current_download_count())
    }

    /// Queued downloads across both queues.
    pub fn queued_download_count(&self) -> usize {
        self.queue.queued_download_count()
            + self
                .priority_queue
                .as_ref()
                .map_or(0, |q| q.queued_download_count())
    }

    /// All downloads across both queues, in-flight first.
    pub fn downloads(&self) -> Vec<Arc<Downloadable>> {
        let mut all = self.queue.downloads();
        if let Some(priority_queue) = &self.priority_queue {
            all.extend(priority_queue.downloads());
        }
        all
    }

    /// Queued downloads across both queues.
    pub fn queued_downloads(&self) -> Vec<Arc<Downloadable>> {
        let mut all = self.queue.queued_downloads();
        if let Some(priority_queue) = &self.priority_queue {
            all.extend(priority_queue.queued_downloads());
        }
        all
    }

    /// In-flight downloads across both queues.
    pub fn current_downloads(&self) -> Vec<Arc<Downloadable>> {
        let mut all = self.queue.current_downloads();
        if let Some(priority_queue) = &self.priority_queue {
            all.extend(priority_queue.current_downloads());
        }
        all
    }

    /// Whether a resource is queued or in-flight.
    pub fn has_download(&self, resource_id: &str) -> bool {
        self.queue.has_download(resource_id)
            || self
                .priority_queue
                .as_ref()
                .is_some_and(|q| q.has_download(resource_id))
    }

    /// The downloadable for a resource, if queued or in-flight.
    pub fn download(&self, resource_id: &str) -> Option<Arc<Downloadable>> {
        self.queue.download(resource_id).or_else(|| {
            self.priority_queue
                .as_ref()
                .and_then(|q| q.download(resource_id))
        })
    }

    /// Whether a resource is in-flight right now.
    pub fn is_downloading(&self, resource_id: &str) -> bool {
        self.queue.is_downloading(resource_id)
            || self
                .priority_queue
                .as_ref()
                .is_some_and(|q| q.is_downloading(resource_id))
    }

    /// Counters aggregated across both queues.
    pub fn metrics(&self) -> QueueMetrics {
        let base = self.queue.metrics();
        self.priority_queue
            .as_ref()
            .map_or(base, |q| base.merge(q.metrics()))
    }

    /// Reset the counters of both queues.
    pub fn reset_metrics(&self) {
        self.queue.reset_metrics();
        if let Some(priority_queue) = &self.priority_queue {
            priority_queue.reset_metrics();
        }
    }

    /// The normal queue.
    pub fn main_queue(&self) -> &Arc<DownloadQueue> {
        &self.queue
    }

    /// The priority queue, when configured.
    pub fn priority_queue(&self) -> Option<&Arc<DownloadQueue>> {
        self.priority_queue.as_ref()
    }

    /// The in-memory hot tier.
    pub fn memory_cache(&self) -> &MemoryCache {
        &self.memory
    }

    /// Whether the cache holds a live record for a resource.
    pub async fn is_cached(&self, resource_id: &str) -> bool {
        matches!(self.index.get(resource_id).await, Ok(Some(_)))
    }

    /// The cached file path for a resource, if one exists.
    pub async fn cached_file(&self, resource_id: &str) -> Option<PathBuf> {
        self.index
            .get(resource_id)
            .await
            .ok()
            .flatten()
            .map(|record| record.path)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Admission
    // ─────────────────────────────────────────────────────────────────────

    async fn admit(
        &self,
        resource: &Resource,
        options: RequestOptions,
    ) -> Option<DownloadRequest> {
        // Pre-materialized resources synthesize a cache insert; no queue
        // traffic, completion resolves on the next tick
        if let Some(file_url) = resource.file_url() {
            self.admit_precached(resource, file_url.clone(), options).await;
            return None;
        }

        // Deduplicate against the live task
        {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(task) = tasks.get_mut(resource.id()) {
                task.upgrade_storage_priority(options.storage_priority);
                tracing::debug!(
                    target: "fetchkit.engine",
                    id = resource.id(),
                    "Request deduplicated onto live task"
                );
                return Some(task.request.clone());
            }
        }

        // Consult the cache
        if let Ok(Some(record)) = self.index.get(resource.id()).await {
            if record.satisfies(options.storage_priority) {
                let index = Arc::clone(&self.index);
                let id = resource.id().to_string();
                tokio::spawn(async move {
                    let _ = index.touch(&id).await;
                });
                return None;
            }
            // Upgrade in place; no re-download
            let index = Arc::clone(&self.index);
            let id = resource.id().to_string();
            let priority = options.storage_priority;
            tokio::spawn(async move {
                if let Err(e) = index.upgrade_priority(&id, priority).await {
                    tracing::warn!(
                        target: "fetchkit.engine",
                        id = %id,
                        error = %e,
                        "Storage-priority upgrade failed"
                    );
                }
            });
            return None;
        }

        let selection = self.policy.first_downloadable(resource);
        let request = DownloadRequest::new(resource.id(), resource.id());

        // A location no URL parser accepts can never reach a processor
        if Url::parse(selection.mirror.location()).is_err() {
            self.reject_unsupported(resource, &selection.mirror, options);
            return Some(request);
        }

        let downloadable = Arc::new(Downloadable::new(
            resource.id(),
            selection.mirror,
            options.download_priority,
        ));
        let queue_kind = if options.download_priority == DownloadPriority::High
            && self.priority_queue.is_some()
        {
            QueueKind::Priority
        } else {
            QueueKind::Normal
        };
        let admit_now = self.is_active();

        {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.entry(resource.id().to_string()) {
                Entry::Occupied(mut entry) => {
                    // A concurrent request won the race; attach to it
                    entry.get_mut().upgrade_storage_priority(options.storage_priority);
                    return Some(entry.get().request.clone());
                }
                Entry::Vacant(entry) => {
                    let mut task = DownloadTask::new(
                        resource.clone(),
                        request.clone(),
                        Arc::clone(&downloadable),
                        selection.remaining,
                        self.policy.initial_retries(),
                        options,
                        queue_kind,
                    );
                    task.admitted = admit_now;
                    entry.insert(task);
                }
            }
        }

        tracing::info!(
            target: "fetchkit.engine",
            id = resource.id(),
            priority = %options.download_priority,
            storage = %options.storage_priority,
            admitted = admit_now,
            "Task created"
        );

        if admit_now {
            self.queue_for(queue_kind).enqueue(downloadable);
        }
        Some(request)
    }

    async fn admit_precached(
        &self,
        resource: &Resource,
        file_url: PathBuf,
        options: RequestOptions,
    ) {
        let size = tokio::fs::metadata(&file_url)
            .await
            .map(|metadata| metadata.len())
            .unwrap_or(0);

        let success = match self
            .index
            .put(resource.id(), &file_url, options.storage_priority, size)
            .await
        {
            Ok(_) => {
                self.memory.store(
                    resource.id(),
                    file_url,
                    Some(resource.main().location()),
                    None,
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    target: "fetchkit.engine",
                    id = resource.id(),
                    error = %e,
                    "Synthesized cache insert failed for pre-materialized resource"
                );
                false
            }
        };

        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let id = resource.id().to_string();
        tokio::spawn(async move {
            manager.fire_completions(&id, success);
        });
    }

    fn reject_unsupported(
        &self,
        resource: &Resource,
        mirror: &FileMirror,
        options: RequestOptions,
    ) {
        tracing::warn!(
            target: "fetchkit.engine",
            id = resource.id(),
            location = mirror.location(),
            "Rejecting request: location is not a parseable URL"
        );

        let snapshot = TaskSnapshot {
            resource_id: resource.id().to_string(),
            mirror_id: mirror.id().to_string(),
            mirror_location: mirror.location().to_string(),
            attempt: 1,
            remaining_mirrors: 0,
            download_priority: options.download_priority,
        };
        let error = DownloadError::unsupported_scheme(mirror.location());
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let id = resource.id().to_string();
        tokio::spawn(async move {
            manager.notify_finished(&snapshot, Some(&error)).await;
            manager.fire_completions(&id, false);
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────────────

    async fn cancel_resource(&self, resource_id: &str) {
        let admitted_kind = {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.get_mut(resource_id) else {
                return;
            };
            if task.cancelled {
                return;
            }
            task.cancelled = true;
            task.admitted.then_some(task.queue_kind)
        };

        match admitted_kind {
            Some(queue_kind) => {
                // The terminal event flows back through the queue observer
                self.queue_for(queue_kind).cancel(resource_id).await;
            }
            None => {
                // Never admitted; terminate directly
                let snapshot = {
                    let mut tasks = self.tasks.lock().unwrap();
                    tasks.remove(resource_id).map(|task| {
                        task.current.cancel();
                        task.snapshot()
                    })
                };
                if let Some(snapshot) = snapshot {
                    self.notify_finished(&snapshot, Some(&DownloadError::Cancelled))
                        .await;
                    self.fire_completions(resource_id, false);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Terminal handling
    // ─────────────────────────────────────────────────────────────────────

    async fn handle_success(&self, downloadable: &Arc<Downloadable>, temp_file: PathBuf) {
        let id = downloadable.identifier().to_string();

        let storage_priority = {
            let tasks = self.tasks.lock().unwrap();
            match tasks.get(&id) {
                Some(task) if Arc::ptr_eq(&task.current, downloadable) => {
                    Some(task.storage_priority)
                }
                _ => None,
            }
        };
        let Some(storage_priority) = storage_priority else {
            tracing::debug!(target: "fetchkit.engine", id = %id, "Ignoring stale success event");
            let _ = tokio::fs::remove_file(&temp_file).await;
            return;
        };

        let final_path = paths::cache_path(&self.config.cache_dir, &id);
        if let Err(error) = paths::commit_file(&temp_file, &final_path).await {
            tracing::warn!(
                target: "fetchkit.engine",
                id = %id,
                error = %error,
                "Cache commit failed; reclassifying as download failure"
            );
            self.handle_failure(downloadable, error).await;
            return;
        }

        let size = downloadable.transferred_bytes();
        if let Err(error) = self.index.put(&id, &final_path, storage_priority, size).await {
            tracing::warn!(
                target: "fetchkit.engine",
                id = %id,
                error = %error,
                "Index write failed; reclassifying as download failure"
            );
            self.handle_failure(downloadable, error).await;
            return;
        }

        let bytes = if size <= self.config.memory_cache.max_entry_bytes {
            tokio::fs::read(&final_path).await.ok()
        } else {
            None
        };
        self.memory
            .store(&id, final_path.clone(), Some(downloadable.location()), bytes);

        downloadable.mark_moved();
        downloadable.mark_finished();

        let snapshot = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.remove(&id).map(|task| task.snapshot())
        };
        let Some(snapshot) = snapshot else {
            return;
        };

        tracing::info!(
            target: "fetchkit.engine",
            id = %id,
            path = %final_path.display(),
            size,
            "Download completed"
        );
        self.notify_finished(&snapshot, None).await;
        self.fire_completions(&id, true);
    }

    async fn handle_failure(&self, downloadable: &Arc<Downloadable>, error: DownloadError) {
        let id = downloadable.identifier().to_string();
        let action = self.decide_failure(&id, downloadable, &error);

        match action {
            FailureAction::Stale => {
                tracing::debug!(target: "fetchkit.engine", id = %id, "Ignoring stale failure event");
            }
            FailureAction::Finish(snapshot, final_error) => {
                tracing::warn!(
                    target: "fetchkit.engine",
                    id = %id,
                    error = %final_error,
                    "Download failed terminally"
                );
                self.notify_finished(&snapshot, Some(&final_error)).await;
                self.fire_completions(&id, false);
            }
            FailureAction::Retry {
                snapshot,
                failed,
                next,
                next_downloadable,
                queue_kind,
            } => {
                tracing::info!(
                    target: "fetchkit.engine",
                    id = %id,
                    failed_mirror = failed.id(),
                    next_mirror = next.id(),
                    attempt = snapshot.attempt,
                    error = %error,
                    "Retrying with next mirror"
                );
                self.notify_retry(&snapshot, &failed, &next, &error).await;
                self.queue_for(queue_kind).enqueue_retry(next_downloadable);
            }
        }
    }

    fn decide_failure(
        &self,
        id: &str,
        downloadable: &Arc<Downloadable>,
        error: &DownloadError,
    ) -> FailureAction {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(id) else {
            return FailureAction::Stale;
        };
        if !Arc::ptr_eq(&task.current, downloadable) {
            return FailureAction::Stale;
        }

        if task.cancelled || error.is_cancelled() {
            let Some(removed) = tasks.remove(id) else {
                return FailureAction::Stale;
            };
            return FailureAction::Finish(removed.snapshot(), DownloadError::Cancelled);
        }

        if !error.is_retryable() {
            let Some(removed) = tasks.remove(id) else {
                return FailureAction::Stale;
            };
            return FailureAction::Finish(removed.snapshot(), error.clone());
        }

        let failed = task.current.mirror().clone();
        let next = self.policy.next_downloadable(
            &task.resource,
            &failed,
            &mut task.remaining,
            &mut task.retries_left,
        );

        match next {
            Some(next_mirror) => {
                task.attempt += 1;
                let next_downloadable = Arc::new(Downloadable::new(
                    id,
                    next_mirror.clone(),
                    task.download_priority,
                ));
                task.current = Arc::clone(&next_downloadable);
                FailureAction::Retry {
                    snapshot: task.snapshot(),
                    failed,
                    next: next_mirror,
                    next_downloadable,
                    queue_kind: task.queue_kind,
                }
            }
            None => {
                let attempts = task.attempt;
                let Some(removed) = tasks.remove(id) else {
                    return FailureAction::Stale;
                };
                FailureAction::Finish(
                    removed.snapshot(),
                    DownloadError::mirrors_exhausted(id, attempts),
                )
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Fan-out
    // ─────────────────────────────────────────────────────────────────────

    fn fire_completions(&self, resource_id: &str, success: bool) {
        let handlers = self
            .completions
            .lock()
            .unwrap()
            .remove(resource_id)
            .unwrap_or_default();
        for handler in handlers {
            handler(success, resource_id);
        }
    }

    fn observer_list(&self) -> Vec<Arc<dyn ResourceObserver>> {
        self.observers
            .lock()
            .unwrap()
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    async fn notify_started(&self, snapshot: &TaskSnapshot) {
        for observer in self.observer_list() {
            observer.did_start_downloading(snapshot).await;
        }
    }

    async fn notify_retry(
        &self,
        snapshot: &TaskSnapshot,
        failed: &FileMirror,
        next: &FileMirror,
        error: &DownloadError,
    ) {
        for observer in self.observer_list() {
            observer
                .will_retry_failed_download(snapshot, failed, next, error)
                .await;
        }
    }

    async fn notify_finished(&self, snapshot: &TaskSnapshot, error: Option<&DownloadError>) {
        for observer in self.observer_list() {
            observer.did_finish_download(snapshot, error).await;
        }
    }

    fn queue_for(&self, kind: QueueKind) -> &Arc<DownloadQueue> {
        match kind {
            QueueKind::Priority => self.priority_queue.as_ref().unwrap_or(&self.queue),
            QueueKind::Normal => &self.queue,
        }
    }
}

#[async_trait]
impl QueueObserver for ResourceManager {
    async fn download_started(&self, downloadable: &Arc<Downloadable>) {
        let snapshot = {
            let tasks = self.tasks.lock().unwrap();
            tasks
                .get(downloadable.identifier())
                .filter(|task| Arc::ptr_eq(&task.current, downloadable))
                .map(DownloadTask::snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.notify_started(&snapshot).await;
        }
    }

    async fn download_finished(
        &self,
        downloadable: &Arc<Downloadable>,
        outcome: Result<PathBuf, DownloadError>,
    ) {
        match outcome {
            Ok(temp_file) => self.handle_success(downloadable, temp_file).await,
            Err(error) => self.handle_failure(downloadable, error).await,
        }
    }
}

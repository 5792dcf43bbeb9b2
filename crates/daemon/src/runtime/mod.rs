// Watch runtime: owns the resource table, derives lifecycle events from
// raw manifest FS events, and dispatches them to the reconciler with
// bounded concurrency.
//
// All table mutation happens on the runtime loop; handlers run in
// spawned tasks against an index snapshot and report back over an
// internal channel. Events for one manifest run strictly in arrival
// order: at most one handler per manifest is in flight, later events
// wait in that manifest's queue until the loop sees the outcome.

pub mod manifest;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use dashsync_common::path::dashboard_rel_path;
use dashsync_common::types::{DashboardSpec, Resource, ResourceStatus, StatusPatch, UidIndex};
use dashsync_common::validate::extract_dashboard_meta;

use crate::config::Config;
use crate::metrics::SidecarMetrics;
use crate::reconciler::Reconciler;
use crate::store::FileStore;
use crate::watcher::{FsEventKind, ManifestWatcher, RawFsEvent};

const LOOP_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub max_workers: usize,
    pub reconcile_interval: Duration,
    pub reconcile_delay: Duration,
}

impl From<&Config> for RuntimeOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_workers: config.max_workers,
            reconcile_interval: config.reconcile_interval(),
            reconcile_delay: config.reconcile_delay(),
        }
    }
}

/// Lifecycle event derived from the resource table, ready for dispatch.
#[derive(Debug)]
enum Planned {
    Create { resource: Resource },
    Update { resource: Resource, old_spec: DashboardSpec },
    Delete { resource: Resource },
    Reconcile { resource: Resource },
}

impl Planned {
    /// Relative dashboard paths this event touches, sorted for a stable
    /// lock acquisition order.
    fn file_lock_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self {
            Self::Create { resource } | Self::Delete { resource } | Self::Reconcile { resource } => {
                rel_key(&resource.spec).into_iter().collect()
            }
            Self::Update { resource, old_spec } => rel_key(old_spec)
                .into_iter()
                .chain(rel_key(&resource.spec))
                .collect(),
        };
        keys.sort();
        keys.dedup();
        keys
    }
}

fn rel_key(spec: &DashboardSpec) -> Option<String> {
    dashboard_rel_path(&spec.dir, &spec.name).ok()
}

/// Messages delivered back to the runtime loop from spawned tasks.
#[derive(Debug)]
enum LoopMsg {
    /// A resource's periodic divergence check is due.
    ReconcileDue(PathBuf),
    /// A handler finished; `patch` is the status it wants persisted.
    Outcome { path: PathBuf, patch: Option<StatusPatch> },
}

/// Named async mutexes handed out by key, shared across spawned tasks.
#[derive(Debug, Default)]
struct LockRegistry {
    locks: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

impl LockRegistry {
    fn lock_for(&self, key: &str) -> Arc<TokioMutex<()>> {
        let mut guard = self.locks.lock().expect("lock registry poisoned");
        guard.entry(key.to_string()).or_default().clone()
    }

    /// Drop mutexes no task currently holds, so the map does not grow
    /// without bound under manifest churn.
    fn evict_idle(&self) {
        let mut guard = self.locks.lock().expect("lock registry poisoned");
        guard.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn size(&self) -> usize {
        self.locks.lock().expect("lock registry poisoned").len()
    }
}

#[derive(Debug)]
struct ResourceEntry {
    resource: Resource,
    /// Embedded dashboard uid currently indexed for this resource.
    uid: Option<String>,
    first_seen: DateTime<Utc>,
    reconcile_task: JoinHandle<()>,
}

pub struct WatchRuntime {
    manifest_root: PathBuf,
    reconciler: Arc<Reconciler>,
    metrics: Arc<SidecarMetrics>,
    entries: HashMap<PathBuf, ResourceEntry>,
    uid_index: UidIndex,
    semaphore: Arc<Semaphore>,
    /// Per-manifest handler lanes: a key is present while a handler for
    /// that manifest is in flight; the queue holds events that arrived
    /// in the meantime, in order.
    inflight: HashMap<PathBuf, VecDeque<Planned>>,
    file_locks: LockRegistry,
    reconcile_interval: Duration,
    reconcile_delay: Duration,
    loop_tx: mpsc::Sender<LoopMsg>,
    loop_rx: Option<mpsc::Receiver<LoopMsg>>,
}

impl WatchRuntime {
    pub fn new(
        manifest_root: PathBuf,
        reconciler: Arc<Reconciler>,
        metrics: Arc<SidecarMetrics>,
        options: RuntimeOptions,
    ) -> Self {
        let (loop_tx, loop_rx) = mpsc::channel(LOOP_CHANNEL_CAPACITY);
        Self {
            manifest_root,
            reconciler,
            metrics,
            entries: HashMap::new(),
            uid_index: UidIndex::new(),
            semaphore: Arc::new(Semaphore::new(options.max_workers)),
            inflight: HashMap::new(),
            file_locks: LockRegistry::default(),
            reconcile_interval: options.reconcile_interval,
            reconcile_delay: options.reconcile_delay,
            loop_tx,
            loop_rx: Some(loop_rx),
        }
    }

    /// Run the event loop until the raw event channel closes or the
    /// shutdown channel fires. Scans the manifest directory first so
    /// resources present before startup are tracked.
    pub async fn run(
        mut self,
        mut raw_rx: mpsc::Receiver<RawFsEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut loop_rx =
            self.loop_rx.take().context("runtime already consumed its loop receiver")?;

        self.scan_existing()?;
        info!(
            path = %self.manifest_root.display(),
            resources = self.entries.len(),
            "watch runtime started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("watch runtime shutting down");
                    break;
                }

                maybe_event = raw_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_raw_event(event),
                        None => {
                            info!("raw event channel closed, runtime exiting");
                            break;
                        }
                    }
                }

                maybe_msg = loop_rx.recv() => {
                    if let Some(msg) = maybe_msg {
                        self.handle_loop_msg(msg);
                    }
                }
            }
        }

        for entry in self.entries.values() {
            entry.reconcile_task.abort();
        }
        Ok(())
    }

    fn scan_existing(&mut self) -> Result<()> {
        let dir = std::fs::read_dir(&self.manifest_root).with_context(|| {
            format!("failed to scan manifest directory `{}`", self.manifest_root.display())
        })?;
        for dirent in dir {
            let path = dirent.context("failed to read manifest directory entry")?.path();
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if !is_json || !path.is_file() {
                continue;
            }
            match manifest::load_manifest(&path) {
                Ok(loaded) => self.upsert(path, loaded),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping unreadable manifest");
                }
            }
        }
        Ok(())
    }

    fn handle_raw_event(&mut self, event: RawFsEvent) {
        match event.kind {
            FsEventKind::Create | FsEventKind::Modify => {
                match manifest::load_manifest(&event.path) {
                    Ok(loaded) => self.upsert(event.path, loaded),
                    Err(error) => {
                        // A half-written or malformed manifest is left for
                        // the next modify event; the existing entry stays.
                        warn!(path = %event.path.display(), error = %error, "ignoring unreadable manifest");
                    }
                }
            }
            FsEventKind::Remove => self.remove(event.path),
        }
    }

    fn upsert(&mut self, path: PathBuf, loaded: manifest::Manifest) {
        let planned = if let Some(entry) = self.entries.get_mut(&path) {
            if entry.resource.spec == loaded.spec {
                trace!(path = %path.display(), "manifest unchanged, ignoring event");
                return;
            }
            // The handler sees the last applied status, not whatever the
            // file carries; self-healing depends on it.
            let old_spec = std::mem::replace(&mut entry.resource.spec, loaded.spec);
            Planned::Update { resource: entry.resource.clone(), old_spec }
        } else {
            let id = loaded.id.unwrap_or_else(Uuid::new_v4);
            let resource = Resource { id, spec: loaded.spec, status: loaded.status };
            let already_handled = resource.status.state.is_some();
            let first_seen = Utc::now();
            let reconcile_task = self.spawn_reconcile_timer(path.clone());
            self.entries.insert(
                path.clone(),
                ResourceEntry { resource: resource.clone(), uid: None, first_seen, reconcile_task },
            );
            if already_handled {
                // Seen in a previous run of the daemon: verify instead of
                // re-creating.
                info!(id = %resource.id, path = %path.display(), "adopted resource with existing status");
                Planned::Reconcile { resource }
            } else {
                info!(id = %resource.id, path = %path.display(), "tracking new resource");
                Planned::Create { resource }
            }
        };

        self.reindex(&path);
        self.refresh_gauges();
        self.dispatch(path, planned);
    }

    fn remove(&mut self, path: PathBuf) {
        let Some(entry) = self.entries.remove(&path) else {
            return;
        };
        entry.reconcile_task.abort();
        if let Some(uid) = &entry.uid {
            self.uid_index.remove(uid, &entry.resource.id);
        }
        info!(
            id = %entry.resource.id,
            path = %path.display(),
            first_seen = %entry.first_seen.to_rfc3339(),
            "resource deleted"
        );
        self.refresh_gauges();
        self.dispatch(path, Planned::Delete { resource: entry.resource });
    }

    /// Bring the uid index in line with the entry's current payload.
    fn reindex(&mut self, path: &Path) {
        let Some(entry) = self.entries.get_mut(path) else {
            return;
        };
        let new_uid = extract_dashboard_meta(&entry.resource.spec.json).ok().map(|meta| meta.uid);
        if entry.uid == new_uid {
            return;
        }
        if let Some(old) = entry.uid.take() {
            self.uid_index.remove(&old, &entry.resource.id);
        }
        if let Some(uid) = new_uid {
            self.uid_index.insert(uid.clone(), entry.resource.id);
            entry.uid = Some(uid);
        }
    }

    fn refresh_gauges(&self) {
        self.metrics.set_resources(self.entries.len() as u64);
        let mut counts: HashMap<String, u64> = HashMap::new();
        for entry in self.entries.values() {
            let reason = &entry.resource.status.reason;
            if !reason.is_empty() {
                *counts.entry(reason.clone()).or_insert(0) += 1;
            }
        }
        self.metrics.set_resource_errors(counts);
    }

    /// Hand the event to the manifest's lane. If a handler for this
    /// manifest is already in flight the event queues behind it; the
    /// loop starts it when the outcome comes back. A later event can
    /// therefore never overtake an earlier one for the same manifest.
    fn dispatch(&mut self, path: PathBuf, planned: Planned) {
        match self.inflight.get_mut(&path) {
            Some(queue) => queue.push_back(planned),
            None => {
                self.inflight.insert(path.clone(), VecDeque::new());
                self.spawn_handler(path, planned);
            }
        }
    }

    /// Run the handler in a spawned task: bounded by the worker
    /// semaphore and holding the locks for every dashboard path the
    /// event touches. The index snapshot is taken here, when the event
    /// actually starts, not when it was queued.
    fn spawn_handler(&self, path: PathBuf, planned: Planned) {
        let reconciler = self.reconciler.clone();
        let uid_index = self.uid_index.clone();
        let semaphore = self.semaphore.clone();
        let file_locks: Vec<_> = planned
            .file_lock_keys()
            .iter()
            .map(|key| self.file_locks.lock_for(key))
            .collect();
        let tx = self.loop_tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let mut file_guards = Vec::with_capacity(file_locks.len());
            for lock in &file_locks {
                file_guards.push(lock.lock().await);
            }

            let outcome = match &planned {
                Planned::Create { resource } => reconciler.on_create(resource, &uid_index),
                Planned::Update { resource, old_spec } => {
                    reconciler.on_update(resource, old_spec, &uid_index)
                }
                Planned::Delete { resource } => reconciler.on_delete(resource),
                Planned::Reconcile { resource } => reconciler.on_reconcile(resource, &uid_index),
            };

            let patch = outcome.patch().cloned();
            if tx.send(LoopMsg::Outcome { path, patch }).await.is_err() {
                debug!("runtime loop gone, dropping handler outcome");
            }
        });
    }

    fn handle_loop_msg(&mut self, msg: LoopMsg) {
        match msg {
            LoopMsg::ReconcileDue(path) => {
                if let Some(resource) = self.entries.get(&path).map(|e| e.resource.clone()) {
                    trace!(id = %resource.id, "periodic check due");
                    self.dispatch(path, Planned::Reconcile { resource });
                }
            }
            LoopMsg::Outcome { path, patch } => {
                self.apply_outcome(&path, patch);
                self.advance_lane(path);
                self.file_locks.evict_idle();
            }
        }
    }

    /// Persist a handler's status patch into the manifest and the entry.
    /// The write echoes back through the watcher as a modify event and
    /// is discarded by `upsert` as spec-identical.
    fn apply_outcome(&mut self, path: &Path, patch: Option<StatusPatch>) {
        let Some(patch) = patch else {
            return;
        };
        let Some(entry) = self.entries.get_mut(path) else {
            // Resource vanished while the handler ran.
            return;
        };
        let next = ResourceStatus { state: Some(patch.state), reason: patch.reason.clone() };
        if entry.resource.status == next {
            return;
        }
        entry.resource.status = next;

        if let Err(error) = manifest::apply_status_patch(path, &patch) {
            warn!(path = %path.display(), error = %error, "failed to persist status patch");
        }
        self.refresh_gauges();
    }

    /// Start the next queued event for this manifest, or retire the
    /// lane when the queue is empty.
    fn advance_lane(&mut self, path: PathBuf) {
        let next = match self.inflight.get_mut(&path) {
            Some(queue) => queue.pop_front(),
            None => return,
        };
        match next {
            Some(planned) => self.spawn_handler(path, planned),
            None => {
                self.inflight.remove(&path);
            }
        }
    }

    fn spawn_reconcile_timer(&self, path: PathBuf) -> JoinHandle<()> {
        let tx = self.loop_tx.clone();
        let delay = self.reconcile_delay;
        let interval = self.reconcile_interval;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                if tx.send(LoopMsg::ReconcileDue(path.clone())).await.is_err() {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}

/// Wire the manifest watcher to a fresh runtime and run it to
/// completion. This is the daemon's main loop.
pub async fn run(
    config: &Config,
    metrics: Arc<SidecarMetrics>,
    shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let store = FileStore::open(&config.working_dir)
        .with_context(|| format!("failed to open working directory `{}`", config.working_dir.display()))?;
    let reconciler = Arc::new(Reconciler::new(store, metrics.clone()));

    let (watcher, raw_rx) = ManifestWatcher::start(&config.manifest_dir)?;
    // The watcher canonicalizes its root; key the table the same way so
    // scan results and live events agree.
    let runtime = WatchRuntime::new(
        watcher.root().to_path_buf(),
        reconciler,
        metrics,
        RuntimeOptions::from(config),
    );

    let result = runtime.run(raw_rx, shutdown).await;
    drop(watcher);
    result
}

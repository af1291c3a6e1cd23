//! Watch dispatcher
//!
//! Three independent loops watch Elasticsearch, Snapshot and DormantDatabase
//! objects. Each loop keeps its own cache, turns raw watcher output into
//! typed add/update/delete events, re-delivers the cache on a fixed resync
//! period and handles its events one at a time, so a single object is never
//! reconciled concurrently.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};

use crate::controller::Reconciler;
use crate::controller::error::Result;
use crate::crd::{DatabasePhase, DormantDatabase, Elasticsearch, Snapshot};
use crate::health::Metrics;
use crate::resources::common::kind_selector;

/// Kind of change observed on a watched object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchAction {
    Add,
    Update,
    Delete,
}

impl WatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchAction::Add => "add",
            WatchAction::Update => "update",
            WatchAction::Delete => "delete",
        }
    }
}

impl fmt::Display for WatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to one object of a watched kind
#[derive(Clone, Debug)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    /// `old` and `new` are the same object on a resync
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

impl<K> ResourceEvent<K> {
    pub fn action(&self) -> WatchAction {
        match self {
            ResourceEvent::Added(_) => WatchAction::Add,
            ResourceEvent::Updated { .. } => WatchAction::Update,
            ResourceEvent::Deleted(_) => WatchAction::Delete,
        }
    }

    /// Latest known state of the object
    pub fn object(&self) -> &K {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Deleted(obj) => obj,
            ResourceEvent::Updated { new, .. } => new,
        }
    }
}

/// Watch events of all three kinds, decoded at the stream boundary
#[derive(Clone, Debug)]
pub enum OperatorEvent {
    Instance(ResourceEvent<Elasticsearch>),
    Snapshot(ResourceEvent<Snapshot>),
    Dormant(ResourceEvent<DormantDatabase>),
}

impl OperatorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OperatorEvent::Instance(_) => "Elasticsearch",
            OperatorEvent::Snapshot(_) => "Snapshot",
            OperatorEvent::Dormant(_) => "DormantDatabase",
        }
    }

    pub fn action(&self) -> WatchAction {
        match self {
            OperatorEvent::Instance(e) => e.action(),
            OperatorEvent::Snapshot(e) => e.action(),
            OperatorEvent::Dormant(e) => e.action(),
        }
    }
}

/// What the dispatcher does with an event
#[derive(Debug)]
pub enum Route<'a> {
    Create(&'a Elasticsearch),
    Update {
        old: &'a Elasticsearch,
        new: &'a Elasticsearch,
    },
    Pause(&'a Elasticsearch),
    Snapshot(WatchAction, &'a Snapshot),
    ReleaseSecrets(&'a DormantDatabase),
    Ignore,
}

/// Decide how an event is handled
///
/// Adds of already stamped instances are replays and updates without a spec
/// change carry nothing to reconcile. Deletes always pause.
pub fn route(event: &OperatorEvent) -> Route<'_> {
    match event {
        OperatorEvent::Instance(ResourceEvent::Added(es)) => {
            if es.is_stamped() {
                Route::Ignore
            } else {
                Route::Create(es)
            }
        }
        OperatorEvent::Instance(ResourceEvent::Updated { old, new }) => {
            if old.spec == new.spec {
                Route::Ignore
            } else {
                Route::Update { old, new }
            }
        }
        OperatorEvent::Instance(ResourceEvent::Deleted(es)) => Route::Pause(es),
        OperatorEvent::Snapshot(e) => Route::Snapshot(e.action(), e.object()),
        OperatorEvent::Dormant(ResourceEvent::Deleted(ddb)) => Route::ReleaseSecrets(ddb),
        OperatorEvent::Dormant(_) => Route::Ignore,
    }
}

fn cache_key<K: Resource>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Last observed state of every object of one kind
pub struct ObjectCache<K> {
    objects: HashMap<String, Arc<K>>,
    relist: Option<HashMap<String, Arc<K>>>,
}

impl<K> Default for ObjectCache<K> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            relist: None,
        }
    }
}

impl<K: Resource> ObjectCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = &K> {
        self.objects.values().map(|obj| obj.as_ref())
    }

    fn insert(&mut self, obj: Arc<K>) -> ResourceEvent<K> {
        match self.objects.insert(cache_key(obj.as_ref()), obj.clone()) {
            Some(old) => ResourceEvent::Updated { old, new: obj },
            None => ResourceEvent::Added(obj),
        }
    }

    /// Fold one watcher event into the cache
    ///
    /// A relist is buffered until it completes; objects missing from it were
    /// deleted while the watch was down and come out as deletes.
    pub fn observe(&mut self, event: Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            Event::Apply(obj) => vec![self.insert(Arc::new(obj))],
            Event::Delete(obj) => {
                self.objects.remove(&cache_key(&obj));
                vec![ResourceEvent::Deleted(Arc::new(obj))]
            }
            Event::Init => {
                self.relist = Some(HashMap::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                self.relist
                    .get_or_insert_with(HashMap::new)
                    .insert(cache_key(&obj), Arc::new(obj));
                Vec::new()
            }
            Event::InitDone => {
                let listed = self.relist.take().unwrap_or_default();
                let vanished: Vec<String> = self
                    .objects
                    .keys()
                    .filter(|key| !listed.contains_key(*key))
                    .cloned()
                    .collect();

                let mut events = Vec::with_capacity(listed.len() + vanished.len());
                for key in vanished {
                    if let Some(obj) = self.objects.remove(&key) {
                        events.push(ResourceEvent::Deleted(obj));
                    }
                }
                for obj in listed.into_values() {
                    events.push(self.insert(obj));
                }
                events
            }
        }
    }

    /// Re-deliver every cached object as an update onto itself
    pub fn resync(&self) -> Vec<ResourceEvent<K>> {
        self.objects
            .values()
            .map(|obj| ResourceEvent::Updated {
                old: obj.clone(),
                new: obj.clone(),
            })
            .collect()
    }
}

/// A kind the dispatcher watches
pub trait Watched:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    fn wrap(event: ResourceEvent<Self>) -> OperatorEvent;

    /// Refresh gauges derived from the cache
    fn observe_cache(_cache: &ObjectCache<Self>, _metrics: &Metrics) {}
}

impl Watched for Elasticsearch {
    fn wrap(event: ResourceEvent<Self>) -> OperatorEvent {
        OperatorEvent::Instance(event)
    }

    fn observe_cache(cache: &ObjectCache<Self>, metrics: &Metrics) {
        for (label, count) in phase_counts(cache.objects()) {
            metrics.set_instances_by_phase(label, count);
        }
    }
}

impl Watched for Snapshot {
    fn wrap(event: ResourceEvent<Self>) -> OperatorEvent {
        OperatorEvent::Snapshot(event)
    }
}

impl Watched for DormantDatabase {
    fn wrap(event: ResourceEvent<Self>) -> OperatorEvent {
        OperatorEvent::Dormant(event)
    }
}

/// Number of instances per phase; instances without a phase count as `Pending`
pub fn phase_counts<'a>(
    instances: impl Iterator<Item = &'a Elasticsearch>,
) -> Vec<(&'static str, i64)> {
    let mut counts = [
        ("Pending", 0),
        ("Creating", 0),
        ("Initializing", 0),
        ("Running", 0),
    ];
    for es in instances {
        let slot = match es.phase() {
            None => 0,
            Some(DatabasePhase::Creating) => 1,
            Some(DatabasePhase::Initializing) => 2,
            Some(DatabasePhase::Running) => 3,
        };
        counts[slot].1 += 1;
    }
    counts.to_vec()
}

/// Routes events to the reconciler and the snapshot handler
pub struct Dispatcher {
    reconciler: Reconciler,
}

impl Dispatcher {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn metrics(&self) -> Option<&Metrics> {
        self.reconciler
            .context()
            .health_state
            .as_deref()
            .map(|state| &state.metrics)
    }

    /// Handle one event to completion
    pub async fn dispatch(&self, event: OperatorEvent) {
        let kind = event.kind();
        let action = event.action();

        let result = match route(&event) {
            Route::Ignore => {
                debug!(kind, %action, "ignoring event");
                return;
            }
            routed => {
                let start = Instant::now();
                let result = self.handle(routed).await;
                if let Some(metrics) = self.metrics() {
                    metrics.record_event(kind, action.as_str(), start.elapsed().as_secs_f64());
                }
                result
            }
        };

        if let Err(e) = result {
            if let Some(metrics) = self.metrics() {
                metrics.record_error(kind, action.as_str());
            }
            // The next event or resync for the object retries
            if e.is_not_found() {
                debug!(kind, %action, error = %e, "object no longer exists");
            } else if e.is_conflict() || !e.is_retryable() {
                warn!(kind, %action, error = %e, "event needs operator attention");
            } else {
                error!(kind, %action, error = %e, "event handling failed");
            }
        }
    }

    async fn handle(&self, route: Route<'_>) -> Result<()> {
        match route {
            Route::Create(es) => self.reconciler.create(es).await,
            Route::Update { old, new } => self.reconciler.update(old, new).await,
            Route::Pause(es) => self.reconciler.pause(es).await,
            Route::Snapshot(action, snapshot) => {
                self.reconciler
                    .context()
                    .snapshots
                    .handle(action, snapshot)
                    .await
            }
            Route::ReleaseSecrets(ddb) => self.reconciler.on_dormant_deleted(ddb).await,
            Route::Ignore => Ok(()),
        }
    }
}

/// Watch one kind until the stream ends
///
/// Events are handled in arrival order. A resync tick re-delivers the cache
/// between events, never in the middle of handling one.
pub async fn run_watch<K: Watched>(
    api: Api<K>,
    config: watcher::Config,
    sync_period: Duration,
    dispatcher: Arc<Dispatcher>,
) {
    let kind = K::kind(&()).to_string();
    info!(%kind, "starting watch");

    let mut stream = watcher::watcher(api, config).default_backoff().boxed();
    let mut cache: ObjectCache<K> = ObjectCache::new();
    let mut resync = interval_at(Instant::now() + sync_period, sync_period);

    loop {
        let events = tokio::select! {
            _ = resync.tick() => {
                debug!(%kind, objects = cache.len(), "resync");
                cache.resync()
            }
            item = stream.next() => match item {
                Some(Ok(event)) => cache.observe(event),
                Some(Err(e)) => {
                    warn!(%kind, error = %e, "watch error, retrying with backoff");
                    continue;
                }
                None => break,
            }
        };

        for event in events {
            dispatcher.dispatch(K::wrap(event)).await;
        }
        if let Some(metrics) = dispatcher.metrics() {
            K::observe_cache(&cache, metrics);
        }
    }

    error!(%kind, "watch stream ended unexpectedly");
}

/// Run the three watch loops as independent tasks
///
/// Instances are watched cluster-wide; Snapshots and DormantDatabases only
/// when labeled with this database kind. Returns once every loop has ended.
pub async fn run_watchers(client: Client, dispatcher: Arc<Dispatcher>) {
    let sync_period = dispatcher.reconciler.context().config.sync_period;
    let selector = kind_selector();
    let filtered = watcher::Config::default().labels(&selector);

    let loops = [
        tokio::spawn(run_watch(
            Api::<Elasticsearch>::all(client.clone()),
            watcher::Config::default(),
            sync_period,
            dispatcher.clone(),
        )),
        tokio::spawn(run_watch(
            Api::<Snapshot>::all(client.clone()),
            filtered.clone(),
            sync_period,
            dispatcher.clone(),
        )),
        tokio::spawn(run_watch(
            Api::<DormantDatabase>::all(client),
            filtered,
            sync_period,
            dispatcher,
        )),
    ];

    for result in futures::future::join_all(loops).await {
        if let Err(e) = result {
            error!(error = %e, "watch loop panicked");
        }
    }
}

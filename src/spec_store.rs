//! The live ruleset snapshot and the machinery that keeps it fresh.
//!
//! [`SpecStore`] owns two independent polling loops (rulesets and ID lists) plus the initial
//! fan-in across data adapter, bootstrap values, and the network. The snapshot itself is
//! immutable and replaced wholesale, so readers never observe a partially applied sync: an
//! evaluator clones the `Arc` once and works against a consistent view.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::join_all;

use crate::data_adapter::{DataAdapter, DataAdapterKey};
use crate::diagnostics::{self, Marker, MarkerKey, MarkerObserver, NoopMarkerObserver};
use crate::id_lists::{self, IdList, LookupEntry};
use crate::poller::{Poller, PollerConfig};
use crate::spec_types::{ConfigSpec, SpecsResponse};
use crate::specs_fetcher::SpecsFetcher;
use crate::{Error, Result};

/// A sustained sync outage older than this is surfaced as a warning, and a timer that has
/// not ticked within `max(SYNC_OUTDATED_MAX, period)` is considered dead by the watchdog.
pub const SYNC_OUTDATED_MAX: Duration = Duration::from_millis(120_000);

/// The source that first populated the store, then `Network` once a network sync lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitReason {
    Uninitialized,
    Network,
    Bootstrap,
    DataAdapter,
}

/// How ID lists are brought up during `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdListsInit {
    /// Do not hydrate ID lists at init; the polling loop will.
    None,
    /// Defer the first hydration to the first scheduler tick.
    Lazy,
    /// Hydrate synchronously before `init` returns.
    #[default]
    Sync,
}

/// One immutable view of every spec the server has authored.
#[derive(Debug, Default)]
pub struct SpecsSnapshot {
    pub gates: HashMap<String, ConfigSpec>,
    pub configs: HashMap<String, ConfigSpec>,
    pub layers: HashMap<String, ConfigSpec>,
    /// Inverse of the server's layer → experiments mapping.
    pub experiment_to_layer: HashMap<String, String>,
    pub client_sdk_key_to_app: HashMap<String, String>,
    pub sampling_rates: HashMap<String, u64>,
    pub last_update_time: u64,
}

/// Configuration for [`SpecStore`].
#[derive(Debug, Clone)]
pub struct SpecStoreConfig {
    /// Interval between ruleset syncs. Defaults to
    /// [`SpecStoreConfig::DEFAULT_RULESETS_SYNC_INTERVAL`].
    pub rulesets_sync_interval: Duration,
    /// Interval between ID-list syncs. Defaults to
    /// [`SpecStoreConfig::DEFAULT_ID_LISTS_SYNC_INTERVAL`].
    pub id_lists_sync_interval: Duration,
    /// Jitter applied to both sync intervals.
    pub sync_jitter: Duration,
    /// Cap on the network fetch during `init` only; steady-state polls are uncapped.
    pub init_timeout: Duration,
    /// Serialized specs payload to apply when no adapter value is available.
    pub bootstrap_values: Option<String>,
    pub id_lists_init: IdListsInit,
}

impl SpecStoreConfig {
    /// Default value for [`SpecStoreConfig::rulesets_sync_interval`].
    pub const DEFAULT_RULESETS_SYNC_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`SpecStoreConfig::id_lists_sync_interval`].
    pub const DEFAULT_ID_LISTS_SYNC_INTERVAL: Duration = Duration::from_secs(60);
    /// Default value for [`SpecStoreConfig::sync_jitter`].
    pub const DEFAULT_SYNC_JITTER: Duration = Duration::from_secs(1);
    /// Default value for [`SpecStoreConfig::init_timeout`].
    pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Create a new `SpecStoreConfig` using default configuration.
    pub fn new() -> SpecStoreConfig {
        SpecStoreConfig::default()
    }

    /// Update the ruleset sync interval.
    pub fn with_rulesets_sync_interval(mut self, interval: Duration) -> SpecStoreConfig {
        self.rulesets_sync_interval = interval;
        self
    }

    /// Update the ID-list sync interval.
    pub fn with_id_lists_sync_interval(mut self, interval: Duration) -> SpecStoreConfig {
        self.id_lists_sync_interval = interval;
        self
    }

    /// Update the sync jitter.
    pub fn with_sync_jitter(mut self, jitter: Duration) -> SpecStoreConfig {
        self.sync_jitter = jitter;
        self
    }

    /// Update the init network timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> SpecStoreConfig {
        self.init_timeout = timeout;
        self
    }

    /// Provide bootstrap values to apply at init when the adapter has nothing.
    pub fn with_bootstrap_values(mut self, values: impl Into<String>) -> SpecStoreConfig {
        self.bootstrap_values = Some(values.into());
        self
    }

    /// Update the ID-list init strategy.
    pub fn with_id_lists_init(mut self, strategy: IdListsInit) -> SpecStoreConfig {
        self.id_lists_init = strategy;
        self
    }
}

impl Default for SpecStoreConfig {
    fn default() -> SpecStoreConfig {
        SpecStoreConfig {
            rulesets_sync_interval: SpecStoreConfig::DEFAULT_RULESETS_SYNC_INTERVAL,
            id_lists_sync_interval: SpecStoreConfig::DEFAULT_ID_LISTS_SYNC_INTERVAL,
            sync_jitter: SpecStoreConfig::DEFAULT_SYNC_JITTER,
            init_timeout: SpecStoreConfig::DEFAULT_INIT_TIMEOUT,
            bootstrap_values: None,
            id_lists_init: IdListsInit::default(),
        }
    }
}

pub struct SpecStore {
    fetcher: Arc<dyn SpecsFetcher>,
    adapter: Option<Arc<dyn DataAdapter>>,
    observer: Arc<dyn MarkerObserver>,
    config: SpecStoreConfig,
    snapshot: RwLock<Arc<SpecsSnapshot>>,
    id_lists: RwLock<HashMap<String, IdList>>,
    init_reason: RwLock<InitReason>,
    /// `last_update_time` right after init, or -1 if init produced no snapshot.
    initial_update_time: AtomicI64,
    rulesets_failures: AtomicU32,
    id_lists_failures: AtomicU32,
    rulesets_poller: Mutex<Option<Poller>>,
    id_lists_poller: Mutex<Option<Poller>>,
    adapter_shut_down: AtomicBool,
}

impl SpecStore {
    pub fn new(
        fetcher: Arc<dyn SpecsFetcher>,
        adapter: Option<Arc<dyn DataAdapter>>,
        config: SpecStoreConfig,
    ) -> SpecStore {
        SpecStore {
            fetcher,
            adapter,
            observer: Arc::new(NoopMarkerObserver),
            config,
            snapshot: RwLock::new(Arc::new(SpecsSnapshot::default())),
            id_lists: RwLock::new(HashMap::new()),
            init_reason: RwLock::new(InitReason::Uninitialized),
            initial_update_time: AtomicI64::new(0),
            rulesets_failures: AtomicU32::new(0),
            id_lists_failures: AtomicU32::new(0),
            rulesets_poller: Mutex::new(None),
            id_lists_poller: Mutex::new(None),
            adapter_shut_down: AtomicBool::new(false),
        }
    }

    /// Attach a diagnostics observer.
    pub fn with_observer(mut self, observer: Arc<dyn MarkerObserver>) -> SpecStore {
        self.observer = observer;
        self
    }

    // ---- read side -------------------------------------------------------------------

    /// Clone the current snapshot reference. The returned value never changes under the
    /// caller; subsequent syncs publish new snapshots instead.
    pub fn current_snapshot(&self) -> Arc<SpecsSnapshot> {
        self.snapshot
            .read()
            .expect("thread holding snapshot lock should not panic")
            .clone()
    }

    pub fn get_gate(&self, name: &str) -> Option<ConfigSpec> {
        self.current_snapshot().gates.get(name).cloned()
    }

    pub fn get_config(&self, name: &str) -> Option<ConfigSpec> {
        self.current_snapshot().configs.get(name).cloned()
    }

    pub fn get_layer(&self, name: &str) -> Option<ConfigSpec> {
        self.current_snapshot().layers.get(name).cloned()
    }

    /// The layer an experiment belongs to, if any.
    pub fn layer_for_experiment(&self, experiment_name: &str) -> Option<String> {
        self.current_snapshot()
            .experiment_to_layer
            .get(experiment_name)
            .cloned()
    }

    pub fn app_id_for_client_key(&self, client_sdk_key: &str) -> Option<String> {
        self.current_snapshot()
            .client_sdk_key_to_app
            .get(client_sdk_key)
            .cloned()
    }

    pub fn get_id_list(&self, name: &str) -> Option<IdList> {
        self.id_lists
            .read()
            .expect("thread holding ID list lock should not panic")
            .get(name)
            .cloned()
    }

    /// Membership check against one ID list. An absent list means "not a member".
    pub fn id_list_contains(&self, name: &str, token: &str) -> bool {
        self.id_lists
            .read()
            .expect("thread holding ID list lock should not panic")
            .get(name)
            .is_some_and(|list| list.contains(token))
    }

    pub fn init_reason(&self) -> InitReason {
        *self
            .init_reason
            .read()
            .expect("thread holding init reason lock should not panic")
    }

    /// Whether the store has ever been populated and can serve real decisions.
    pub fn is_serving_checks(&self) -> bool {
        self.init_reason() != InitReason::Uninitialized
    }

    pub fn last_update_time(&self) -> u64 {
        self.current_snapshot().last_update_time
    }

    /// `last_update_time` as it stood when `init` returned, or -1 if init left the store
    /// empty.
    pub fn initial_update_time(&self) -> i64 {
        self.initial_update_time.load(Ordering::Relaxed)
    }

    // ---- lifecycle -------------------------------------------------------------------

    /// Populate the store and start both polling loops.
    ///
    /// Source precedence for rulesets is adapter, then bootstrap values, then the network;
    /// the first success wins. A total failure leaves the store in a not-serving state that
    /// a later successful sync repairs.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        self.observer.mark(Marker::start(MarkerKey::Overall));

        if let Some(adapter) = &self.adapter {
            if let Err(err) = adapter.initialize().await {
                log::warn!(target: "statsig", "data adapter failed to initialize: {err}");
            }
            match self.sync_rulesets_from_adapter().await {
                Ok(()) => {
                    self.set_init_reason(InitReason::DataAdapter);
                    if self.config.bootstrap_values.is_some() {
                        log::info!(target: "statsig",
                            "bootstrap values provided but the data adapter already populated the store; ignoring bootstrap");
                    }
                }
                Err(err) => {
                    log::debug!(target: "statsig", "unable to load rulesets from the data adapter: {err}");
                }
            }
        }

        if self.init_reason() == InitReason::Uninitialized {
            if let Some(bootstrap) = self.config.bootstrap_values.clone() {
                self.observer.mark(Marker::start(MarkerKey::Bootstrap));
                let applied = self.process_specs_payload(&bootstrap);
                match &applied {
                    Ok(_) if self.last_update_time() != 0 => {
                        self.set_init_reason(InitReason::Bootstrap);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        log::error!(target: "statsig", "invalid bootstrap values: {err}");
                    }
                }
                self.observer
                    .mark(Marker::end(MarkerKey::Bootstrap, applied.is_ok()));
            }
        }

        if self.init_reason() == InitReason::Uninitialized {
            match tokio::time::timeout(self.config.init_timeout, self.sync_rulesets_from_network())
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!(target: "statsig", "failed to initialize from the network: {err}");
                }
                Err(_) => {
                    log::error!(target: "statsig",
                        "failed to initialize from the network: timed out after {:?}",
                        self.config.init_timeout);
                }
            }
        }

        let last_update_time = self.last_update_time();
        self.initial_update_time.store(
            if last_update_time == 0 {
                -1
            } else {
                last_update_time as i64
            },
            Ordering::Relaxed,
        );

        match self.config.id_lists_init {
            IdListsInit::None | IdListsInit::Lazy => {}
            IdListsInit::Sync => {
                if let Err(err) = self.sync_id_lists().await {
                    log::error!(target: "statsig", "failed to initialize ID lists: {err}");
                }
            }
        }

        self.start_pollers();
        self.observer
            .mark(Marker::end(MarkerKey::Overall, self.is_serving_checks()));
        Ok(())
    }

    /// Stop both polling loops and shut the adapter down. In-flight ticks are abandoned;
    /// their side effects are harmless.
    pub fn shutdown(&self) {
        if let Some(poller) = self.take_poller(&self.rulesets_poller) {
            poller.abort();
        }
        if let Some(poller) = self.take_poller(&self.id_lists_poller) {
            poller.abort();
        }
        self.shutdown_adapter();
    }

    /// Stop both polling loops, waiting for any in-flight tick to finish, then shut the
    /// adapter down.
    pub async fn shutdown_async(&self) {
        let rulesets = self.take_poller(&self.rulesets_poller);
        let id_lists = self.take_poller(&self.id_lists_poller);
        if let Some(poller) = rulesets {
            poller.shutdown().await;
        }
        if let Some(poller) = id_lists {
            poller.shutdown().await;
        }
        self.shutdown_adapter();
    }

    fn shutdown_adapter(&self) {
        if self.adapter_shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(adapter) = &self.adapter {
            adapter.shutdown();
        }
    }

    fn take_poller(&self, slot: &Mutex<Option<Poller>>) -> Option<Poller> {
        slot.lock()
            .expect("thread holding poller slot lock should not panic")
            .take()
    }

    /// Watchdog: detect sync timers that have stopped ticking and reschedule them.
    ///
    /// A timer is dead when its last tick is older than `max(SYNC_OUTDATED_MAX, period)`.
    /// If either timer is dead, both are cleared and restarted, and the returned error names
    /// the dead ones.
    pub fn reset_sync_timer_if_exited(self: &Arc<Self>) -> Option<Error> {
        let rulesets_dead = self.poller_stalled(
            &self.rulesets_poller,
            self.config.rulesets_sync_interval,
        );
        let id_lists_dead = self.poller_stalled(
            &self.id_lists_poller,
            self.config.id_lists_sync_interval,
        );
        if !rulesets_dead && !id_lists_dead {
            return None;
        }

        if let Some(poller) = self.take_poller(&self.rulesets_poller) {
            poller.abort();
        }
        if let Some(poller) = self.take_poller(&self.id_lists_poller) {
            poller.abort();
        }
        self.start_pollers();

        let which = match (rulesets_dead, id_lists_dead) {
            (true, true) => "rulesets and ID list timers",
            (true, false) => "rulesets timer",
            (false, true) => "ID list timer",
            (false, false) => unreachable!(),
        };
        log::warn!(target: "statsig", "{which} stopped ticking; rescheduled both sync timers");
        Some(Error::StalledSyncTimer(which.to_string()))
    }

    fn poller_stalled(&self, slot: &Mutex<Option<Poller>>, period: Duration) -> bool {
        let threshold = SYNC_OUTDATED_MAX.max(period);
        slot.lock()
            .expect("thread holding poller slot lock should not panic")
            .as_ref()
            .is_some_and(|poller| poller.is_stalled(threshold))
    }

    fn start_pollers(self: &Arc<Self>) {
        let rulesets = {
            let store = Arc::downgrade(self);
            Poller::start(
                PollerConfig::new()
                    .with_interval(self.config.rulesets_sync_interval)
                    .with_jitter(self.config.sync_jitter),
                move || {
                    let store = store.clone();
                    async move {
                        if let Some(store) = store.upgrade() {
                            store.run_rulesets_sync().await;
                        }
                    }
                },
            )
        };
        *self
            .rulesets_poller
            .lock()
            .expect("thread holding poller slot lock should not panic") = Some(rulesets);

        let id_lists = {
            let store = Arc::downgrade(self);
            Poller::start(
                PollerConfig::new()
                    .with_interval(self.config.id_lists_sync_interval)
                    .with_jitter(self.config.sync_jitter),
                move || {
                    let store = store.clone();
                    async move {
                        if let Some(store) = store.upgrade() {
                            store.run_id_lists_sync().await;
                        }
                    }
                },
            )
        };
        *self
            .id_lists_poller
            .lock()
            .expect("thread holding poller slot lock should not panic") = Some(id_lists);
    }

    // ---- ruleset sync ----------------------------------------------------------------

    pub(crate) async fn run_rulesets_sync(&self) {
        let result = if self.adapter_supports_polling(&DataAdapterKey::Rulesets) {
            self.sync_rulesets_from_adapter().await
        } else {
            self.sync_rulesets_from_network().await
        };
        self.track_sync_result(
            "rulesets",
            result,
            &self.rulesets_failures,
            self.config.rulesets_sync_interval,
        );
    }

    fn adapter_supports_polling(&self, key: &DataAdapterKey) -> bool {
        self.adapter
            .as_ref()
            .is_some_and(|adapter| adapter.supports_polling_updates_for(key))
    }

    fn track_sync_result(
        &self,
        loop_name: &str,
        result: Result<()>,
        failures: &AtomicU32,
        period: Duration,
    ) {
        match result {
            Ok(()) => {
                failures.store(0, Ordering::Relaxed);
            }
            Err(err) => {
                log::debug!(target: "statsig", "{loop_name} sync failed: {err}");
                let count = failures.fetch_add(1, Ordering::Relaxed) + 1;
                if u128::from(count) * period.as_millis() > SYNC_OUTDATED_MAX.as_millis() {
                    log::warn!(target: "statsig",
                        "{loop_name} sync has been failing for over {}ms",
                        SYNC_OUTDATED_MAX.as_millis());
                    failures.store(0, Ordering::Relaxed);
                }
            }
        }
    }

    async fn sync_rulesets_from_network(&self) -> Result<()> {
        self.observer
            .mark(Marker::start(MarkerKey::DownloadConfigSpecs));
        let result = self.sync_rulesets_from_network_inner().await;
        self.observer
            .mark(Marker::end(MarkerKey::DownloadConfigSpecs, result.is_ok()));
        result
    }

    async fn sync_rulesets_from_network_inner(&self) -> Result<()> {
        let since_time = self.last_update_time();
        let raw = self.fetcher.download_config_specs(since_time).await?;
        let had_updates = self.process_specs_payload(&raw)?;
        self.set_init_reason(InitReason::Network);

        // Save-through: hand the raw payload to the adapter so cold starts can skip the
        // network.
        if had_updates {
            if let Some(adapter) = &self.adapter {
                let time = self.last_update_time();
                if let Err(err) = adapter.set(&DataAdapterKey::Rulesets, &raw, time).await {
                    log::warn!(target: "statsig", "failed to save rulesets to the data adapter: {err}");
                }
            }
        }
        Ok(())
    }

    async fn sync_rulesets_from_adapter(&self) -> Result<()> {
        self.observer
            .mark(Marker::start(MarkerKey::DataStoreConfigSpecs));
        let result = self.sync_rulesets_from_adapter_inner().await;
        self.observer
            .mark(Marker::end(MarkerKey::DataStoreConfigSpecs, result.is_ok()));
        result
    }

    async fn sync_rulesets_from_adapter_inner(&self) -> Result<()> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| Error::InvalidDataAdapterValues("no data adapter configured".into()))?;
        let value = adapter.get(&DataAdapterKey::Rulesets).await?;
        let raw = value.result.ok_or_else(|| {
            Error::InvalidDataAdapterValues("adapter has no rulesets stored".into())
        })?;
        // The payload's own `time` is authoritative; the adapter's version stamp is not
        // consulted on reload.
        self.process_specs_payload(&raw)?;
        Ok(())
    }

    /// Parse and apply one specs payload. Returns whether the payload carried updates.
    ///
    /// The payload is applied fully or not at all: all mappings are built in isolation and
    /// the snapshot reference is swapped once. A malformed payload leaves the previous
    /// snapshot untouched.
    pub(crate) fn process_specs_payload(&self, raw: &str) -> Result<bool> {
        let response: SpecsResponse = serde_json::from_str(raw)
            .map_err(|err| Error::InvalidConfigSpecsResponse(err.to_string()))?;
        if !response.has_updates {
            return Ok(false);
        }

        let (Some(gate_specs), Some(config_specs), Some(layer_specs)) = (
            response.feature_gates,
            response.dynamic_configs,
            response.layer_configs,
        ) else {
            return Err(Error::InvalidConfigSpecsResponse(
                "update payload is missing one of the spec arrays".into(),
            ));
        };

        if response.time < self.last_update_time() {
            log::debug!(target: "statsig",
                "ignoring specs payload older than the current snapshot ({} < {})",
                response.time, self.last_update_time());
            return Ok(false);
        }

        let mut gates = HashMap::with_capacity(gate_specs.len());
        for spec in gate_specs {
            gates.insert(spec.name.clone(), spec);
        }
        let mut configs = HashMap::with_capacity(config_specs.len());
        for spec in config_specs {
            configs.insert(spec.name.clone(), spec);
        }
        let mut layers = HashMap::with_capacity(layer_specs.len());
        for spec in layer_specs {
            layers.insert(spec.name.clone(), spec);
        }

        let mut experiment_to_layer = HashMap::new();
        for (layer_name, experiments) in &response.layers {
            for experiment in experiments {
                experiment_to_layer.insert(experiment.clone(), layer_name.clone());
            }
        }

        let snapshot = Arc::new(SpecsSnapshot {
            gates,
            configs,
            layers,
            experiment_to_layer,
            client_sdk_key_to_app: response.sdk_keys_to_app_ids,
            sampling_rates: diagnostics::clamp_sampling_rates(&response.diagnostics),
            last_update_time: response.time,
        });

        *self
            .snapshot
            .write()
            .expect("thread holding snapshot lock should not panic") = snapshot;

        log::debug!(target: "statsig", "applied specs update at time {}", response.time);
        Ok(true)
    }

    fn set_init_reason(&self, reason: InitReason) {
        *self
            .init_reason
            .write()
            .expect("thread holding init reason lock should not panic") = reason;
    }

    // ---- ID list sync ----------------------------------------------------------------

    pub(crate) async fn run_id_lists_sync(&self) {
        let result = if self.adapter_supports_polling(&DataAdapterKey::IdLists) {
            match self.sync_id_lists_from_adapter().await {
                Ok(()) => Ok(()),
                Err(err) => {
                    // Network fallback is per tick; the adapter is tried again next time.
                    log::debug!(target: "statsig",
                        "ID list adapter sync failed, falling back to the network: {err}");
                    self.sync_id_lists_from_network().await
                }
            }
        } else {
            self.sync_id_lists_from_network().await
        };
        self.track_sync_result(
            "ID list",
            result,
            &self.id_lists_failures,
            self.config.id_lists_sync_interval,
        );
    }

    /// Hydrate ID lists at init: adapter first when one is configured, network otherwise or
    /// on adapter failure.
    pub(crate) async fn sync_id_lists(&self) -> Result<()> {
        if self.adapter.is_some() {
            match self.sync_id_lists_from_adapter().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    log::debug!(target: "statsig",
                        "unable to load ID lists from the data adapter: {err}");
                }
            }
        }
        self.sync_id_lists_from_network().await
    }

    async fn sync_id_lists_from_adapter(&self) -> Result<()> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| Error::InvalidDataAdapterValues("no data adapter configured".into()))?;
        let value = adapter.get(&DataAdapterKey::IdLists).await?;
        let raw = value.result.ok_or_else(|| {
            Error::InvalidDataAdapterValues("adapter has no ID lists stored".into())
        })?;
        let lists: HashMap<String, IdList> = serde_json::from_str(&raw)
            .map_err(|err| Error::InvalidDataAdapterValues(err.to_string()))?;
        self.replace_id_lists(lists);
        Ok(())
    }

    pub(crate) fn replace_id_lists(&self, lists: HashMap<String, IdList>) {
        *self
            .id_lists
            .write()
            .expect("thread holding ID list lock should not panic") = lists;
    }

    async fn sync_id_lists_from_network(&self) -> Result<()> {
        self.observer.mark(Marker::start(MarkerKey::GetIdLists));
        let result = self.sync_id_lists_from_network_inner().await;
        self.observer
            .mark(Marker::end(MarkerKey::GetIdLists, result.is_ok()));
        result
    }

    async fn sync_id_lists_from_network_inner(&self) -> Result<()> {
        let raw = self.fetcher.get_id_lists().await?;
        let lookup = id_lists::parse_lookup(&raw)?;
        let result = self.process_id_list_lookup(&lookup).await;
        self.persist_id_lists_to_adapter().await;
        result
    }

    /// Apply one lookup response: create/reset entries, fetch missing ranges concurrently,
    /// fold them in, and drop lists the server no longer mentions.
    async fn process_id_list_lookup(&self, lookup: &HashMap<String, LookupEntry>) -> Result<()> {
        let mut to_fetch: Vec<(String, String, u64)> = Vec::new();
        {
            let mut lists = self
                .id_lists
                .write()
                .expect("thread holding ID list lock should not panic");

            lists.retain(|name, _| lookup.contains_key(name));

            for (name, entry) in lookup {
                match lists.get_mut(name) {
                    Some(list) => {
                        if entry.creation_time < list.creation_time {
                            // Stale lookup entry for this list; keep what we have.
                            continue;
                        }
                        if entry.file_id != list.file_id {
                            *list = IdList::from_entry(entry);
                        }
                    }
                    None => {
                        lists.insert(name.clone(), IdList::from_entry(entry));
                    }
                }
                let list = &lists[name];
                if entry.size > list.read_bytes {
                    to_fetch.push((name.clone(), list.url.clone(), list.read_bytes));
                }
            }
        }

        // All ranged fetches run without the lock; results are folded in afterwards so the
        // store is only observed once everything has settled.
        let chunks = join_all(to_fetch.into_iter().map(|(name, url, from)| async move {
            let chunk = self.fetcher.get_id_list_changes(&url, from).await;
            (name, chunk)
        }))
        .await;

        let mut first_error = None;
        {
            let mut lists = self
                .id_lists
                .write()
                .expect("thread holding ID list lock should not panic");
            for (name, chunk) in chunks {
                match chunk {
                    Ok(chunk) => {
                        let Some(content_length) = chunk.content_length else {
                            log::debug!(target: "statsig",
                                "ID list {name:?} response carried no usable Content-Length; dropping the list");
                            lists.remove(&name);
                            first_error.get_or_insert(Error::InvalidIdListsResponse(format!(
                                "missing Content-Length for list {name:?}"
                            )));
                            continue;
                        };
                        if let Some(list) = lists.get_mut(&name) {
                            id_lists::apply_chunk(list, &chunk.body, content_length);
                        }
                    }
                    Err(err) => {
                        log::debug!(target: "statsig", "ranged fetch for ID list {name:?} failed: {err}");
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn persist_id_lists_to_adapter(&self) {
        let Some(adapter) = &self.adapter else {
            return;
        };
        let lists = self
            .id_lists
            .read()
            .expect("thread holding ID list lock should not panic")
            .clone();
        let time = chrono::Utc::now().timestamp_millis() as u64;

        match serde_json::to_string(&lists) {
            Ok(json) => {
                if let Err(err) = adapter.set(&DataAdapterKey::IdLists, &json, time).await {
                    log::warn!(target: "statsig", "failed to save ID lists to the data adapter: {err}");
                }
            }
            Err(err) => {
                log::warn!(target: "statsig", "failed to serialize ID lists: {err}");
                return;
            }
        }

        for (name, list) in &lists {
            let body: String = list.ids.iter().map(|id| format!("+{id}\n")).collect();
            if let Err(err) = adapter
                .set(&DataAdapterKey::IdList(name.clone()), &body, time)
                .await
            {
                log::warn!(target: "statsig",
                    "failed to save ID list {name:?} to the data adapter: {err}");
            }
        }
    }
}

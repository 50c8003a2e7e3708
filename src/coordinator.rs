//! Load-step coordinator.
//!
//! Decides when the registered providers, stage by stage, and then the whole
//! set, are loaded. Completion is announced once per load generation through
//! [`LoadEvent::FullLoadOver`], after which the deferred tasks run.
//!
//! Progress signals arrive on the event bus from any thread; the listener
//! only forwards them to the bookkeeping executor, where
//! [`LoadCoordinator::on_provider_progressed`] runs.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::deferred::LoadGate;
use crate::events::{EventBus, ListenerId, LoadEvent};
use crate::executor::ExecutorHandle;
use crate::provider::{LoadStep, ProviderKind};
use crate::registry::ProviderRegistry;

pub struct LoadCoordinator {
    registry: Arc<ProviderRegistry>,
    events: EventBus,
    executor: ExecutorHandle,
    gate: Arc<LoadGate>,
    config: Arc<RwLock<Config>>,
    generation: AtomicU64,
    listener: Mutex<Option<ListenerId>>,
    started_at: Mutex<Option<Instant>>,
    self_ref: Weak<LoadCoordinator>,
}

impl LoadCoordinator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        events: EventBus,
        executor: ExecutorHandle,
        gate: Arc<LoadGate>,
        config: Arc<RwLock<Config>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry,
            events,
            executor,
            gate,
            config,
            generation: AtomicU64::new(0),
            listener: Mutex::new(None),
            started_at: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn gate(&self) -> &Arc<LoadGate> {
        &self.gate
    }

    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Start a load generation: clear the completion flag, listen for
    /// progress and announce the start of the load. Returns the new
    /// generation number.
    ///
    /// Must run on the bookkeeping executor, ahead of the reloads that make
    /// up the generation, so no completion check of the previous generation
    /// can interleave with it.
    pub fn begin_load(&self) -> u64 {
        self.gate.reset();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.started_at.lock() = Some(Instant::now());
        self.listen();

        tracing::debug!(generation, "load started");
        self.events.publish(LoadEvent::StartLoad { generation });
        generation
    }

    fn listen(&self) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }

        let coordinator = self.self_ref.clone();
        let executor = self.executor.clone();
        *listener = Some(self.events.subscribe(move |event| {
            if let LoadEvent::ProviderProgressed { .. } = event {
                let coordinator = coordinator.clone();
                executor.submit(move || {
                    if let Some(coordinator) = coordinator.upgrade() {
                        coordinator.on_provider_progressed();
                    }
                });
            }
        }));
    }

    fn stop_listening(&self) {
        let Some(id) = self.listener.lock().take() else {
            return;
        };
        if let Err(e) = self.events.unsubscribe(id) {
            tracing::warn!(error = %e, "progress listener already removed");
        }
    }

    /// Re-check readiness. Safe to call redundantly; returns `true` only for
    /// the call that announced completion.
    ///
    /// Steps are checked in ascending order. Unloaded providers at the
    /// lowest incomplete step are nudged to reload and higher steps are left
    /// alone for this pass.
    pub fn on_provider_progressed(&self) -> bool {
        let slots = self.registry.snapshot();
        if let Some(slot) = slots.iter().find(|slot| slot.provider.is_none()) {
            tracing::trace!(provider = %slot.name, "waiting for provider to bind");
            return false;
        }

        let steps: BTreeSet<LoadStep> = slots
            .iter()
            .filter_map(|slot| slot.provider.as_ref().map(|p| p.load_step()))
            .collect();

        for step in steps {
            let mut step_loaded = true;
            for provider in slots.iter().filter_map(|slot| slot.provider.as_ref()) {
                if provider.load_step() == step && !provider.is_loaded() {
                    step_loaded = false;
                    provider.reload(false);
                }
            }
            if !step_loaded {
                tracing::trace!(%step, "step not loaded yet");
                return false;
            }
        }

        if let Some(missing) = self.missing_service() {
            tracing::trace!(provider = %missing, "enabled provider not connected");
            return false;
        }

        if !self.gate.mark_sent() {
            return false;
        }

        self.stop_listening();
        let generation = self.generation();
        if let Some(started) = self.started_at.lock().take() {
            tracing::info!(generation, elapsed_ms = started.elapsed().as_millis() as u64, "all providers loaded");
        }
        self.events.publish(LoadEvent::FullLoadOver { generation });
        self.gate.execute_after_load_over_tasks();
        true
    }

    /// An enabled service that has no registry entry.
    fn missing_service(&self) -> Option<ProviderKind> {
        let enabled = self.config.read().enabled_services();
        enabled
            .into_iter()
            .find(|kind| !self.registry.contains(kind.name()))
    }

    /// Force-reload every provider at `from` or above, lowest step first.
    pub fn reload_from(&self, from: LoadStep) {
        let slots = self.registry.snapshot();
        let steps: BTreeSet<LoadStep> = slots
            .iter()
            .filter_map(|slot| slot.provider.as_ref().map(|p| p.load_step()))
            .filter(|step| *step >= from)
            .collect();

        for step in steps {
            for provider in slots.iter().filter_map(|slot| slot.provider.as_ref()) {
                if provider.load_step() == step {
                    provider.reload(true);
                }
            }
        }
    }

    /// Mark every provider above `step` dirty.
    pub fn mark_dirty_above(&self, step: LoadStep) {
        for slot in self.registry.snapshot() {
            if let Some(provider) = slot.provider {
                if provider.load_step() > step {
                    provider.set_dirty();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SequentialExecutor;
    use crate::provider::Provider;
    use crate::registry::tests::FakeProvider;
    use crate::registry::ProviderEntry;
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        events: EventBus,
        registry: Arc<ProviderRegistry>,
        coordinator: Arc<LoadCoordinator>,
        full_loads: Arc<AtomicUsize>,
        executor: SequentialExecutor,
    }

    fn harness(config: Config) -> Harness {
        let executor = SequentialExecutor::spawn(&tokio::runtime::Handle::current());
        let events = EventBus::new();
        let registry = Arc::new(ProviderRegistry::new());
        let coordinator = LoadCoordinator::new(
            Arc::clone(&registry),
            events.clone(),
            executor.handle(),
            Arc::new(LoadGate::new()),
            Arc::new(RwLock::new(config)),
        );

        let full_loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&full_loads);
        events.subscribe(move |event| {
            if matches!(event, LoadEvent::FullLoadOver { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        Harness {
            events,
            registry,
            coordinator,
            full_loads,
            executor,
        }
    }

    fn no_services() -> Config {
        let mut config = Config::default();
        for kind in ProviderKind::SERVICES {
            config.set_flag(&format!("enable-{}", kind.name()), false);
        }
        config
    }

    fn add(h: &Harness, name: &str, provider: &Arc<FakeProvider>) {
        let provider: Arc<dyn Provider> = Arc::clone(provider) as Arc<dyn Provider>;
        h.registry.register(name, ProviderEntry::inline(provider));
    }

    #[tokio::test]
    async fn test_full_load_fires_once_per_generation() {
        let h = harness(no_services());
        let a = Arc::new(FakeProvider::new("a", LoadStep::FIRST, true));
        add(&h, "a", &a);

        h.coordinator.begin_load();
        assert!(h.coordinator.on_provider_progressed());
        for _ in 0..5 {
            assert!(!h.coordinator.on_provider_progressed());
        }
        assert_eq!(h.full_loads.load(Ordering::SeqCst), 1);
        assert!(!h.coordinator.is_listening());

        h.coordinator.begin_load();
        assert_eq!(h.coordinator.generation(), 2);
        h.coordinator.on_provider_progressed();
        h.coordinator.on_provider_progressed();
        assert_eq!(h.full_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_higher_step_waits_for_lower() {
        let h = harness(no_services());
        let a = Arc::new(FakeProvider::new("a", LoadStep::FIRST, false));
        let b = Arc::new(FakeProvider::new("b", LoadStep::SECOND, false).loading_on_reload());
        add(&h, "a", &a);
        add(&h, "b", &b);

        h.coordinator.begin_load();
        assert!(!h.coordinator.on_provider_progressed());
        assert!(!h.coordinator.on_provider_progressed());
        assert_eq!(a.reload_count(), 2);
        assert_eq!(b.reload_count(), 0);

        a.set_loaded(true);
        // b is nudged in this pass and confirmed in the next
        assert!(!h.coordinator.on_provider_progressed());
        assert_eq!(b.reload_count(), 1);
        assert!(h.coordinator.on_provider_progressed());
        assert_eq!(h.full_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pending_entry_blocks_completion() {
        let h = harness(no_services());
        h.registry.register("app", ProviderEntry::pending());
        h.coordinator.begin_load();
        assert!(!h.coordinator.on_provider_progressed());
        assert_eq!(h.full_loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_enabled_absent_service_blocks_completion() {
        let mut config = no_services();
        config.set_flag("enable-shortcuts", true);
        let h = harness(config);
        let a = Arc::new(FakeProvider::new("a", LoadStep::FIRST, true));
        add(&h, "a", &a);

        h.coordinator.begin_load();
        assert!(!h.coordinator.on_provider_progressed());

        let shortcuts = Arc::new(FakeProvider::new("shortcut", LoadStep::SECOND, true));
        add(&h, "shortcuts", &shortcuts);
        assert!(h.coordinator.on_provider_progressed());
    }

    #[tokio::test]
    async fn test_progress_events_drive_completion() {
        let h = harness(no_services());
        let a = Arc::new(FakeProvider::new("a", LoadStep::FIRST, false));
        add(&h, "a", &a);

        h.coordinator.begin_load();
        assert!(h.coordinator.is_listening());
        a.set_loaded(true);
        h.events.publish(LoadEvent::ProviderProgressed {
            provider: "a".into(),
        });
        h.executor.handle().flush().await.unwrap();

        assert_eq!(h.full_loads.load(Ordering::SeqCst), 1);
        assert_eq!(h.events.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_deferred_tasks_drain_on_completion() {
        let h = harness(no_services());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        h.coordinator.gate().run_after_load_over(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        h.coordinator.begin_load();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        h.coordinator.on_provider_progressed();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        h.coordinator.on_provider_progressed();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_checks_announce_once() {
        let h = harness(no_services());
        for name in ["a", "b", "c"] {
            add(&h, name, &Arc::new(FakeProvider::new("x", LoadStep::FIRST, true)));
        }
        h.coordinator.begin_load();

        let winners = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        if h.coordinator.on_provider_progressed() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(h.full_loads.load(Ordering::SeqCst), 1);
        assert!(!h.coordinator.is_listening());
    }

    #[tokio::test]
    async fn test_reload_from_and_dirty() {
        let h = harness(no_services());
        let a = Arc::new(FakeProvider::new("a", LoadStep::FIRST, true));
        let b = Arc::new(FakeProvider::new("b", LoadStep::SECOND, true));
        let c = Arc::new(FakeProvider::new("c", LoadStep::THIRD, true));
        add(&h, "a", &a);
        add(&h, "b", &b);
        add(&h, "c", &c);

        h.coordinator.reload_from(LoadStep::SECOND);
        assert_eq!(a.reload_count(), 0);
        assert_eq!(b.reload_count(), 1);
        assert_eq!(c.reload_count(), 1);

        h.coordinator.mark_dirty_above(LoadStep::FIRST);
        assert!(!a.dirty.load(Ordering::SeqCst));
        assert!(b.dirty.load(Ordering::SeqCst));
        assert!(c.dirty.load(Ordering::SeqCst));
    }
}

//! Service connector.
//!
//! Brings service-backed providers into the registry. A connection goes
//! `Idle → Starting → Bound`, or `Starting → WaitingForUnlock` when the
//! process may not start background work yet. A waiting connection is
//! retried after the device becomes interactive, with a short delay, until
//! the retry bound is exceeded.
//!
//! Every method here except [`ServiceConnector::on_device_interactive`] must
//! run on the bookkeeping executor.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::coordinator::LoadCoordinator;
use crate::executor::ExecutorHandle;
use crate::provider::{Provider, ProviderCatalog, ProviderKind, StartError};
use crate::registry::{ProviderEntry, ProviderRegistry};

/// Handle that keeps a bound provider attached. It must be released before
/// the provider is stopped.
#[derive(Debug)]
pub struct ServiceConnection {
    name: String,
}

impl ServiceConnection {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Detach from the provider.
    pub fn release(self) {
        tracing::debug!(provider = %self.name, "connection released");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Starting { attempt: u32 },
    WaitingForUnlock { attempt: u32 },
    Bound,
    /// Retry bound exceeded; no automatic retries this session.
    Abandoned,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts numbered above this are abandoned.
    pub max_retries: u32,
    /// Delay between the interactive signal and the retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            delay: Duration::from_millis(10),
        }
    }
}

pub struct ServiceConnector {
    registry: Arc<ProviderRegistry>,
    catalog: Arc<ProviderCatalog>,
    coordinator: Arc<LoadCoordinator>,
    executor: ExecutorHandle,
    runtime: tokio::runtime::Handle,
    policy: RetryPolicy,
    states: Mutex<HashMap<String, ConnectionState>>,
    self_ref: Weak<ServiceConnector>,
}

impl ServiceConnector {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        catalog: Arc<ProviderCatalog>,
        coordinator: Arc<LoadCoordinator>,
        executor: ExecutorHandle,
        runtime: tokio::runtime::Handle,
        policy: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry,
            catalog,
            coordinator,
            executor,
            runtime,
            policy,
            states: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn state(&self, name: &str) -> ConnectionState {
        self.states
            .lock()
            .get(name)
            .copied()
            .unwrap_or(ConnectionState::Idle)
    }

    fn set_state(&self, name: &str, state: ConnectionState) {
        self.states.lock().insert(name.to_string(), state);
    }

    /// Connect a service provider. Does nothing if it is already registered.
    pub fn connect(&self, kind: ProviderKind) {
        self.connect_attempt(kind, 0);
    }

    fn connect_attempt(&self, kind: ProviderKind, attempt: u32) {
        let name = kind.name();
        if self.registry.contains(name) {
            return;
        }
        if !self.catalog.has_factory(kind) {
            tracing::warn!(provider = %name, "no factory for provider");
            self.states.lock().remove(name);
            return;
        }

        tracing::debug!(provider = %name, attempt, "connecting");
        self.set_state(name, ConnectionState::Starting { attempt });

        let provider = match self.catalog.build(kind) {
            Some(Ok(provider)) => provider,
            Some(Err(StartError::BackgroundRestricted)) => {
                tracing::warn!(
                    provider = %name,
                    attempt,
                    "background start restricted, waiting for the device to become interactive"
                );
                if attempt > self.policy.max_retries {
                    tracing::error!(provider = %name, attempt, "retry limit exceeded, giving up");
                    self.set_state(name, ConnectionState::Abandoned);
                } else {
                    self.set_state(name, ConnectionState::WaitingForUnlock { attempt });
                }
                return;
            }
            Some(Err(e)) => {
                tracing::error!(provider = %name, error = %e, "failed to start provider");
                self.states.lock().remove(name);
                return;
            }
            None => {
                self.states.lock().remove(name);
                return;
            }
        };

        self.registry.register(name, ProviderEntry::pending());

        // Binding completes as a separate job, like an asynchronous bind
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        self.executor.submit(move || this.bind(kind, provider));
    }

    fn bind(&self, kind: ProviderKind, provider: Arc<dyn Provider>) {
        let name = kind.name();
        let connection = ServiceConnection::new(name);
        if let Err(connection) = self.registry.install(name, Arc::clone(&provider), connection) {
            tracing::debug!(provider = %name, "disconnected before bind completed");
            connection.release();
            provider.shutdown();
            return;
        }

        tracing::info!(provider = %name, "provider bound");
        self.set_state(name, ConnectionState::Bound);

        if provider.is_loaded() {
            self.coordinator.on_provider_progressed();
        } else {
            provider.reload(false);
        }
    }

    /// The device became interactive. If it is unlocked, every connection
    /// waiting for it is retried after the policy delay.
    pub fn on_device_interactive(&self, locked: bool) {
        if locked {
            return;
        }

        let waiting: Vec<(String, u32)> = {
            let mut states = self.states.lock();
            states
                .iter_mut()
                .filter_map(|(name, state)| match *state {
                    ConnectionState::WaitingForUnlock { attempt } => {
                        *state = ConnectionState::Starting {
                            attempt: attempt + 1,
                        };
                        Some((name.clone(), attempt + 1))
                    }
                    _ => None,
                })
                .collect()
        };

        for (name, attempt) in waiting {
            let Some(kind) = ProviderKind::from_name(&name) else {
                continue;
            };
            tracing::info!(provider = %name, attempt, "device interactive, retrying start");
            let connector = self.self_ref.clone();
            let executor = self.executor.clone();
            let delay = self.policy.delay;
            self.runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                executor.submit(move || {
                    if let Some(connector) = connector.upgrade() {
                        connector.retry(kind, attempt);
                    }
                });
            });
        }
    }

    fn retry(&self, kind: ProviderKind, attempt: u32) {
        // Disconnected or reconnected while the retry was pending
        if self.state(kind.name()) != (ConnectionState::Starting { attempt }) {
            return;
        }
        self.connect_attempt(kind, attempt);
    }

    /// Release the connection, stop the provider and drop its entry.
    /// No-op if the provider is not registered.
    pub fn disconnect(&self, name: &str) {
        self.states.lock().remove(name);
        let Some(entry) = self.registry.remove(name) else {
            return;
        };

        if let Some(connection) = entry.connection {
            connection.release();
        }
        if let Some(provider) = entry.provider {
            provider.shutdown();
        }
        tracing::info!(provider = %name, "provider disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::deferred::LoadGate;
    use crate::events::EventBus;
    use crate::executor::SequentialExecutor;
    use crate::provider::{LoadStep, ProviderContext};
    use crate::registry::tests::FakeProvider;
    use crate::store::JsonStore;
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        executor: SequentialExecutor,
        registry: Arc<ProviderRegistry>,
        catalog: Arc<ProviderCatalog>,
        connector: Arc<ServiceConnector>,
    }

    fn harness(max_retries: u32) -> Harness {
        let runtime = tokio::runtime::Handle::current();
        let executor = SequentialExecutor::spawn(&runtime);
        let events = EventBus::new();
        let registry = Arc::new(ProviderRegistry::new());
        let config = Arc::new(RwLock::new(Config::default()));
        let catalog = Arc::new(ProviderCatalog::new(
            events.clone(),
            Arc::new(JsonStore::in_memory()),
            Arc::new(Config::default()),
            &registry,
        ));
        let coordinator = LoadCoordinator::new(
            Arc::clone(&registry),
            events,
            executor.handle(),
            Arc::new(LoadGate::new()),
            config,
        );
        let connector = ServiceConnector::new(
            Arc::clone(&registry),
            Arc::clone(&catalog),
            coordinator,
            executor.handle(),
            runtime,
            RetryPolicy {
                max_retries,
                delay: Duration::from_millis(1),
            },
        );
        Harness {
            executor,
            registry,
            catalog,
            connector,
        }
    }

    impl Harness {
        async fn run<F>(&self, f: F)
        where
            F: FnOnce(&ServiceConnector) + Send + 'static,
        {
            let connector = Arc::clone(&self.connector);
            self.executor.handle().submit(move || f(&connector));
            self.executor.handle().flush().await.unwrap();
            // bind jobs queued by the first job
            self.executor.handle().flush().await.unwrap();
        }

        /// Factory that fails with a restricted start `failures` times.
        fn restricted_factory(&self, failures: u32) -> Arc<AtomicU32> {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&calls);
            self.catalog.set_factory(
                ProviderKind::App,
                Arc::new(move |_: &ProviderContext| {
                    let call = counter.fetch_add(1, Ordering::SeqCst);
                    if call < failures {
                        Err(StartError::BackgroundRestricted)
                    } else {
                        Ok(Arc::new(FakeProvider::new("app", LoadStep::FIRST, true)) as Arc<dyn Provider>)
                    }
                }),
            );
            calls
        }
    }

    #[tokio::test]
    async fn test_connect_disconnect_connect() {
        let h = harness(20);
        h.restricted_factory(0);

        h.run(|c| c.connect(ProviderKind::App)).await;
        assert_eq!(h.registry.names(), vec!["app"]);
        assert!(h.registry.get("app").is_some());
        assert_eq!(h.connector.state("app"), ConnectionState::Bound);

        // connecting twice keeps a single entry
        h.run(|c| c.connect(ProviderKind::App)).await;
        assert_eq!(h.registry.len(), 1);

        h.run(|c| c.disconnect("app")).await;
        assert!(h.registry.is_empty());
        assert_eq!(h.connector.state("app"), ConnectionState::Idle);

        h.run(|c| c.connect(ProviderKind::App)).await;
        assert_eq!(h.registry.names(), vec!["app"]);

        // disconnecting an absent provider is a no-op
        h.run(|c| c.disconnect("shortcuts")).await;
        assert_eq!(h.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_before_bind_stops_late_provider() {
        let h = harness(20);
        let provider = Arc::new(FakeProvider::new("app", LoadStep::FIRST, true));
        let built = Arc::clone(&provider);
        h.catalog.set_factory(
            ProviderKind::App,
            Arc::new(move |_: &ProviderContext| -> Result<Arc<dyn Provider>, StartError> {
                Ok(Arc::clone(&built) as Arc<dyn Provider>)
            }),
        );

        // the bind job is queued behind this one, so the disconnect wins
        h.run(|c| {
            c.connect(ProviderKind::App);
            assert!(c.registry.contains("app"));
            c.disconnect("app");
        })
        .await;

        assert!(h.registry.is_empty());
        assert_eq!(provider.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(h.connector.state("app"), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_missing_factory_leaves_provider_absent() {
        let h = harness(20);
        h.run(|c| c.connect(ProviderKind::Contacts)).await;
        assert!(h.registry.is_empty());
        assert_eq!(h.connector.state("contacts"), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_restricted_start_retries_when_unlocked() {
        let h = harness(20);
        let calls = h.restricted_factory(2);

        h.run(|c| c.connect(ProviderKind::App)).await;
        assert_eq!(
            h.connector.state("app"),
            ConnectionState::WaitingForUnlock { attempt: 0 }
        );
        assert!(h.registry.is_empty());

        // still locked: nothing happens
        h.connector.on_device_interactive(true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.run(|_| {}).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        h.connector.on_device_interactive(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.run(|_| {}).await;
        assert_eq!(
            h.connector.state("app"),
            ConnectionState::WaitingForUnlock { attempt: 1 }
        );

        h.connector.on_device_interactive(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.run(|_| {}).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.connector.state("app"), ConnectionState::Bound);
        assert!(h.registry.get("app").is_some());
    }

    #[tokio::test]
    async fn test_retry_bound_abandons() {
        let h = harness(2);
        let calls = h.restricted_factory(u32::MAX);

        h.run(|c| c.connect(ProviderKind::App)).await;
        for _ in 0..5 {
            h.connector.on_device_interactive(false);
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.run(|_| {}).await;
        }

        // attempts 0, 1, 2 wait; attempt 3 exceeds the bound
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.connector.state("app"), ConnectionState::Abandoned);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_retry() {
        let h = harness(20);
        let calls = h.restricted_factory(1);

        h.run(|c| c.connect(ProviderKind::App)).await;
        h.connector.on_device_interactive(false);
        h.run(|c| c.disconnect("app")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.run(|_| {}).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(h.registry.is_empty());
    }
}

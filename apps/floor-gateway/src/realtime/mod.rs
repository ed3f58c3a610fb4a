//! Realtime event distribution core.
//!
//! [`RealtimeHub`] wires the registry, subscription index, dispatcher,
//! health monitor and publisher together and owns their background tasks.

pub mod dispatcher;
pub mod event;
pub mod health;
pub mod history;
pub mod index;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod topics;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RealtimeConfig;

use dispatcher::{DispatchStats, Dispatcher, IndexResolver};
use event::Priority;
use health::{HealthMonitor, HealthStatus};
use index::SubscriptionIndex;
use publisher::EventPublisher;
use registry::ConnectionRegistry;

/// Aggregate view served by the operational health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilitySnapshot {
    pub connections: usize,
    pub topics: BTreeMap<String, usize>,
    pub queue_depth: usize,
    pub queue_depth_by_priority: BTreeMap<Priority, usize>,
    pub queue_capacity: usize,
    pub dispatch: DispatchStats,
    pub health_distribution: BTreeMap<HealthStatus, usize>,
    pub average_health_score: f64,
}

pub struct RealtimeHub {
    config: RealtimeConfig,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<HealthMonitor>,
    publisher: EventPublisher,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeHub {
    pub fn new(config: RealtimeConfig, worker_id: u16) -> Self {
        let index = Arc::new(SubscriptionIndex::new());
        let registry = Arc::new(ConnectionRegistry::new(index, config.max_connections));
        let resolver = Arc::new(IndexResolver::new(registry.clone()));
        let dispatcher = Arc::new(Dispatcher::new(&config, worker_id, registry.clone(), resolver));
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            dispatcher.clone(),
            config.health_interval,
            config.health_history,
            config.system_alert_threshold,
        ));
        let publisher = EventPublisher::new(dispatcher.clone());
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            registry,
            dispatcher,
            monitor,
            publisher,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the delivery loop and the health monitor. Calling it twice is
    /// a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        tasks.push(tokio::spawn(
            self.dispatcher.clone().run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.monitor.clone().run(self.shutdown.subscribe()),
        ));
        tracing::info!(
            max_connections = self.config.max_connections,
            queue_capacity = self.config.queue_capacity,
            "realtime hub started"
        );
    }

    /// Stop background tasks and close the queue. Undelivered events are
    /// dropped.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.dispatcher.close();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "realtime task ended abnormally");
            }
        }
        tracing::info!(
            connections = self.registry.len(),
            pending = self.dispatcher.queue_depth(),
            "realtime hub stopped"
        );
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn index(&self) -> &Arc<SubscriptionIndex> {
        self.registry.index()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        let (health_distribution, average_health_score) = self.monitor.current_distribution();
        ObservabilitySnapshot {
            connections: self.registry.len(),
            topics: self.index().subscriber_counts(),
            queue_depth: self.dispatcher.queue_depth(),
            queue_depth_by_priority: self.dispatcher.queue_depth_by_priority().into_iter().collect(),
            queue_capacity: self.config.queue_capacity,
            dispatch: self.dispatcher.stats(),
            health_distribution,
            average_health_score,
        }
    }
}

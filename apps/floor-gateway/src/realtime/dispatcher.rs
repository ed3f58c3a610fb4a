//! Broadcast dispatcher: queue → resolve → serialize → fan out → retry.
//!
//! A single delivery loop pulls events one at a time, so for any two events
//! of the same priority every shared recipient sees them in submission
//! order. Frames are queued on each recipient's outbound buffer without
//! waiting, so a client that stops reading only loses its own frames; a
//! failing recipient never fails the event. Only resolution or serialization
//! failures are retried, after an exponential backoff.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use floor_common::SnowflakeGenerator;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, RealtimeResult};

use super::event::{Event, EventState, Priority, TargetSelector};
use super::queue::EventQueue;
use super::registry::{ConnectionId, ConnectionRegistry, OutboundFrame};

/// Turns an event's target selector into concrete connection ids.
pub trait TargetResolver: Send + Sync {
    fn resolve(&self, target: &TargetSelector) -> RealtimeResult<HashSet<ConnectionId>>;
}

/// Resolves through the subscription index; system-wide means every live
/// connection.
pub struct IndexResolver {
    registry: Arc<ConnectionRegistry>,
}

impl IndexResolver {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

impl TargetResolver for IndexResolver {
    fn resolve(&self, target: &TargetSelector) -> RealtimeResult<HashSet<ConnectionId>> {
        match target {
            TargetSelector::SystemWide => Ok(self.registry.connection_ids()),
            TargetSelector::Topics(topics) => Ok(self
                .registry
                .index()
                .resolve(topics.iter().map(String::as_str))),
        }
    }
}

/// Result of one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { recipients: usize, failures: usize },
    RetryScheduled { attempt: u32, delay: Duration },
    Failed { attempts: u32 },
}

impl DispatchOutcome {
    pub fn state(&self) -> EventState {
        match self {
            Self::Delivered { .. } => EventState::Delivered,
            Self::RetryScheduled { .. } => EventState::RetryScheduled,
            Self::Failed { .. } => EventState::Failed,
        }
    }
}

#[derive(Default)]
struct DispatchCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    recipient_deliveries: AtomicU64,
    recipient_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub retried: u64,
    pub failed: u64,
    pub recipient_deliveries: u64,
    pub recipient_failures: u64,
    /// Failed events over finished (delivered + failed) events.
    pub event_failure_rate: f64,
    /// Failed sends over attempted sends.
    pub recipient_failure_rate: f64,
}

#[derive(Debug, Clone)]
struct RetryPolicy {
    default_max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// `base · 2^(attempt−1)`, capped at `max_delay`.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

pub struct Dispatcher {
    queue: Arc<EventQueue>,
    registry: Arc<ConnectionRegistry>,
    resolver: Arc<dyn TargetResolver>,
    ids: SnowflakeGenerator,
    counters: Arc<DispatchCounters>,
    retry: RetryPolicy,
    submit_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        config: &RealtimeConfig,
        worker_id: u16,
        registry: Arc<ConnectionRegistry>,
        resolver: Arc<dyn TargetResolver>,
    ) -> Self {
        Self {
            queue: Arc::new(EventQueue::new(config.queue_capacity, config.starvation_limit)),
            registry,
            resolver,
            ids: SnowflakeGenerator::new(worker_id),
            counters: Arc::new(DispatchCounters::default()),
            retry: RetryPolicy {
                default_max_retries: config.max_retries.max(1),
                base_delay: config.retry_base_delay,
                max_delay: config.retry_max_delay,
            },
            submit_timeout: config.submit_timeout,
        }
    }

    /// Enqueue an event and return its id. Waits at most the configured
    /// submit timeout for queue space before failing with `QueueSaturated`.
    pub async fn submit(&self, mut event: Event) -> RealtimeResult<u64> {
        self.stamp(&mut event)?;
        let (id, priority) = (event.id(), event.priority());
        let pushed = self.queue.push(event, self.submit_timeout).await;
        self.record_submit(id, priority, pushed)
    }

    /// Enqueue an event only if there is room right now; otherwise fail with
    /// `QueueSaturated` immediately.
    pub fn try_submit(&self, mut event: Event) -> RealtimeResult<u64> {
        self.stamp(&mut event)?;
        let (id, priority) = (event.id(), event.priority());
        let pushed = self
            .queue
            .try_push(event)
            .map_err(|_| RealtimeError::QueueSaturated);
        self.record_submit(id, priority, pushed)
    }

    fn stamp(&self, event: &mut Event) -> RealtimeResult<()> {
        if matches!(event.target(), TargetSelector::Topics(t) if t.is_empty()) {
            return Err(RealtimeError::validation("event has no target topics"));
        }
        event.stamp(self.ids.generate(), self.retry.default_max_retries);
        Ok(())
    }

    fn record_submit(&self, id: u64, priority: Priority, pushed: RealtimeResult<()>) -> RealtimeResult<u64> {
        match pushed {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event_id = id, %priority, state = ?EventState::Queued, "event queued");
                Ok(id)
            }
            Err(err) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event_id = id, %priority, "event rejected: queue saturated");
                Err(err)
            }
        }
    }

    /// Delivery loop. Runs until `shutdown` flips or the queue is closed.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("dispatcher started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = self.queue.pop() => match next {
                    Some(event) => {
                        self.dispatch(event).await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!(pending = self.queue.depth(), "dispatcher stopped");
    }

    /// Wait for one event and dispatch it.
    pub async fn dispatch_next(&self) -> Option<DispatchOutcome> {
        let event = self.queue.pop().await?;
        Some(self.dispatch(event).await)
    }

    async fn dispatch(&self, event: Event) -> DispatchOutcome {
        tracing::debug!(event_id = event.id(), state = ?EventState::Resolving, "dispatching event");

        let targets = match self.resolver.resolve(event.target()) {
            Ok(targets) => targets,
            Err(err) => return self.event_failed(event, err),
        };

        let frame: OutboundFrame = match event.envelope_json() {
            Ok(json) => Arc::from(json),
            Err(err) => return self.event_failed(event, RealtimeError::Resolution(err.to_string())),
        };

        tracing::debug!(
            event_id = event.id(),
            event_type = event.event_type(),
            recipients = targets.len(),
            state = ?EventState::Delivering,
            "delivering event"
        );

        let mut delivered = 0usize;
        let mut failures = 0usize;
        for connection_id in &targets {
            match self.registry.send(connection_id, frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    failures += 1;
                    tracing::warn!(
                        event_id = event.id(),
                        %connection_id,
                        error = %err,
                        "recipient delivery failed"
                    );
                }
            }
        }

        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        self.counters
            .recipient_deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters
            .recipient_failures
            .fetch_add(failures as u64, Ordering::Relaxed);

        DispatchOutcome::Delivered {
            recipients: delivered,
            failures,
        }
    }

    fn event_failed(&self, mut event: Event, err: RealtimeError) -> DispatchOutcome {
        if event.record_failed_attempt() {
            let attempt = event.retry_count();
            let delay = self.retry.backoff(attempt);
            self.counters.retried.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                event_id = event.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "event failed, retry scheduled"
            );
            self.schedule_retry(event, delay);
            DispatchOutcome::RetryScheduled { attempt, delay }
        } else {
            let attempts = event.retry_count();
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                event_id = event.id(),
                event_type = event.event_type(),
                attempts,
                error = %err,
                "event failed permanently"
            );
            DispatchOutcome::Failed { attempts }
        }
    }

    fn schedule_retry(&self, event: Event, delay: Duration) {
        let queue = self.queue.clone();
        let counters = self.counters.clone();
        let wait = self.submit_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let id = event.id();
            if let Err(err) = queue.push(event, wait).await {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(event_id = id, error = %err, "retry dropped");
            }
        });
    }

    /// Stop accepting events and wake the delivery loop.
    pub fn close(&self) {
        self.queue.close();
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn queue_depth_by_priority(&self) -> Vec<(Priority, usize)> {
        Priority::ALL
            .into_iter()
            .zip(self.queue.depth_by_priority())
            .collect()
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        let delivered = c.delivered.load(Ordering::Relaxed);
        let failed = c.failed.load(Ordering::Relaxed);
        let recipient_deliveries = c.recipient_deliveries.load(Ordering::Relaxed);
        let recipient_failures = c.recipient_failures.load(Ordering::Relaxed);
        DispatchStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            delivered,
            retried: c.retried.load(Ordering::Relaxed),
            failed,
            recipient_deliveries,
            recipient_failures,
            event_failure_rate: ratio(failed, delivered + failed),
            recipient_failure_rate: ratio(recipient_failures, recipient_deliveries + recipient_failures),
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

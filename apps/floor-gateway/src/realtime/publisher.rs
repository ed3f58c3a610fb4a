//! Producer-facing facade over the dispatcher.
//!
//! Domain services (OEE calculator, Andon, job tracking) call these helpers
//! and never see connection ids or sockets. Every helper addresses the
//! unqualified namespace topic as well, so `target_id = "all"` subscribers
//! receive it, and line-scoped events also reach `line:<id>` subscribers.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::error::RealtimeResult;

use super::dispatcher::Dispatcher;
use super::event::{Event, EventType, Priority, TargetSelector};
use super::topics::SubscriptionType;

#[derive(Clone)]
pub struct EventPublisher {
    dispatcher: Arc<Dispatcher>,
}

/// Accumulates topic keys for one event.
struct Topics(BTreeSet<String>);

impl Topics {
    fn namespace(kind: SubscriptionType) -> Self {
        Self(BTreeSet::from([kind.wildcard_topic()]))
    }

    fn with(mut self, kind: SubscriptionType, qualifier: &str) -> Self {
        self.0.insert(kind.topic(qualifier));
        self
    }

    fn with_opt(self, kind: SubscriptionType, qualifier: Option<&str>) -> Self {
        match qualifier {
            Some(q) => self.with(kind, q),
            None => self,
        }
    }

    fn into_target(self) -> TargetSelector {
        TargetSelector::Topics(self.0)
    }
}

impl EventPublisher {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Submit an arbitrary event. Fails with `QueueSaturated` under
    /// sustained backpressure; delivery itself is fire-and-forget.
    pub async fn submit_event(
        &self,
        event_type: &str,
        payload: Value,
        priority: Priority,
        target: TargetSelector,
    ) -> RealtimeResult<u64> {
        self.dispatcher
            .submit(Event::new(event_type, payload, priority, target))
            .await
    }

    pub async fn production_update(&self, line_id: &str, payload: Value) -> RealtimeResult<u64> {
        let target = Topics::namespace(SubscriptionType::Production)
            .with(SubscriptionType::Production, line_id)
            .with(SubscriptionType::Line, line_id)
            .into_target();
        self.submit_event(EventType::PRODUCTION_UPDATE, payload, Priority::Normal, target)
            .await
    }

    pub async fn oee_update(
        &self,
        line_id: &str,
        equipment_code: Option<&str>,
        payload: Value,
    ) -> RealtimeResult<u64> {
        let target = Topics::namespace(SubscriptionType::Oee)
            .with(SubscriptionType::Oee, line_id)
            .with(SubscriptionType::Line, line_id)
            .with_opt(SubscriptionType::Oee, equipment_code)
            .with_opt(SubscriptionType::Equipment, equipment_code)
            .into_target();
        self.submit_event(EventType::OEE_UPDATE, payload, Priority::Normal, target)
            .await
    }

    pub async fn equipment_status(
        &self,
        equipment_code: &str,
        line_id: Option<&str>,
        payload: Value,
    ) -> RealtimeResult<u64> {
        let target = Topics::namespace(SubscriptionType::Equipment)
            .with(SubscriptionType::Equipment, equipment_code)
            .with_opt(SubscriptionType::Line, line_id)
            .into_target();
        self.submit_event(EventType::EQUIPMENT_STATUS, payload, Priority::High, target)
            .await
    }

    pub async fn job_update(
        &self,
        job_id: &str,
        line_id: Option<&str>,
        payload: Value,
    ) -> RealtimeResult<u64> {
        let target = Topics::namespace(SubscriptionType::Job)
            .with(SubscriptionType::Job, job_id)
            .with_opt(SubscriptionType::Line, line_id)
            .into_target();
        self.submit_event(EventType::JOB_UPDATE, payload, Priority::Normal, target)
            .await
    }

    pub async fn downtime_event(
        &self,
        line_id: &str,
        equipment_code: Option<&str>,
        payload: Value,
    ) -> RealtimeResult<u64> {
        let target = Topics::namespace(SubscriptionType::Downtime)
            .with(SubscriptionType::Downtime, line_id)
            .with(SubscriptionType::Line, line_id)
            .with_opt(SubscriptionType::Downtime, equipment_code)
            .with_opt(SubscriptionType::Equipment, equipment_code)
            .into_target();
        self.submit_event(EventType::DOWNTIME_EVENT, payload, Priority::High, target)
            .await
    }

    pub async fn andon_event(
        &self,
        line_id: &str,
        priority: Priority,
        payload: Value,
    ) -> RealtimeResult<u64> {
        let target = Topics::namespace(SubscriptionType::Andon)
            .with(SubscriptionType::Andon, line_id)
            .with(SubscriptionType::Line, line_id)
            .into_target();
        self.submit_event(EventType::ANDON_EVENT, payload, priority, target)
            .await
    }

    /// Reaches subscribers of the escalation id and of its priority tier.
    pub async fn escalation_event(
        &self,
        escalation_id: &str,
        escalation_priority: &str,
        priority: Priority,
        payload: Value,
    ) -> RealtimeResult<u64> {
        let target = Topics::namespace(SubscriptionType::Escalation)
            .with(SubscriptionType::Escalation, escalation_id)
            .with(SubscriptionType::Escalation, escalation_priority)
            .into_target();
        self.submit_event(EventType::ESCALATION_EVENT, payload, priority, target)
            .await
    }

    pub async fn quality_alert(&self, line_id: &str, payload: Value) -> RealtimeResult<u64> {
        let target = Topics::namespace(SubscriptionType::Quality)
            .with(SubscriptionType::Quality, line_id)
            .with(SubscriptionType::Line, line_id)
            .into_target();
        self.submit_event(EventType::QUALITY_ALERT, payload, Priority::High, target)
            .await
    }

    pub async fn changeover_event(&self, line_id: &str, payload: Value) -> RealtimeResult<u64> {
        let target = Topics::namespace(SubscriptionType::Changeover)
            .with(SubscriptionType::Changeover, line_id)
            .with(SubscriptionType::Line, line_id)
            .into_target();
        self.submit_event(EventType::CHANGEOVER_EVENT, payload, Priority::Normal, target)
            .await
    }

    /// Broadcast to every live connection.
    pub async fn system_announcement(&self, priority: Priority, payload: Value) -> RealtimeResult<u64> {
        self.submit_event(
            EventType::SYSTEM_ANNOUNCEMENT,
            payload,
            priority,
            TargetSelector::SystemWide,
        )
        .await
    }
}

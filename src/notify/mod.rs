//! Progress notifications with bounded retry.
//!
//! Delivery is at-least-once: consumers must tolerate duplicates. A channel
//! that answers `acked: false` (consumer not subscribed yet) or errors is
//! retried on a fixed delay until the attempt budget runs out.

pub mod hub;

use crate::error::AgentError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub use hub::NotificationHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Progress,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub consumer_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(consumer_id: impl Into<String>, event_type: EventType, payload: Value) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(consumer_id: impl Into<String>, payload: Value) -> Self {
        Self::new(consumer_id, EventType::Progress, payload)
    }

    pub fn complete(consumer_id: impl Into<String>, payload: Value) -> Self {
        Self::new(consumer_id, EventType::Complete, payload)
    }

    pub fn error(consumer_id: impl Into<String>, payload: Value) -> Self {
        Self::new(consumer_id, EventType::Error, payload)
    }
}

/// Acknowledgement from a channel. `acked` is the consumer-reachable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub acked: bool,
}

/// Transport to a UI consumer.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn publish(&self, consumer_id: &str, event: &NotificationEvent) -> Result<Ack>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

/// What an undeliverable notification does to the step that sent it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log and carry on.
    #[default]
    NonFatal,
    /// Fail the owning step, which aborts the run.
    Fatal,
}

impl FailurePolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "non_fatal" | "nonfatal" => Some(FailurePolicy::NonFatal),
            "fatal" => Some(FailurePolicy::Fatal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::NonFatal => "non_fatal",
            FailurePolicy::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Undeliverable { attempts: u32, last_error: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    channel: Arc<dyn NotificationChannel>,
    retry: RetryPolicy,
    failure_policy: FailurePolicy,
}

impl NotificationDispatcher {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            channel,
            retry: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Try to deliver, sleeping `retry.delay` between attempts. Never errors.
    pub async fn deliver(&self, event: &NotificationEvent) -> DeliveryOutcome {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            match self.channel.publish(&event.consumer_id, event).await {
                Ok(Ack { acked: true }) => {
                    tracing::debug!(
                        consumer = %event.consumer_id,
                        attempt,
                        "notification delivered"
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Ok(Ack { acked: false }) => {
                    last_error = "consumer not subscribed".to_string();
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                }
            }
            tracing::debug!(
                consumer = %event.consumer_id,
                attempt,
                "notification not acknowledged: {}",
                last_error
            );
            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay).await;
            }
        }

        tracing::warn!(
            consumer = %event.consumer_id,
            attempts = self.retry.max_attempts,
            "notification undeliverable: {}",
            last_error
        );
        DeliveryOutcome::Undeliverable {
            attempts: self.retry.max_attempts,
            last_error,
        }
    }

    /// Deliver and apply the failure policy.
    pub async fn notify(&self, event: &NotificationEvent) -> Result<DeliveryOutcome, AgentError> {
        let outcome = self.deliver(event).await;
        match (&outcome, self.failure_policy) {
            (DeliveryOutcome::Undeliverable { attempts, .. }, FailurePolicy::Fatal) => {
                Err(AgentError::NotificationUndeliverable {
                    consumer_id: event.consumer_id.clone(),
                    attempts: *attempts,
                })
            }
            _ => Ok(outcome),
        }
    }
}

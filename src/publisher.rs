use async_trait::async_trait;
use tracing::{debug, warn};

use crate::frame_transformer::Sample;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("not connected to the message bus")]
    NotConnected,
    #[error("publish to {topic} failed: {reason}")]
    Send { topic: String, reason: String },
    #[error("publish to {topic} timed out")]
    Timeout { topic: String },
    #[error("{failed} of {attempted} messages could not be published, first error: {first}")]
    Partial {
        failed: usize,
        attempted: usize,
        first: Box<PublishError>,
    },
}

/// Minimal bus interface the bridge needs: fire a retained message at a topic.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_retained(&self, topic: &str, payload: String) -> Result<(), PublishError>;
}

/// Topic/payload pair for one retained fact.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

/// Maps samples onto the topic layout below a base namespace.
pub struct SamplePublisher<B> {
    bus: B,
    base_topic: String,
}

impl<B: MessageBus> SamplePublisher<B> {
    pub fn new(bus: B, base_topic: impl Into<String>) -> Self {
        Self {
            bus,
            base_topic: base_topic.into().trim_end_matches('/').to_string(),
        }
    }

    /// Builds the full message set for one accepted sample.
    pub fn messages(&self, sample: &Sample, time_diff: i64, system_time: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(sample.readings.len() + 3);

        if let Some(total) = sample.total_consumption {
            messages.push(self.message("total_consumption", format_reading(total)));
        }
        messages.push(self.message("system_time", system_time.to_string()));
        messages.push(self.message("timestamp_diff", time_diff.to_string()));

        for reading in &sample.readings {
            messages.push(self.message(
                &format!("raw/{}", reading.code),
                format_reading(reading.value),
            ));
        }

        messages
    }

    /// Publishes every message of the sample, even after one of them fails.
    /// Any failure fails the whole cycle.
    pub async fn publish(
        &self,
        sample: &Sample,
        time_diff: i64,
        system_time: &str,
    ) -> Result<(), PublishError> {
        let messages = self.messages(sample, time_diff, system_time);
        let attempted = messages.len();
        let mut failures = Vec::new();

        for message in messages {
            match self
                .bus
                .publish_retained(&message.topic, message.payload)
                .await
            {
                Ok(()) => debug!(topic = %message.topic, "published"),
                Err(e) => {
                    warn!(topic = %message.topic, error = %e, "publish failed");
                    failures.push(e);
                }
            }
        }

        let failed = failures.len();
        match failures.into_iter().next() {
            None => Ok(()),
            Some(first) if failed == attempted => Err(first),
            Some(first) => Err(PublishError::Partial {
                failed,
                attempted,
                first: Box::new(first),
            }),
        }
    }

    fn message(&self, suffix: &str, payload: String) -> Message {
        Message {
            topic: format!("{}/{}", self.base_topic, suffix),
            payload,
        }
    }
}

/// Scaled readings are already rounded to one decimal; keep that decimal visible.
fn format_reading(value: f64) -> String {
    format!("{value:.1}")
}

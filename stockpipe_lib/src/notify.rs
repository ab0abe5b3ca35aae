//! Operator notifications.
//!
//! Notification is best effort: a failed publish is logged and never
//! changes the outcome of the job that triggered it.

use async_trait::async_trait;
use thiserror::Error;

use crate::outcome::{RunOutcome, RunStatus};

/// SNS rejects longer subjects.
const MAX_SUBJECT_LEN: usize = 100;
/// Error lines included in a run notification.
const MAX_ERROR_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("publish failed: {0}")]
    Publish(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), NotifyError>;
}

/// Publishes to an SNS topic.
pub struct SnsNotifier {
    client: aws_sdk_sns::Client,
    topic_arn: String,
}

impl SnsNotifier {
    pub fn new(client: aws_sdk_sns::Client, topic_arn: impl Into<String>) -> Self {
        Self {
            client,
            topic_arn: topic_arn.into(),
        }
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), NotifyError> {
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(truncate_subject(subject))
            .message(message)
            .send()
            .await
            .map_err(|e| NotifyError::Publish(e.into_service_error().to_string()))?;
        Ok(())
    }
}

/// Writes notifications to the log. Used when no topic is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), NotifyError> {
        tracing::info!(subject, "Notification: {}", message);
        Ok(())
    }
}

fn truncate_subject(subject: &str) -> &str {
    if subject.len() <= MAX_SUBJECT_LEN {
        return subject;
    }
    let mut end = MAX_SUBJECT_LEN;
    while !subject.is_char_boundary(end) {
        end -= 1;
    }
    &subject[..end]
}

pub async fn notify_best_effort(notifier: &dyn Notifier, subject: &str, message: &str) {
    match notifier.publish(subject, message).await {
        Ok(()) => tracing::info!(subject, "Notification sent"),
        Err(e) => tracing::error!(subject, "Failed to send notification: {}", e),
    }
}

/// Subject and body describing a finished backfill run.
pub fn outcome_message(job: &str, outcome: &RunOutcome) -> (String, String) {
    let subject = match outcome.status() {
        RunStatus::Success => format!("{} succeeded", job),
        RunStatus::Partial => format!("{} partial", job),
        RunStatus::Failed => format!("{} FAILED", job),
    };
    (subject, outcome.report(MAX_ERROR_LINES))
}

/// Subject and body for a job that stopped with an error.
pub fn failure_message(job: &str, error: &dyn std::fmt::Display) -> (String, String) {
    (
        format!("{} FAILED", job),
        format!("{} FAILED.\n\nError:\n{}", job, error),
    )
}

//! Notification bridge between analysis outcomes and the user.
//!
//! The core calls exactly two hooks and knows nothing about how they are
//! presented.

use crate::config::NotificationSettings;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use veriscan_core::{AnalysisCompletion, FailureReason};

pub trait NotificationBridge: Send + Sync {
    fn on_completion(&self, completion: &AnalysisCompletion);

    fn on_failure(&self, reason: &FailureReason);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTag {
    AnalysisComplete,
    AnalysisFailed,
    SecurityAlert,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub tag: NotificationTag,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        level: NotificationLevel,
        tag: NotificationTag,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            tag,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn analysis_complete(completion: &AnalysisCompletion) -> Self {
        let message = match completion.authenticity_score() {
            Some(score) => {
                let verdict = if score > 50.0 { "Authentic" } else { "AI-Generated" };
                format!("Result: {verdict} ({score:.0}% confidence)")
            }
            None => "Analysis completed successfully".to_string(),
        };
        Self::new(
            NotificationLevel::Success,
            NotificationTag::AnalysisComplete,
            "Analysis Complete",
            message,
        )
    }

    pub fn analysis_failed(reason: &FailureReason) -> Self {
        let mut message = reason
            .message
            .clone()
            .unwrap_or_else(|| "Analysis failed".to_string());
        if let Some(status) = reason.status {
            message = format!("{message} (HTTP {status})");
        }
        Self::new(
            NotificationLevel::Error,
            NotificationTag::AnalysisFailed,
            "Analysis Failed",
            message,
        )
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(
            NotificationLevel::Warning,
            NotificationTag::SecurityAlert,
            "Security Alert",
            message,
        )
    }
}

/// Forwards notifications to a channel, honoring the user's settings.
///
/// Completion notices are only sent when `settings.analysis` is on; failures
/// are always reported.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
    settings: NotificationSettings,
}

impl ChannelNotifier {
    pub fn new(
        sender: mpsc::UnboundedSender<Notification>,
        settings: NotificationSettings,
    ) -> Self {
        Self { sender, settings }
    }

    /// Security notices go through the same channel when enabled.
    pub fn security(&self, message: impl Into<String>) {
        if self.settings.security {
            let _ = self.sender.send(Notification::security(message));
        }
    }
}

impl NotificationBridge for ChannelNotifier {
    fn on_completion(&self, completion: &AnalysisCompletion) {
        if self.settings.analysis {
            let _ = self.sender.send(Notification::analysis_complete(completion));
        }
    }

    fn on_failure(&self, reason: &FailureReason) {
        let _ = self.sender.send(Notification::analysis_failed(reason));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl NotificationBridge for NoopNotifier {
    fn on_completion(&self, _completion: &AnalysisCompletion) {}

    fn on_failure(&self, _reason: &FailureReason) {}
}

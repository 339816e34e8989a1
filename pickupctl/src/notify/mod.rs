//! Outbound notifications to guardians, requesters and administrators.
//!
//! Delivery is fire-and-forget: workflow operations hand a [`Notification`] to the
//! [`NotificationDispatcher`], which delivers it on a background task. A failed delivery is
//! logged and counted; it never fails the operation that raised it.

pub mod signing;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use crate::db::models::{approvals::ApprovalDecision, requests::ReleaseMethod};
use crate::types::{ApprovalId, PickupRequestId, StudentId, UserId, abbrev_uuid};

/// Something a person should hear about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Notification {
    /// A guest pickup needs a guardian's decision
    #[serde(rename = "pickup.approval_requested")]
    ApprovalRequested {
        request_id: PickupRequestId,
        student_id: StudentId,
        guest_name: String,
    },
    /// A guardian decided on a guest pickup
    #[serde(rename = "pickup.approval_resolved")]
    ApprovalResolved {
        request_id: PickupRequestId,
        approval_id: ApprovalId,
        guardian_id: UserId,
        decision: ApprovalDecision,
    },
    #[serde(rename = "pickup.confirmed")]
    Confirmed {
        request_id: PickupRequestId,
        token_expires_at: DateTime<Utc>,
    },
    #[serde(rename = "pickup.rejected")]
    Rejected { request_id: PickupRequestId, reason: String },
    #[serde(rename = "pickup.released")]
    Released {
        request_id: PickupRequestId,
        method: ReleaseMethod,
        released_at: DateTime<Utc>,
    },
    /// A guard released a child outside the normal approval chain
    #[serde(rename = "pickup.emergency_release")]
    EmergencyRelease {
        request_id: PickupRequestId,
        student_id: StudentId,
        released_by: UserId,
        reason: String,
    },
}

impl Notification {
    pub fn event_type(&self) -> &'static str {
        match self {
            Notification::ApprovalRequested { .. } => "pickup.approval_requested",
            Notification::ApprovalResolved { .. } => "pickup.approval_resolved",
            Notification::Confirmed { .. } => "pickup.confirmed",
            Notification::Rejected { .. } => "pickup.rejected",
            Notification::Released { .. } => "pickup.released",
            Notification::EmergencyRelease { .. } => "pickup.emergency_release",
        }
    }

    pub fn request_id(&self) -> PickupRequestId {
        match self {
            Notification::ApprovalRequested { request_id, .. }
            | Notification::ApprovalResolved { request_id, .. }
            | Notification::Confirmed { request_id, .. }
            | Notification::Rejected { request_id, .. }
            | Notification::Released { request_id, .. }
            | Notification::EmergencyRelease { request_id, .. } => *request_id,
        }
    }
}

/// Delivery channel for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification, recipients: &[UserId]) -> anyhow::Result<()>;
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification, recipients: &[UserId]) -> anyhow::Result<()> {
        tracing::info!(
            event = notification.event_type(),
            request_id = %abbrev_uuid(&notification.request_id()),
            recipients = recipients.len(),
            "Notification"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Queue a notification for delivery and return immediately.
    pub fn notify(&self, notification: Notification, recipients: Vec<UserId>) {
        if recipients.is_empty() {
            tracing::debug!(event = notification.event_type(), "No recipients for notification, skipping");
            return;
        }

        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(&notification, &recipients).await {
                counter!("pickupctl_notification_failures_total", "event" => notification.event_type()).increment(1);
                tracing::warn!(
                    event = notification.event_type(),
                    request_id = %abbrev_uuid(&notification.request_id()),
                    "Failed to deliver notification: {:#}",
                    e
                );
            }
        });
    }
}

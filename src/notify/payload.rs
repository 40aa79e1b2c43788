//! Notification payloads and persisted notification records.
//!
//! Both types are serializable so collaborators can forward them unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detector::BreachEvent;
use crate::feed::{ChangeEvent, EventKind};
use crate::geo::GeoPoint;
use crate::ids::{OwnerId, SubjectId};

/// What gets handed to the push / local alert mechanism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Fresh per payload.
    pub id: Uuid,
    /// Alert title.
    pub title: String,
    /// Alert body text.
    pub body: String,
    /// Who should see the alert.
    pub target: SubjectId,
    /// The child the alert is about.
    pub subject: SubjectId,
    /// What happened.
    pub kind: EventKind,
    /// Event time: the sample capture time or the feed record time.
    pub timestamp: DateTime<Utc>,
}

/// A row in the parent's notification history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Record id; appending a duplicate fails.
    pub id: Uuid,
    /// Parent whose feed shows the record.
    pub parent: OwnerId,
    /// Child the record is about.
    pub child: SubjectId,
    /// Child display name at the time of the alert.
    pub child_name: String,
    /// What happened.
    pub kind: EventKind,
    /// Where the child was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Place shown in the feed title: region address, else its label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Radius of the breached region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_m: Option<f64>,
    /// Free text, for non-breach records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

impl NotificationRecord {
    /// A bare record with no location, address or message.
    #[must_use]
    pub fn new(
        parent: impl Into<OwnerId>,
        child: impl Into<SubjectId>,
        child_name: impl Into<String>,
        kind: EventKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent: parent.into(),
            child: child.into(),
            child_name: child_name.into(),
            kind,
            location: None,
            address: None,
            radius_m: None,
            message: None,
            timestamp,
        }
    }

    /// Record written when a child enters a restricted region.
    #[must_use]
    pub fn from_breach(event: &BreachEvent, child_name: &str) -> Self {
        let mut record = Self::new(
            event.region.owner.clone(),
            event.subject.clone(),
            child_name,
            EventKind::BreachAlert,
            event.sample.captured_at,
        );
        record.location = event.sample.point;
        record.address = Some(region_place(event));
        record.radius_m = Some(event.region.radius_m);
        record
    }

    /// One-line title shown in the parent's notification list.
    #[must_use]
    pub fn feed_title(&self) -> String {
        let name = &self.child_name;
        match self.kind {
            EventKind::Login => format!("{name} Login"),
            EventKind::Logout => format!("{name} Logout"),
            EventKind::BreachAlert => {
                let radius = self.radius_m.unwrap_or(crate::region::DEFAULT_RADIUS_M);
                format!(
                    "{name} is in {radius:.0}m of restricted location {}",
                    self.address.as_deref().unwrap_or_default()
                )
            }
            EventKind::ChatMessage => {
                format!("{name}: {}", self.message.as_deref().unwrap_or_default())
            }
        }
    }
}

fn region_place(event: &BreachEvent) -> String {
    match event.region.address.as_deref() {
        Some(addr) if !addr.trim().is_empty() => addr.to_string(),
        _ => event.region.label.clone(),
    }
}

/// Builds the alert for a detected breach.
///
/// The alert goes to the region's owner.
#[must_use]
pub fn compose_breach(event: &BreachEvent, child_name: &str) -> NotificationPayload {
    let mut body = format!(
        "{child_name} has entered your restricted area {}.",
        event.region.label
    );
    if let Some(addr) = event.region.address.as_deref().filter(|a| !a.trim().is_empty()) {
        body.push(' ');
        body.push_str(addr);
    }

    NotificationPayload {
        id: Uuid::new_v4(),
        title: "Restricted Area".to_string(),
        body,
        target: SubjectId::new(event.region.owner.as_str()),
        subject: event.subject.clone(),
        kind: EventKind::BreachAlert,
        timestamp: event.sample.captured_at,
    }
}

/// Builds the alert for a de-duplicated change-feed record.
#[must_use]
pub fn compose_change(event: &ChangeEvent) -> NotificationPayload {
    let p = &event.payload;
    let name = p
        .sender_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| p.sender.as_str());

    let (title, body) = match event.kind {
        EventKind::ChatMessage => (
            p.sender_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "New Message".to_string()),
            p.body
                .clone()
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(|| "You have a new message".to_string()),
        ),
        EventKind::BreachAlert => {
            let mut body = format!("{name} has entered your restricted area.");
            if let Some(addr) = p.address.as_deref().filter(|a| !a.trim().is_empty()) {
                body.push(' ');
                body.push_str(addr);
            }
            ("Restricted Area".to_string(), body)
        }
        EventKind::Login => ("Login".to_string(), format!("{name} logged in")),
        EventKind::Logout => ("Logout".to_string(), format!("{name} logged out")),
    };

    NotificationPayload {
        id: Uuid::new_v4(),
        title,
        body,
        target: p.recipient.clone(),
        subject: p.sender.clone(),
        kind: event.kind,
        timestamp: p.timestamp,
    }
}

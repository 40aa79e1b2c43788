//! Change-feed records.
//!
//! A change feed is a live query over an external collection (chat messages
//! addressed to the user, or alert records addressed to a parent). On connect
//! the feed replays everything that already matches, then streams additions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::geo::GeoPoint;
use crate::ids::{EventId, SubjectId};

/// What a feed record or notification is about.
///
/// The numeric codes are the ones stored in the alert collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A child signed in.
    Login,
    /// A child signed out.
    Logout,
    /// A child entered a restricted region.
    BreachAlert,
    /// A chat message was received.
    ChatMessage,
}

impl EventKind {
    /// Storage code for this kind.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Login => 1,
            Self::Logout => 2,
            Self::BreachAlert => 3,
            Self::ChatMessage => 4,
        }
    }

    /// Decodes a storage code.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownEventKind` for codes outside 1..=4.
    pub const fn from_code(code: u8) -> Result<Self, ValidationError> {
        match code {
            1 => Ok(Self::Login),
            2 => Ok(Self::Logout),
            3 => Ok(Self::BreachAlert),
            4 => Ok(Self::ChatMessage),
            _ => Err(ValidationError::UnknownEventKind { code }),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::Logout => write!(f, "logout"),
            Self::BreachAlert => write!(f, "breach_alert"),
            Self::ChatMessage => write!(f, "chat_message"),
        }
    }
}

/// Body of a feed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    /// Who produced the record: the chat sender, or the child an alert is about.
    pub sender: SubjectId,
    /// Display name of the sender, if the record carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Who the record is addressed to.
    pub recipient: SubjectId,
    /// Message text for chat records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Region label or resolved address for alert records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Where the subject was, for alert records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// When the record was created upstream.
    pub timestamp: DateTime<Utc>,
}

/// One record observed on a change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Stable record id used for deduplication.
    pub id: EventId,
    /// Record kind.
    pub kind: EventKind,
    /// Record body.
    pub payload: ChangePayload,
}

impl ChangeEvent {
    /// A chat message from `sender` to `recipient`.
    #[must_use]
    pub fn chat(
        id: impl Into<EventId>,
        sender: impl Into<SubjectId>,
        recipient: impl Into<SubjectId>,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: EventKind::ChatMessage,
            payload: ChangePayload {
                sender: sender.into(),
                sender_name: None,
                recipient: recipient.into(),
                body: Some(body.into()),
                address: None,
                location: None,
                timestamp,
            },
        }
    }

    /// An alert record of `kind` about `child`, addressed to `parent`.
    #[must_use]
    pub fn alert(
        id: impl Into<EventId>,
        kind: EventKind,
        child: impl Into<SubjectId>,
        parent: impl Into<SubjectId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            payload: ChangePayload {
                sender: child.into(),
                sender_name: None,
                recipient: parent.into(),
                body: None,
                address: None,
                location: None,
                timestamp,
            },
        }
    }

    /// Sets the sender display name.
    #[must_use]
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.payload.sender_name = Some(name.into());
        self
    }

    /// Sets the alert address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.payload.address = Some(address.into());
        self
    }

    /// Creation time of the record.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.payload.timestamp
    }

    /// True if this record is addressed to `user`.
    #[must_use]
    pub fn is_for(&self, user: &SubjectId) -> bool {
        &self.payload.recipient == user
    }
}

/// One delivery from a change feed listener.
///
/// The first batch after a (re)connect is the replay of everything that
/// already matched the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedBatch {
    /// True for the replay delivered right after (re)connecting.
    #[serde(default)]
    pub initial: bool,
    /// Records in feed order.
    pub changes: Vec<ChangeEvent>,
}

impl FeedBatch {
    /// The replay delivered on connect.
    #[must_use]
    pub fn initial(changes: Vec<ChangeEvent>) -> Self {
        Self {
            initial: true,
            changes,
        }
    }

    /// A live batch of additions.
    #[must_use]
    pub fn live(changes: Vec<ChangeEvent>) -> Self {
        Self {
            initial: false,
            changes,
        }
    }
}

//! Identifier newtypes.
//!
//! Subjects, owners, regions and change-feed records are keyed by the opaque
//! string ids the external document database hands out. Each id gets its own
//! type so a region id can never be passed where a subject id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an id without validation.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Wraps an id, rejecting empty or whitespace-only values.
            pub fn parse(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::MissingField {
                        field: $field.to_string(),
                    });
                }
                Ok(Self(id))
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the id is empty or whitespace-only.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// A monitored subject (a child account).
    SubjectId,
    "subject"
);

string_id!(
    /// The owner of a region (the parent account).
    OwnerId,
    "owner"
);

string_id!(
    /// A restricted region.
    RegionId,
    "region_id"
);

string_id!(
    /// A record in an external change feed (chat message or alert document).
    EventId,
    "event_id"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_blank_ids() {
        assert!(SubjectId::parse("   ").is_err());
        assert!(RegionId::parse("").is_err());
        assert_eq!(SubjectId::parse("child-1").unwrap().as_str(), "child-1");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = EventId::from("msg-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"msg-42\"");
        let back: EventId = serde_json::from_str("\"msg-42\"").unwrap();
        assert_eq!(back, id);
    }
}

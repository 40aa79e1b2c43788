//! Abstract collaborator storage traits.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ExecutionError, FenceError};
use crate::ids::{OwnerId, RegionId, SubjectId};
use crate::notify::NotificationRecord;
use crate::region::Region;

/// Errors reported by storage collaborators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    /// Region not found.
    #[error("Region not found: {0}")]
    RegionNotFound(RegionId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl From<StorageError> for FenceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConnectionError(message) => {
                FenceError::Execution(ExecutionError::SourceDisconnected {
                    source_name: format!("storage: {message}"),
                })
            }
            other => FenceError::Execution(ExecutionError::Storage {
                message: other.to_string(),
            }),
        }
    }
}

/// An add / modify / remove notification from the region collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegionChange {
    Added { region: Region },
    Modified { region: Region },
    Removed { id: RegionId },
}

impl RegionChange {
    /// Id of the region this change touches.
    #[must_use]
    pub fn region_id(&self) -> &RegionId {
        match self {
            Self::Added { region } | Self::Modified { region } => &region.id,
            Self::Removed { id } => id,
        }
    }
}

/// The external restricted-region collection.
///
/// Implementations should handle concurrent access safely.
pub trait RegionStore: Send + Sync {
    /// All regions attached to a subject.
    fn list(&self, subject: &SubjectId) -> Result<Vec<Region>, StorageError>;

    /// Insert or replace a region by id.
    fn put(&self, region: Region) -> Result<(), StorageError>;

    /// Delete a region and return it.
    ///
    /// Returns `RegionNotFound` if no region has that id.
    fn delete(&self, id: &RegionId) -> Result<Region, StorageError>;
}

/// The external notification-record collection a parent's alert feed reads.
pub trait NotificationLog: Send + Sync {
    /// Append a record. Returns error if the record id already exists.
    fn append(&self, record: NotificationRecord) -> Result<(), StorageError>;

    /// Records addressed to a parent, newest first.
    fn list_for_parent(&self, parent: &OwnerId) -> Result<Vec<NotificationRecord>, StorageError>;

    /// Total number of stored records.
    fn len(&self) -> Result<usize, StorageError>;

    /// True if no records are stored.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

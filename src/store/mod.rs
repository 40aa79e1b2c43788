//! Collaborator storage interfaces.
//!
//! The engine does not own persistence. These traits describe the slice of
//! the external document database it talks to: the restricted-region
//! collection and the notification-record collection. In-memory backends are
//! provided for embedded use and tests.

mod memory;
mod traits;

pub use memory::{InMemoryNotificationLog, InMemoryRegionStore};
pub use traits::{NotificationLog, RegionChange, RegionStore, StorageError};

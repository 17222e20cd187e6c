pub mod entity_store;
pub mod lock;
pub mod locked;
pub mod version_state;

pub use entity_store::{EntityStore, FileEntityStore, MemoryEntityStore};
pub use lock::{ApplicationLock, LockManager};
pub use locked::LockedApplication;
pub use version_state::{FileVersionStore, MemoryVersionStore, VersionState, VersionStore};

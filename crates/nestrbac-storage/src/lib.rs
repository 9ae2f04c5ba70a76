pub mod integrity;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use integrity::verify_tree;
pub use memory::{InMemorySnapshot, InMemoryStore};
pub use postgres::{PostgresSnapshot, PostgresStore};
pub use traits::{
    AssignmentReader, AssignmentStore, BackendCapabilities, SnapshotStore, StorageError,
    TreeReader, TreeStore,
};

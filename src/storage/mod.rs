//! Storage contracts and the in-memory reference backend.

mod memory;
mod traits;

pub use memory::{
    InMemoryConflictRepository, InMemoryContentStore, InMemoryPreferenceStore, InMemorySourceRegistry,
};
pub use traits::{
    ConflictRepository, ContentStore, Insertion, PreferenceStore, SourceRegistry, StorageError,
};

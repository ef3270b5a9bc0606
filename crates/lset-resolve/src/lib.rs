//! Resolution engine: resource-hierarchy fallback, conflict resolution by
//! kind, and resolution through referenced projects.
//!
//! Nothing here owns state. The engine walks the provider lists hung off a
//! [`ConfigDescription`] and combines their answers; faults in individual
//! providers are contained at this boundary and logged, never surfaced to
//! the settings consumer.

mod engine;
mod references;
mod tree;

pub use engine::{
    entries_by_kind, entries_up_tree, local_entries_by_kind, system_entries_by_kind,
};
pub use references::ReferencedProjectsProvider;
pub use tree::{compact_resource_tree, ResourceNode};

//! Language-settings resolution and persistence engine.
//!
//! [`SettingsService`] is the entry point tying the pieces together: the
//! provider registry and extension catalog, per-project storage documents,
//! change notification, listener-agent bookkeeping, and the background flush
//! queue. The underlying building blocks stay available through the
//! re-exported crates for hosts that embed only parts of the engine.

mod service;

pub use service::{SettingsService, ServiceError, FLUSH_FAMILY};

pub use lset_core::{
    ConfigDescription, EntryKind, EntryStorage, KindMask, ModelError, ProjectDescription,
    ProjectLookup, ProviderRef, SettingEntry, SettingFlags, SettingsProvider,
};
pub use lset_events::{SettingsChangeEvent, SettingsChangeListener, SettingsDelta};
pub use lset_providers::{
    BaseProvider, CatalogBuilder, ExtensionCatalog, ProviderDefinition, ProviderRegistry,
    SerializableProvider,
};
pub use lset_resolve::{
    compact_resource_tree, entries_by_kind, entries_up_tree, local_entries_by_kind,
    system_entries_by_kind, ReferencedProjectsProvider, ResourceNode,
};

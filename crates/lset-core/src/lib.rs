//! Core model for language-settings resolution.
//!
//! This crate holds the data the rest of the workspace agrees on: setting
//! entries and their flags, the per-provider entry storage, the provider
//! capability traits, and the configuration/project descriptions that carry
//! ordered provider lists. It has no I/O besides the XML element type used
//! in the serializable-provider capability signatures.

mod config;
mod entry;
mod guard;
mod provider;
mod storage;

pub use config::{ConfigDescription, ModelError, ProjectDescription, ResolvedView};
pub use entry::{EntryKind, KindMask, SettingEntry, SettingFlags};
pub use guard::ResolutionGuard;
pub use provider::{
    providers_equal, same_provider, EditableCapability, EntryList, ListenerAgent, ProjectLookup,
    ProviderRef, SerializableCapability, SettingsProvider,
};
pub use storage::EntryStorage;

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8Path;
use lset_xml::Element;

use crate::config::ConfigDescription;
use crate::entry::SettingEntry;
use crate::guard::ResolutionGuard;
use crate::storage::EntryStorage;

/// Shared immutable list of entries as handed out by providers and storage.
pub type EntryList = Arc<[SettingEntry]>;

/// Shared handle to a provider. Configurations hold these; identity
/// comparisons go through [`same_provider`].
pub type ProviderRef = Arc<dyn SettingsProvider>;

/// A named source of setting entries for a (configuration, resource,
/// language) triple. This is the base capability tier; optional capabilities
/// are reached through the `as_*` accessors, which return `None` by default.
pub trait SettingsProvider: std::fmt::Debug + Send + Sync {
    /// Globally unique stable id.
    fn id(&self) -> &str;

    /// Display name. Owned because indirection providers forward to a
    /// backing instance that can be swapped at any time.
    fn name(&self) -> String;

    /// Name of the implementation class as persisted in provider elements
    /// and resolved against the extension catalog's factories.
    fn class_name(&self) -> &str {
        "generic"
    }

    /// Entries for the exact position, without hierarchy fallback.
    ///
    /// `None` means "no data here" and sends the resolution engine up the
    /// resource tree; an empty list is an explicit answer and terminal.
    fn entries(
        &self,
        cfg: Option<&ConfigDescription>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
    ) -> Option<EntryList>;

    /// Same as [`entries`](Self::entries) with the resolution guard threaded
    /// through. Providers that recurse into other configurations override
    /// this; everything else ignores the guard.
    fn entries_with_guard(
        &self,
        cfg: Option<&ConfigDescription>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
        _guard: &mut ResolutionGuard,
    ) -> Option<EntryList> {
        self.entries(cfg, resource, language)
    }

    /// Languages this provider applies to; `None` means every language.
    fn language_scope(&self) -> Option<Vec<String>> {
        None
    }

    /// Custom string properties. Values equal to their default (empty
    /// string, `false` for booleans) are never present.
    fn properties(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Raw stored state for delta computation; `None` for providers whose
    /// entries are computed rather than stored.
    fn storage_snapshot(&self) -> Option<EntryStorage> {
        None
    }

    fn as_serializable(&self) -> Option<&dyn SerializableCapability> {
        None
    }

    fn as_editable(&self) -> Option<&dyn EditableCapability> {
        None
    }

    fn as_listener_agent(&self) -> Option<&dyn ListenerAgent> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Capability of providers that own mutable storage and round-trip through
/// the XML storage format. Mutation goes through `&self`: providers are
/// shared behind [`ProviderRef`] and use interior locking.
pub trait SerializableCapability {
    /// Append a full `provider` element (attributes and entries).
    fn serialize_into(&self, parent: &mut Element);

    /// Append a `provider` element carrying attributes only. Used when the
    /// entries go to the other physical store.
    fn serialize_attributes_into(&self, parent: &mut Element);

    /// Append the entry trees to an already-created provider element.
    fn serialize_entries_into(&self, provider_element: &mut Element);

    /// Replace all state from a full provider element.
    fn load_from(&self, element: &Element);

    /// Replace stored entries from a provider element, keeping attributes.
    fn load_entries_from(&self, element: &Element);

    /// Store entries for a position; `None` erases the position.
    fn set_entries(
        &self,
        cfg: Option<&ConfigDescription>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
        entries: Option<Vec<SettingEntry>>,
    );

    /// Whether entries are persisted in the project area rather than the
    /// workspace area.
    fn stores_entries_with_project(&self) -> bool;

    fn is_empty(&self) -> bool;

    fn clear(&self);
}

/// Capability of providers that may be copied into a configuration.
pub trait EditableCapability {
    /// Copy identity and metadata only; entries are explicitly excluded.
    fn clone_shallow(&self) -> ProviderRef;

    /// Copy metadata and all entries.
    fn clone_deep(&self) -> ProviderRef;
}

/// Capability of providers that want to observe the lifetime of the
/// configurations using them.
pub trait ListenerAgent {
    fn register_listener(&self, cfg: Option<&ConfigDescription>);
    fn unregister_listener(&self);
}

/// Access to other projects' configurations, needed when resolving
/// referenced-project entries. Implemented by the workspace facade; the
/// callback style keeps borrowed configurations inside the owner's lock.
pub trait ProjectLookup: Send + Sync {
    /// Run `f` with the configuration, returning whether it was found.
    fn with_configuration(
        &self,
        project: &str,
        cfg_id: &str,
        f: &mut dyn FnMut(&ConfigDescription),
    ) -> bool;
}

/// Object identity of two provider handles (not structural equality).
#[must_use]
pub fn same_provider(a: &ProviderRef, b: &ProviderRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// Structural provider comparison: id, name, language scope and custom
/// properties; with `deep` also the stored entries. Missing properties,
/// empty strings and `false` booleans all count as "not set".
#[must_use]
pub fn providers_equal(a: &dyn SettingsProvider, b: &dyn SettingsProvider, deep: bool) -> bool {
    if a.id() != b.id() || a.name() != b.name() || a.language_scope() != b.language_scope() {
        return false;
    }
    if normalized_properties(&a.properties()) != normalized_properties(&b.properties()) {
        return false;
    }
    if deep {
        let a_storage = a.storage_snapshot().unwrap_or_default();
        let b_storage = b.storage_snapshot().unwrap_or_default();
        if a_storage != b_storage {
            return false;
        }
    }
    true
}

fn normalized_properties(properties: &BTreeMap<String, String>) -> BTreeMap<&str, &str> {
    properties
        .iter()
        .filter(|(_, value)| !value.is_empty() && *value != "false")
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect()
}

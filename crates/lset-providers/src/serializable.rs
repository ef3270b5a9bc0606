use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use camino::{Utf8Path, Utf8PathBuf};
use lset_core::{
    providers_equal, ConfigDescription, EditableCapability, EntryList, EntryStorage, ProviderRef,
    SerializableCapability, SettingEntry, SettingsProvider,
};
use lset_xml::Element;

use crate::catalog::ProviderDefinition;
use crate::entries_xml;

/// Boolean property selecting the project area (instead of the workspace
/// area) as the physical location for persisted entries.
pub const STORE_ENTRIES_WITH_PROJECT: &str = "store-entries-with-project";

pub const ELEM_PROVIDER: &str = "provider";
pub const ATTR_ID: &str = "id";
pub const ATTR_NAME: &str = "name";
pub const ATTR_CLASS: &str = "class";

const ELEM_LANGUAGE_SCOPE: &str = "language-scope";
const ELEM_CONFIGURATION: &str = "configuration";
const ELEM_LANGUAGE: &str = "language";
const ELEM_RESOURCE: &str = "resource";
const ATTR_PROJECT_PATH: &str = "project-relative-path";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ProviderState {
    language_scope: Option<Vec<String>>,
    properties: BTreeMap<String, String>,
    entries: EntryStorage,
}

/// Provider owning mutable entry storage with XML round-trip and copy
/// support. Instances are shared behind [`ProviderRef`], so all mutation
/// goes through interior locking.
#[derive(Debug)]
pub struct SerializableProvider {
    id: String,
    name: String,
    class: String,
    state: RwLock<ProviderState>,
}

impl SerializableProvider {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            class: "generic".to_string(),
            state: RwLock::new(ProviderState::default()),
        }
    }

    #[must_use]
    pub fn from_definition(definition: &ProviderDefinition) -> Self {
        let provider = Self {
            id: definition.id.clone(),
            name: definition.name.clone(),
            class: definition.class.clone(),
            state: RwLock::new(ProviderState::default()),
        };
        {
            let mut state = provider.write();
            state.language_scope = definition.language_scope.clone();
            for (key, value) in &definition.parameters {
                set_property_value(&mut state.properties, key, value);
            }
            if !definition.entries.is_empty() {
                state
                    .entries
                    .set_entries(None, None, None, Some(definition.entries.clone()));
            }
        }
        provider
    }

    /// Reconstruct a provider from a full `provider` element.
    #[must_use]
    pub fn from_element(element: &Element) -> Self {
        let provider = Self {
            id: element.attr(ATTR_ID).unwrap_or_default().to_string(),
            name: element.attr(ATTR_NAME).unwrap_or_default().to_string(),
            class: element
                .attr(ATTR_CLASS)
                .unwrap_or("generic")
                .to_string(),
            state: RwLock::new(ProviderState::default()),
        };
        provider.load_from(element);
        provider
    }

    pub fn set_language_scope(&self, scope: Option<Vec<String>>) {
        self.write().language_scope = scope;
    }

    /// Custom property; missing properties read as the empty string.
    #[must_use]
    pub fn property(&self, key: &str) -> String {
        self.read().properties.get(key).cloned().unwrap_or_default()
    }

    /// Set a custom property. Default values (empty string) are erased
    /// rather than stored so defaults never show up in equality or XML.
    pub fn set_property(&self, key: &str, value: &str) {
        set_property_value(&mut self.write().properties, key, value);
    }

    #[must_use]
    pub fn property_bool(&self, key: &str) -> bool {
        self.property(key) == "true"
    }

    pub fn set_property_bool(&self, key: &str, value: bool) {
        self.set_property(key, if value { "true" } else { "" });
    }

    pub fn set_store_entries_with_project(&self, store: bool) {
        self.set_property_bool(STORE_ENTRIES_WITH_PROJECT, store);
    }

    /// Store entries for a (configuration, resource, language) position;
    /// `None` erases the position ("no data" rather than "empty").
    pub fn set_entries(
        &self,
        cfg: Option<&ConfigDescription>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
        entries: Option<Vec<SettingEntry>>,
    ) {
        self.write()
            .entries
            .set_entries(cfg.map(ConfigDescription::id), resource, language, entries);
    }

    fn read(&self) -> RwLockReadGuard<'_, ProviderState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProviderState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn element_with_attributes(&self) -> Element {
        let state = self.read();
        let mut element = Element::new(ELEM_PROVIDER);
        element.set_attr(ATTR_ID, &self.id);
        element.set_attr(ATTR_NAME, &self.name);
        element.set_attr(ATTR_CLASS, &self.class);
        for (key, value) in &state.properties {
            element.set_attr(key, value);
        }
        if let Some(scope) = &state.language_scope {
            for language in scope {
                element
                    .add_child(ELEM_LANGUAGE_SCOPE)
                    .set_attr(ATTR_ID, language);
            }
        }
        element
    }

    fn append_entry_tree(&self, element: &mut Element) {
        // Regroup storage (cfg → resource → language) into the persisted
        // nesting (cfg → language → resource).
        type ResourceGroup = BTreeMap<Option<Utf8PathBuf>, Vec<SettingEntry>>;
        type LanguageGroup = BTreeMap<Option<String>, ResourceGroup>;
        let mut grouped: BTreeMap<Option<String>, LanguageGroup> = BTreeMap::new();
        {
            let state = self.read();
            for (cfg, resource, language, entries) in state.entries.iter() {
                grouped
                    .entry(cfg.map(ToOwned::to_owned))
                    .or_default()
                    .entry(language.map(ToOwned::to_owned))
                    .or_default()
                    .insert(resource.map(Utf8Path::to_path_buf), entries.to_vec());
            }
        }

        for (cfg, languages) in grouped {
            // Default levels collapse: a `None` key writes no element and
            // children attach one level up.
            let mut cfg_element = cfg.map(|id| {
                let mut element = Element::new(ELEM_CONFIGURATION);
                element.set_attr(ATTR_ID, id);
                element
            });
            for (language, resources) in languages {
                let mut language_element = language.map(|id| {
                    let mut element = Element::new(ELEM_LANGUAGE);
                    element.set_attr(ATTR_ID, id);
                    element
                });
                for (resource, entries) in resources {
                    let target = language_element
                        .as_mut()
                        .or(cfg_element.as_mut())
                        .unwrap_or(&mut *element);
                    match resource {
                        Some(path) => {
                            let resource_element = target.add_child(ELEM_RESOURCE);
                            resource_element.set_attr(ATTR_PROJECT_PATH, path.as_str());
                            entries_xml::append_entries(resource_element, &entries);
                        }
                        None => entries_xml::append_entries(target, &entries),
                    }
                }
                if let Some(language_element) = language_element {
                    cfg_element
                        .as_mut()
                        .unwrap_or(&mut *element)
                        .push_child(language_element);
                }
            }
            if let Some(cfg_element) = cfg_element {
                element.push_child(cfg_element);
            }
        }
    }

    fn parse_entry_tree(
        storage: &mut EntryStorage,
        element: &Element,
        cfg: Option<&str>,
        language: Option<&str>,
        resource: Option<&Utf8Path>,
    ) {
        let mut structural = false;
        for child in element.children() {
            match child.name() {
                ELEM_CONFIGURATION => {
                    structural = true;
                    Self::parse_entry_tree(storage, child, child.attr(ATTR_ID), language, resource);
                }
                ELEM_LANGUAGE => {
                    structural = true;
                    Self::parse_entry_tree(storage, child, cfg, child.attr(ATTR_ID), resource);
                }
                ELEM_RESOURCE => {
                    structural = true;
                    let path = child.attr(ATTR_PROJECT_PATH).map(Utf8Path::new);
                    Self::parse_entry_tree(storage, child, cfg, language, path);
                }
                _ => {}
            }
        }

        let has_entries = element
            .children_named(entries_xml::ELEM_ENTRY)
            .next()
            .is_some();
        if has_entries {
            storage.set_entries(cfg, resource, language, Some(entries_xml::parse_entries(element)));
        } else if !structural && element.name() != ELEM_PROVIDER {
            // a bare structural leaf stores an explicitly empty list
            storage.set_entries(cfg, resource, language, Some(Vec::new()));
        }
    }
}

impl SettingsProvider for SerializableProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn class_name(&self) -> &str {
        &self.class
    }

    fn entries(
        &self,
        cfg: Option<&ConfigDescription>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
    ) -> Option<EntryList> {
        let state = self.read();
        let cfg_id = cfg.map(ConfigDescription::id);
        if let Some(entries) = state.entries.entries(cfg_id, resource, language) {
            return Some(entries);
        }
        // Entries stored language-independent answer for any language the
        // provider's scope admits.
        if let Some(language) = language {
            let in_scope = state
                .language_scope
                .as_ref()
                .is_none_or(|scope| scope.iter().any(|id| id == language));
            if in_scope {
                return state.entries.entries(cfg_id, resource, None);
            }
        }
        None
    }

    fn language_scope(&self) -> Option<Vec<String>> {
        self.read().language_scope.clone()
    }

    fn properties(&self) -> BTreeMap<String, String> {
        self.read().properties.clone()
    }

    fn storage_snapshot(&self) -> Option<EntryStorage> {
        Some(self.read().entries.clone())
    }

    fn as_serializable(&self) -> Option<&dyn SerializableCapability> {
        Some(self)
    }

    fn as_editable(&self) -> Option<&dyn EditableCapability> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl SerializableCapability for SerializableProvider {
    fn serialize_into(&self, parent: &mut Element) {
        let mut element = self.element_with_attributes();
        self.append_entry_tree(&mut element);
        parent.push_child(element);
    }

    fn serialize_attributes_into(&self, parent: &mut Element) {
        parent.push_child(self.element_with_attributes());
    }

    fn serialize_entries_into(&self, provider_element: &mut Element) {
        self.append_entry_tree(provider_element);
    }

    fn load_from(&self, element: &Element) {
        let mut scope: Option<Vec<String>> = None;
        for child in element.children_named(ELEM_LANGUAGE_SCOPE) {
            if let Some(id) = child.attr(ATTR_ID) {
                scope.get_or_insert_with(Vec::new).push(id.to_string());
            }
        }

        let mut properties = BTreeMap::new();
        for (key, value) in element.attrs() {
            if key != ATTR_ID && key != ATTR_NAME && key != ATTR_CLASS {
                set_property_value(&mut properties, key, value);
            }
        }

        let mut entries = EntryStorage::new();
        Self::parse_entry_tree(&mut entries, element, None, None, None);

        let mut state = self.write();
        state.language_scope = scope;
        state.properties = properties;
        state.entries = entries;
    }

    fn load_entries_from(&self, element: &Element) {
        let mut entries = EntryStorage::new();
        Self::parse_entry_tree(&mut entries, element, None, None, None);
        self.write().entries = entries;
    }

    fn set_entries(
        &self,
        cfg: Option<&ConfigDescription>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
        entries: Option<Vec<SettingEntry>>,
    ) {
        SerializableProvider::set_entries(self, cfg, resource, language, entries);
    }

    fn stores_entries_with_project(&self) -> bool {
        self.property_bool(STORE_ENTRIES_WITH_PROJECT)
    }

    fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    fn clear(&self) {
        self.write().entries.clear();
    }
}

impl EditableCapability for SerializableProvider {
    fn clone_shallow(&self) -> ProviderRef {
        let state = self.read();
        let copy = Self::new(self.id.clone(), self.name.clone());
        {
            let mut copy_state = copy.write();
            copy_state.language_scope = state.language_scope.clone();
            copy_state.properties = state.properties.clone();
        }
        Arc::new(copy)
    }

    fn clone_deep(&self) -> ProviderRef {
        let state = self.read();
        let copy = Self::new(self.id.clone(), self.name.clone());
        *copy.write() = state.clone();
        Arc::new(copy)
    }
}

impl PartialEq for SerializableProvider {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && providers_equal(self, other, true)
    }
}

impl Eq for SerializableProvider {}

fn set_property_value(properties: &mut BTreeMap<String, String>, key: &str, value: &str) {
    if value.is_empty() || value == "false" {
        properties.remove(key);
    } else {
        properties.insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use lset_core::SettingFlags;

    use super::*;

    const LANG: &str = "lang.id";
    const LANG_1: &str = "lang.id.1";
    const LANG_2: &str = "lang.id.2";

    fn cfg(id: &str) -> ConfigDescription {
        ConfigDescription::new(id, "Debug")
    }

    fn sample_entries() -> Vec<SettingEntry> {
        vec![
            SettingEntry::macro_def("MACRO0", "value0", SettingFlags::BUILTIN),
            SettingEntry::include_path("path0", SettingFlags::empty()),
            SettingEntry::include_path("path1", SettingFlags::empty()),
        ]
    }

    fn serialized(provider: &SerializableProvider) -> (Element, String) {
        let mut parent = Element::new("test");
        provider.serialize_into(&mut parent);
        let text = parent.to_xml();
        let element = parent.children()[0].clone();
        (element, text)
    }

    #[test]
    fn test_empty_provider() {
        let provider = SerializableProvider::new("p.id", "p.name");
        assert!(provider.is_empty());
        assert!(provider.entries(None, None, None).is_none());

        provider.set_entries(None, None, None, Some(sample_entries()));
        assert!(!provider.is_empty());
        provider.clear();
        assert!(provider.is_empty());
    }

    #[test]
    fn test_property_defaults_are_erased() {
        let provider = SerializableProvider::new("p.id", "p.name");
        assert_eq!(provider.property("parameter"), "");

        provider.set_property("parameter", "value");
        assert_eq!(provider.property("parameter"), "value");
        provider.set_property("parameter", "");
        assert!(provider.properties().is_empty());

        provider.set_property_bool("flag", true);
        assert!(provider.property_bool("flag"));
        provider.set_property_bool("flag", false);
        assert!(provider.properties().is_empty());
    }

    #[test]
    fn test_language_scope_lookup() {
        let provider = SerializableProvider::new("p.id", "p.name");
        let entries = sample_entries();
        provider.set_entries(None, None, None, Some(entries.clone()));

        // no scope: any language falls back to the language-independent list
        assert_eq!(
            provider.entries(None, None, Some(LANG_2)).unwrap().as_ref(),
            entries.as_slice()
        );

        provider.set_language_scope(Some(vec![LANG.to_string(), LANG_1.to_string()]));
        // the scope itself and languages inside it still resolve
        assert!(provider.entries(None, None, None).is_some());
        assert!(provider.entries(None, None, Some(LANG)).is_some());
        // languages outside the scope have no data
        assert!(provider.entries(None, None, Some(LANG_2)).is_none());
    }

    #[test]
    fn test_exact_language_wins_over_fallback() {
        let provider = SerializableProvider::new("p.id", "p.name");
        provider.set_entries(
            None,
            None,
            None,
            Some(vec![SettingEntry::include_path("path_null", SettingFlags::empty())]),
        );
        provider.set_entries(
            None,
            None,
            Some(LANG),
            Some(vec![SettingEntry::include_path("path", SettingFlags::empty())]),
        );

        assert_eq!(
            provider.entries(None, None, Some(LANG)).unwrap()[0].name(),
            "path"
        );
        assert_eq!(
            provider.entries(None, None, None).unwrap()[0].name(),
            "path_null"
        );
    }

    #[test]
    fn test_round_trip_every_position_combination() {
        let config = cfg("cfg.id");
        let resource = Utf8Path::new("src/dir");
        for use_cfg in [false, true] {
            for use_resource in [false, true] {
                for use_language in [false, true] {
                    let provider = SerializableProvider::new("p.id", "p.name");
                    provider.set_language_scope(Some(vec![LANG.to_string()]));
                    provider.set_property("parameter", "custom-value");
                    provider.set_entries(
                        use_cfg.then_some(&config),
                        use_resource.then_some(resource),
                        use_language.then_some(LANG),
                        Some(sample_entries()),
                    );

                    let (element, _) = serialized(&provider);
                    let loaded = SerializableProvider::from_element(&element);
                    assert_eq!(provider, loaded, "cfg={use_cfg} rc={use_resource} lang={use_language}");
                }
            }
        }
    }

    #[test]
    fn test_default_levels_collapse_in_xml() {
        let provider = SerializableProvider::new("p.id", "p.name");
        provider.set_entries(None, None, None, Some(sample_entries()));
        let (_, text) = serialized(&provider);
        assert!(!text.contains("<configuration"));
        assert!(!text.contains("<language"));
        assert!(!text.contains("<resource"));
        assert!(!text.contains("<flag"));
    }

    #[test]
    fn test_non_default_levels_serialize() {
        let config = cfg("cfg.id");
        let provider = SerializableProvider::new("p.id", "p.name");
        provider.set_entries(
            Some(&config),
            Some(Utf8Path::new("dir")),
            Some(LANG),
            Some(sample_entries()),
        );
        let (_, text) = serialized(&provider);
        assert!(text.contains("<configuration"));
        assert!(text.contains("<language"));
        assert!(text.contains("<resource"));
        assert!(text.contains("project-relative-path=\"dir\""));
    }

    #[test]
    fn test_explicit_empty_list_round_trips() {
        let provider = SerializableProvider::new("p.id", "p.name");
        provider.set_entries(None, Some(Utf8Path::new("dir")), None, Some(Vec::new()));

        let (element, _) = serialized(&provider);
        let loaded = SerializableProvider::from_element(&element);
        let stored = loaded.entries(None, Some(Utf8Path::new("dir")), None);
        assert!(stored.is_some());
        assert!(stored.unwrap().is_empty());
    }

    #[test]
    fn test_mixed_positions_round_trip() {
        let config = cfg("cfg.id");
        let provider = SerializableProvider::new("p.id", "p.name");
        provider.set_entries(None, None, None, Some(sample_entries()));
        provider.set_entries(None, None, Some(LANG), Some(vec![SettingEntry::macro_def(
            "M", "1",
            SettingFlags::empty(),
        )]));
        provider.set_entries(
            Some(&config),
            Some(Utf8Path::new("src")),
            Some(LANG_1),
            Some(vec![SettingEntry::library_file("libx.a", SettingFlags::EXPORTED)]),
        );

        let (element, _) = serialized(&provider);
        let loaded = SerializableProvider::from_element(&element);
        assert_eq!(provider, loaded);
    }

    #[test]
    fn test_store_location_round_trips() {
        let provider = SerializableProvider::new("p.id", "p.name");
        assert!(!provider.stores_entries_with_project());
        provider.set_store_entries_with_project(true);

        let (element, text) = serialized(&provider);
        assert!(text.contains(STORE_ENTRIES_WITH_PROJECT));
        let loaded = SerializableProvider::from_element(&element);
        assert!(loaded.stores_entries_with_project());
    }

    #[test]
    fn test_equality() {
        let one = SerializableProvider::new("p.id", "p.name");
        let two = SerializableProvider::new("p.id", "p.name");
        assert_eq!(one, two);

        two.set_property("parameter", "value");
        assert_ne!(one, two);
        two.set_property("parameter", "");
        assert_eq!(one, two);

        two.set_language_scope(Some(vec![LANG.to_string()]));
        assert_ne!(one, two);
        two.set_language_scope(None);
        assert_eq!(one, two);

        two.set_entries(None, None, Some(LANG), Some(sample_entries()));
        assert_ne!(one, two);
        two.set_entries(None, None, Some(LANG), None);
        assert_eq!(one, two);
    }

    #[test]
    fn test_clone_deep_and_shallow() {
        let config = cfg("cfg.id");
        let original = SerializableProvider::new("p.id", "p.name");
        original.set_language_scope(Some(vec![LANG.to_string()]));
        original.set_property("parameter", "value");
        original.set_entries(Some(&config), None, Some(LANG), Some(sample_entries()));

        let deep = original.clone_deep();
        let deep_concrete = deep
            .as_any()
            .downcast_ref::<SerializableProvider>()
            .unwrap();
        assert_eq!(&original, deep_concrete);

        let shallow = original.clone_shallow();
        let shallow_concrete = shallow
            .as_any()
            .downcast_ref::<SerializableProvider>()
            .unwrap();
        // metadata copied, entries explicitly excluded
        assert_eq!(shallow_concrete.property("parameter"), "value");
        assert!(shallow_concrete.is_empty());
        assert_ne!(&original, shallow_concrete);

        // clones share no mutable state with the original
        original.set_property("parameter", "changed");
        assert_eq!(deep_concrete.property("parameter"), "value");
        assert_eq!(shallow_concrete.property("parameter"), "value");
    }
}

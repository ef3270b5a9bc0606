use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8Path;
use lset_core::{
    ConfigDescription, EntryList, EntryStorage, SettingEntry, SettingsProvider,
};

use crate::catalog::ProviderDefinition;

/// Provider exposing the static entries an extension declares.
///
/// The entry list is fixed at construction and returned for every resource
/// of a language within the provider's scope; outside the scope the provider
/// has no data. Base providers are process-wide singletons referenced from
/// configurations, never copied.
#[derive(Debug)]
pub struct BaseProvider {
    id: String,
    name: String,
    class: String,
    language_scope: Option<Vec<String>>,
    parameters: BTreeMap<String, String>,
    entries: EntryList,
}

impl BaseProvider {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        language_scope: Option<Vec<String>>,
        entries: Vec<SettingEntry>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            class: "base".to_string(),
            language_scope,
            parameters: BTreeMap::new(),
            entries: Arc::from(entries),
        }
    }

    #[must_use]
    pub fn from_definition(definition: &ProviderDefinition) -> Self {
        Self {
            id: definition.id.clone(),
            name: definition.name.clone(),
            class: definition.class.clone(),
            language_scope: definition.language_scope.clone(),
            parameters: definition.parameters.clone(),
            entries: Arc::from(definition.entries.clone()),
        }
    }

    fn language_applicable(&self, language: Option<&str>) -> bool {
        match (&self.language_scope, language) {
            (None, _) => true,
            (Some(scope), Some(language)) => scope.iter().any(|id| id == language),
            (Some(_), None) => false,
        }
    }
}

impl SettingsProvider for BaseProvider {
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
        _cfg: Option<&ConfigDescription>,
        _resource: Option<&Utf8Path>,
        language: Option<&str>,
    ) -> Option<EntryList> {
        if self.language_applicable(language) {
            Some(self.entries.clone())
        } else {
            None
        }
    }

    fn language_scope(&self) -> Option<Vec<String>> {
        self.language_scope.clone()
    }

    fn properties(&self) -> BTreeMap<String, String> {
        self.parameters.clone()
    }

    fn storage_snapshot(&self) -> Option<EntryStorage> {
        let mut storage = EntryStorage::new();
        storage.set_entries(None, None, None, Some(self.entries.to_vec()));
        Some(storage)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

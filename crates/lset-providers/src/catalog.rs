use std::collections::BTreeMap;
use std::sync::Arc;

use lset_core::{
    providers_equal, EntryKind, ProviderRef, SettingEntry, SettingFlags, SettingsProvider,
};
use serde::Deserialize;
use thiserror::Error;

use crate::base::BaseProvider;
use crate::serializable::SerializableProvider;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("malformed provider manifest")]
    Manifest(#[from] toml::de::Error),
    #[error("provider manifest entry has unknown kind `{0}`")]
    UnknownKind(String),
}

/// One provider declaration as contributed by an extension: identity, the
/// implementation class to instantiate, default parameters, an optional
/// language scope, whether the provider may be shared across projects, and
/// any statically declared entries.
#[derive(Debug, Clone)]
pub struct ProviderDefinition {
    pub id: String,
    pub name: String,
    pub class: String,
    pub parameters: BTreeMap<String, String>,
    pub language_scope: Option<Vec<String>>,
    pub shareable: bool,
    pub entries: Vec<SettingEntry>,
}

impl Default for ProviderDefinition {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            class: "base".to_string(),
            parameters: BTreeMap::new(),
            language_scope: None,
            shareable: true,
            entries: Vec::new(),
        }
    }
}

type ProviderFactory = Box<dyn Fn(&ProviderDefinition) -> ProviderRef + Send + Sync>;

/// Read-only table of provider definitions and the template instances
/// created from them at startup. Templates are never mutated; configurations
/// either reference them or attach copies made by
/// [`provider_copy`](ExtensionCatalog::provider_copy).
pub struct ExtensionCatalog {
    definitions: BTreeMap<String, ProviderDefinition>,
    templates: BTreeMap<String, ProviderRef>,
}

impl ExtensionCatalog {
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn definition(&self, id: &str) -> Option<&ProviderDefinition> {
        self.definitions.get(id)
    }

    /// The read-only template instance for `id`.
    #[must_use]
    pub fn template(&self, id: &str) -> Option<ProviderRef> {
        self.templates.get(id).cloned()
    }

    /// All template instances keyed by id, in id order.
    #[must_use]
    pub fn templates(&self) -> BTreeMap<String, ProviderRef> {
        self.templates.clone()
    }

    /// Structural comparison against the canonical template for the
    /// provider's id; `deep` also compares stored entries.
    #[must_use]
    pub fn is_equal_extension_provider(
        &self,
        provider: &dyn SettingsProvider,
        deep: bool,
    ) -> bool {
        self.templates.get(provider.id()).is_some_and(|template| {
            template.class_name() == provider.class_name()
                && providers_equal(template.as_ref(), provider, deep)
        })
    }

    /// A copy of the template for attaching to a configuration. `None` when
    /// the template is not copyable (not editable): non-editable extension
    /// providers are process-wide singletons that are referenced, never
    /// duplicated.
    #[must_use]
    pub fn provider_copy(&self, id: &str, deep: bool) -> Option<ProviderRef> {
        let template = self.templates.get(id)?;
        let editable = template.as_editable()?;
        Some(if deep {
            editable.clone_deep()
        } else {
            editable.clone_shallow()
        })
    }
}

impl std::fmt::Debug for ExtensionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionCatalog")
            .field("definitions", &self.definitions.keys())
            .finish_non_exhaustive()
    }
}

/// Builder collecting definitions and per-class factories before the catalog
/// freezes. Factories for the built-in classes (`base`, `generic`) are
/// preinstalled; hosts add factories for custom classes.
pub struct CatalogBuilder {
    definitions: Vec<ProviderDefinition>,
    factories: BTreeMap<String, ProviderFactory>,
}

impl std::fmt::Debug for CatalogBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogBuilder")
            .field("definitions", &self.definitions)
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CatalogBuilder {
    fn new() -> Self {
        let mut factories: BTreeMap<String, ProviderFactory> = BTreeMap::new();
        factories.insert(
            "base".to_string(),
            Box::new(|definition| Arc::new(BaseProvider::from_definition(definition)) as ProviderRef),
        );
        factories.insert(
            "generic".to_string(),
            Box::new(|definition| {
                Arc::new(SerializableProvider::from_definition(definition)) as ProviderRef
            }),
        );
        Self {
            definitions: Vec::new(),
            factories,
        }
    }

    #[must_use]
    pub fn definition(mut self, definition: ProviderDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Add definitions from a TOML manifest.
    pub fn definitions_from_manifest(mut self, text: &str) -> Result<Self, CatalogError> {
        let manifest: Manifest = toml::from_str(text)?;
        for definition in manifest.provider {
            self.definitions.push(definition.into_definition()?);
        }
        Ok(self)
    }

    #[must_use]
    pub fn factory(
        mut self,
        class: impl Into<String>,
        factory: impl Fn(&ProviderDefinition) -> ProviderRef + Send + Sync + 'static,
    ) -> Self {
        self.factories.insert(class.into(), Box::new(factory));
        self
    }

    #[must_use]
    pub fn build(self) -> ExtensionCatalog {
        let mut definitions = BTreeMap::new();
        let mut templates = BTreeMap::new();
        for definition in self.definitions {
            if definitions.contains_key(&definition.id) {
                tracing::warn!(id = %definition.id, "ignoring duplicate provider definition");
                continue;
            }
            match self.factories.get(&definition.class) {
                Some(factory) => {
                    templates.insert(definition.id.clone(), factory(&definition));
                }
                None => {
                    tracing::warn!(
                        id = %definition.id,
                        class = %definition.class,
                        "no factory for provider class, definition kept without template"
                    );
                }
            }
            definitions.insert(definition.id.clone(), definition);
        }
        ExtensionCatalog {
            definitions,
            templates,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    provider: Vec<ManifestProvider>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestProvider {
    id: String,
    name: String,
    #[serde(default = "default_class")]
    class: String,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
    #[serde(default, rename = "language-scope")]
    language_scope: Option<Vec<String>>,
    #[serde(default = "default_shareable")]
    shareable: bool,
    #[serde(default, rename = "entry")]
    entries: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestEntry {
    kind: String,
    name: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    flags: u32,
}

fn default_class() -> String {
    "base".to_string()
}

fn default_shareable() -> bool {
    true
}

impl ManifestProvider {
    fn into_definition(self) -> Result<ProviderDefinition, CatalogError> {
        let entries = self
            .entries
            .into_iter()
            .map(ManifestEntry::into_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ProviderDefinition {
            id: self.id,
            name: self.name,
            class: self.class,
            parameters: self.parameters,
            language_scope: self.language_scope,
            shareable: self.shareable,
            entries,
        })
    }
}

impl ManifestEntry {
    fn into_entry(self) -> Result<SettingEntry, CatalogError> {
        let kind = match self.kind.as_str() {
            "include-path" => EntryKind::IncludePath,
            "include-file" => EntryKind::IncludeFile,
            "macro" => EntryKind::Macro,
            "macro-file" => EntryKind::MacroFile,
            "library-path" => EntryKind::LibraryPath,
            "library-file" => EntryKind::LibraryFile,
            other => return Err(CatalogError::UnknownKind(other.to_string())),
        };
        let value = if kind == EntryKind::Macro {
            self.value
        } else {
            None
        };
        Ok(SettingEntry::new(
            kind,
            self.name,
            value,
            SettingFlags::from_bits_truncate(self.flags),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
        [[provider]]
        id = "compiler.builtins"
        name = "Compiler Built-in Settings"
        language-scope = ["c", "cpp"]

        [[provider.entry]]
        kind = "include-path"
        name = "/usr/include"
        flags = 1

        [[provider.entry]]
        kind = "macro"
        name = "__STDC__"
        value = "1"
        flags = 1

        [[provider]]
        id = "user.settings"
        name = "User Settings"
        class = "generic"
        shareable = false

        [provider.parameters]
        parameter = "custom-value"
    "#;

    fn catalog() -> ExtensionCatalog {
        ExtensionCatalog::builder()
            .definitions_from_manifest(MANIFEST)
            .unwrap()
            .build()
    }

    #[test]
    fn test_manifest_definitions() {
        let catalog = catalog();
        let builtins = catalog.definition("compiler.builtins").unwrap();
        assert_eq!(builtins.class, "base");
        assert!(builtins.shareable);
        assert_eq!(builtins.entries.len(), 2);
        assert_eq!(builtins.entries[1].value(), Some("1"));
        assert_eq!(
            builtins.language_scope,
            Some(vec!["c".to_string(), "cpp".to_string()])
        );

        let user = catalog.definition("user.settings").unwrap();
        assert_eq!(user.class, "generic");
        assert!(!user.shareable);
        assert_eq!(user.parameters.get("parameter").unwrap(), "custom-value");
    }

    #[test]
    fn test_manifest_unknown_kind_is_error() {
        let text = r#"
            [[provider]]
            id = "p"
            name = "P"
            [[provider.entry]]
            kind = "framework-path"
            name = "/Library"
        "#;
        let err = ExtensionCatalog::builder()
            .definitions_from_manifest(text)
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownKind(kind) if kind == "framework-path"));
    }

    #[test]
    fn test_templates_are_created_per_class() {
        let catalog = catalog();
        let base = catalog.template("compiler.builtins").unwrap();
        assert!(base.as_editable().is_none());
        assert_eq!(base.entries(None, None, Some("c")).unwrap().len(), 2);

        let generic = catalog.template("user.settings").unwrap();
        assert!(generic.as_editable().is_some());
        assert!(catalog.template("no.such.provider").is_none());
    }

    #[test]
    fn test_provider_copy_requires_editable() {
        let catalog = catalog();
        // base providers are singletons, never duplicated
        assert!(catalog.provider_copy("compiler.builtins", true).is_none());

        let deep = catalog.provider_copy("user.settings", true).unwrap();
        assert!(catalog.is_equal_extension_provider(deep.as_ref(), true));

        let shallow_a = catalog.provider_copy("user.settings", false).unwrap();
        let shallow_b = catalog.provider_copy("user.settings", false).unwrap();
        assert!(!lset_core::same_provider(&shallow_a, &shallow_b));
        // metadata-only copies still match the (entry-less) template shallowly
        assert!(catalog.is_equal_extension_provider(shallow_a.as_ref(), false));
    }

    #[test]
    fn test_is_equal_extension_provider() {
        let catalog = catalog();
        let copy = catalog.provider_copy("user.settings", true).unwrap();
        assert!(catalog.is_equal_extension_provider(copy.as_ref(), true));

        let serializable = copy
            .as_any()
            .downcast_ref::<SerializableProvider>()
            .unwrap();
        serializable.set_property("parameter", "diverged");
        assert!(!catalog.is_equal_extension_provider(copy.as_ref(), true));
        serializable.set_property("parameter", "custom-value");
        assert!(catalog.is_equal_extension_provider(copy.as_ref(), true));

        serializable.set_entries(None, None, None, Some(Vec::new()));
        assert!(!catalog.is_equal_extension_provider(copy.as_ref(), true));
        assert!(catalog.is_equal_extension_provider(copy.as_ref(), false));
    }

    #[test]
    fn test_custom_factory() {
        let definition = ProviderDefinition {
            id: "custom.provider".to_string(),
            class: "custom".to_string(),
            ..ProviderDefinition::default()
        };
        let catalog = ExtensionCatalog::builder()
            .definition(definition)
            .factory("custom", |definition| {
                Arc::new(BaseProvider::from_definition(definition)) as ProviderRef
            })
            .build();
        assert!(catalog.template("custom.provider").is_some());
    }

    #[test]
    fn test_duplicate_definition_keeps_first() {
        let first = ProviderDefinition {
            id: "p".to_string(),
            name: "first".to_string(),
            ..ProviderDefinition::default()
        };
        let second = ProviderDefinition {
            id: "p".to_string(),
            name: "second".to_string(),
            ..ProviderDefinition::default()
        };
        let catalog = ExtensionCatalog::builder()
            .definition(first)
            .definition(second)
            .build();
        assert_eq!(catalog.definition("p").unwrap().name, "first");
    }
}

use std::collections::BTreeMap;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::entry::SettingEntry;
use crate::provider::ProviderRef;

/// Per-configuration resolved view used for change detection: for every
/// (language, resource) position the entries contributed by the
/// configuration's providers, in provider order. The `None` resource is the
/// default position and maps to the project resource in change events.
pub type ResolvedView = BTreeMap<(Option<String>, Option<Utf8PathBuf>), Vec<SettingEntry>>;

/// Structural-invariant violations raised synchronously at the mutation
/// site. The configuration is left unchanged when these are returned.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("duplicate provider id `{0}` in provider list")]
    DuplicateProviderId(String),
    #[error("configuration `{0}` is read-only")]
    ReadOnlyConfiguration(String),
}

/// A build configuration as seen by this engine: an id/name pair, an ordered
/// provider list (order = precedence), declared project references, and a
/// writable flag distinguishing editable descriptions from read-only
/// snapshots.
#[derive(Debug)]
pub struct ConfigDescription {
    id: String,
    name: String,
    writable: bool,
    providers: Vec<ProviderRef>,
    references: Vec<(String, String)>,
    baseline: Mutex<ResolvedView>,
}

impl ConfigDescription {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            writable: true,
            providers: Vec::new(),
            references: Vec::new(),
            baseline: Mutex::new(ResolvedView::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn set_writable(&mut self, writable: bool) {
        self.writable = writable;
    }

    #[must_use]
    pub fn providers(&self) -> &[ProviderRef] {
        &self.providers
    }

    /// Replace the provider list. Rejected without touching current state if
    /// the configuration is read-only or the list repeats an id.
    pub fn set_providers(&mut self, providers: Vec<ProviderRef>) -> Result<(), ModelError> {
        self.check_writable()?;
        let mut seen = FxHashSet::default();
        for provider in &providers {
            if !seen.insert(provider.id().to_string()) {
                return Err(ModelError::DuplicateProviderId(provider.id().to_string()));
            }
        }
        self.providers = providers;
        Ok(())
    }

    /// Ordered (project name, configuration id) references this
    /// configuration declares.
    #[must_use]
    pub fn references(&self) -> &[(String, String)] {
        &self.references
    }

    pub fn set_references(
        &mut self,
        references: Vec<(String, String)>,
    ) -> Result<(), ModelError> {
        self.check_writable()?;
        self.references = references;
        Ok(())
    }

    /// Resolved view captured at the last load/serialization, used as the
    /// "before" side of delta computation.
    #[must_use]
    pub fn baseline(&self) -> ResolvedView {
        self.baseline
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Reset the delta baseline; called once the current state is persisted
    /// or freshly loaded.
    pub fn set_baseline(&self, view: ResolvedView) {
        *self
            .baseline
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = view;
    }

    fn check_writable(&self) -> Result<(), ModelError> {
        if self.writable {
            Ok(())
        } else {
            Err(ModelError::ReadOnlyConfiguration(self.id.clone()))
        }
    }
}

impl Clone for ConfigDescription {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            writable: self.writable,
            providers: self.providers.clone(),
            references: self.references.clone(),
            baseline: Mutex::new(self.baseline()),
        }
    }
}

/// A project as seen by this engine: a name, the filesystem root used for
/// project-area storage, and its configurations.
#[derive(Debug, Clone)]
pub struct ProjectDescription {
    name: String,
    root: Utf8PathBuf,
    configurations: Vec<ConfigDescription>,
}

impl ProjectDescription {
    pub fn new(name: impl Into<String>, root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            configurations: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn root(&self) -> &Utf8PathBuf {
        &self.root
    }

    pub fn add_configuration(&mut self, configuration: ConfigDescription) {
        self.configurations.push(configuration);
    }

    #[must_use]
    pub fn configurations(&self) -> &[ConfigDescription] {
        &self.configurations
    }

    pub fn configurations_mut(&mut self) -> &mut [ConfigDescription] {
        &mut self.configurations
    }

    #[must_use]
    pub fn configuration_by_id(&self, id: &str) -> Option<&ConfigDescription> {
        self.configurations.iter().find(|cfg| cfg.id() == id)
    }

    pub fn configuration_by_id_mut(&mut self, id: &str) -> Option<&mut ConfigDescription> {
        self.configurations.iter_mut().find(|cfg| cfg.id() == id)
    }
}

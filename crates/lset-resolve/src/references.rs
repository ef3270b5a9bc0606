use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use camino::Utf8Path;
use lset_core::{
    ConfigDescription, EntryList, KindMask, ProjectLookup, ResolutionGuard, SettingEntry,
    SettingFlags, SettingsProvider,
};

use crate::engine::entries_by_kind_guarded;

/// Provider whose entries are computed from the configuration's declared
/// project references instead of stored.
///
/// For each referenced configuration, in declaration order, the provider
/// resolves that configuration's own entries and re-exposes the ones flagged
/// `EXPORTED`, with the flag stripped so exported-ness never propagates
/// transitively. The resolution guard is threaded through the recursion, so
/// reference cycles (including self-references) terminate: a configuration
/// contributes at most once per top-level resolution.
#[derive(Debug)]
pub struct ReferencedProjectsProvider {
    id: String,
    name: String,
    lookup: RwLock<Weak<dyn ProjectLookup>>,
}

impl ReferencedProjectsProvider {
    pub const DEFAULT_ID: &'static str = "settings.referenced.projects";

    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lookup: RwLock::new(Weak::<UnboundLookup>::new()),
        }
    }

    /// Bind the workspace lookup the provider resolves references through.
    /// An unbound provider degrades to "no entries".
    pub fn bind(&self, lookup: &Arc<dyn ProjectLookup>) {
        *self
            .lookup
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(lookup);
    }

    fn lookup(&self) -> Option<Arc<dyn ProjectLookup>> {
        self.lookup
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }
}

/// Placeholder for the unbound state; `Weak::new` needs a sized type.
struct UnboundLookup;

impl ProjectLookup for UnboundLookup {
    fn with_configuration(
        &self,
        _project: &str,
        _cfg_id: &str,
        _f: &mut dyn FnMut(&ConfigDescription),
    ) -> bool {
        false
    }
}

impl SettingsProvider for ReferencedProjectsProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn class_name(&self) -> &str {
        "referenced-projects"
    }

    fn entries(
        &self,
        cfg: Option<&ConfigDescription>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
    ) -> Option<EntryList> {
        let mut guard = ResolutionGuard::new();
        self.entries_with_guard(cfg, resource, language, &mut guard)
    }

    fn entries_with_guard(
        &self,
        cfg: Option<&ConfigDescription>,
        _resource: Option<&Utf8Path>,
        language: Option<&str>,
        guard: &mut ResolutionGuard,
    ) -> Option<EntryList> {
        let cfg = cfg?;
        let lookup = self.lookup()?;

        let mut collected: Vec<SettingEntry> = Vec::new();
        for (project, cfg_id) in cfg.references() {
            if !guard.enter(project, cfg_id) {
                tracing::debug!(%project, %cfg_id, "reference already visited, skipping");
                continue;
            }
            let found = lookup.with_configuration(project, cfg_id, &mut |referenced| {
                // resolve at the referenced project's root so configuration-wide
                // defaults participate through the hierarchy walk
                let root = Utf8Path::new("");
                let resolved = entries_by_kind_guarded(
                    referenced,
                    Some(root),
                    language,
                    KindMask::ALL,
                    None,
                    guard,
                );
                for entry in resolved {
                    if entry.has_flag(SettingFlags::EXPORTED) {
                        collected.push(entry.with_flags(entry.flags() - SettingFlags::EXPORTED));
                    }
                }
            });
            if !found {
                tracing::warn!(%project, %cfg_id, "referenced configuration not found");
            }
        }
        Some(Arc::from(collected))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

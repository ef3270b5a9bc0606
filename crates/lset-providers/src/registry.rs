use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use camino::Utf8Path;
use lset_core::{
    ConfigDescription, EntryList, EntryStorage, ListenerAgent, ProviderRef, ResolutionGuard,
    SettingsProvider,
};

use crate::catalog::ExtensionCatalog;

/// Process-wide table of raw provider instances keyed by id. Mutated only
/// through [`ProviderRegistry::set_workspace_providers`], which swaps the
/// whole map under the write lock; readers never observe a partial update.
#[derive(Debug, Default)]
struct ProviderTable {
    raw: RwLock<BTreeMap<String, ProviderRef>>,
}

impl ProviderTable {
    fn get(&self, id: &str) -> Option<ProviderRef> {
        self.raw
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn snapshot(&self) -> BTreeMap<String, ProviderRef> {
        self.raw
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, new: BTreeMap<String, ProviderRef>) -> BTreeMap<String, ProviderRef> {
        let mut raw = self.raw.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut raw, new)
    }
}

/// Stable indirection handle for a provider id.
///
/// Configurations hold the handle; every read forwards to whatever raw
/// instance currently backs the id, so the backing implementation can be
/// hot-swapped workspace-wide without invalidating the references. The raw
/// instance is deliberately not cached.
pub struct WorkspaceProvider {
    id: String,
    table: Arc<ProviderTable>,
    live_refs: AtomicUsize,
}

impl WorkspaceProvider {
    /// Current backing instance, or `None` while the id is unresolved (reads
    /// then degrade to "no entries").
    #[must_use]
    pub fn raw(&self) -> Option<ProviderRef> {
        self.table.get(&self.id)
    }

    /// Count of live configurations referencing this handle. The raw backing
    /// is registered as a listener agent only while this is positive.
    #[must_use]
    pub fn live_refs(&self) -> usize {
        self.live_refs.load(Ordering::SeqCst)
    }

    pub fn increment_live_refs(&self) -> usize {
        self.live_refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn decrement_live_refs(&self) -> usize {
        let previous = self
            .live_refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}

impl std::fmt::Debug for WorkspaceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceProvider")
            .field("id", &self.id)
            .field("live_refs", &self.live_refs)
            .finish_non_exhaustive()
    }
}

impl SettingsProvider for WorkspaceProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> String {
        self.raw().map(|raw| raw.name()).unwrap_or_default()
    }

    fn class_name(&self) -> &str {
        "workspace"
    }

    fn entries(
        &self,
        cfg: Option<&ConfigDescription>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
    ) -> Option<EntryList> {
        self.raw()
            .and_then(|raw| raw.entries(cfg, resource, language))
    }

    fn entries_with_guard(
        &self,
        cfg: Option<&ConfigDescription>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
        guard: &mut ResolutionGuard,
    ) -> Option<EntryList> {
        self.raw()
            .and_then(|raw| raw.entries_with_guard(cfg, resource, language, guard))
    }

    fn language_scope(&self) -> Option<Vec<String>> {
        self.raw().and_then(|raw| raw.language_scope())
    }

    fn properties(&self) -> BTreeMap<String, String> {
        self.raw().map(|raw| raw.properties()).unwrap_or_default()
    }

    fn storage_snapshot(&self) -> Option<EntryStorage> {
        self.raw().and_then(|raw| raw.storage_snapshot())
    }

    fn as_listener_agent(&self) -> Option<&dyn ListenerAgent> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ListenerAgent for WorkspaceProvider {
    fn register_listener(&self, _cfg: Option<&ConfigDescription>) {
        // the raw provider can change at any time, resolve at call time
        if let Some(agent) = self.raw().as_deref().and_then(SettingsProvider::as_listener_agent) {
            agent.register_listener(None);
        }
    }

    fn unregister_listener(&self) {
        if let Some(agent) = self.raw().as_deref().and_then(SettingsProvider::as_listener_agent) {
            agent.unregister_listener();
        }
    }
}

/// Result of one workspace-provider replacement: the raw tables before and
/// after the swap. The facade derives persistence, listener and notification
/// side effects from the identity diff.
#[derive(Debug)]
pub struct WorkspaceProvidersSwap {
    pub old: BTreeMap<String, ProviderRef>,
    pub new: BTreeMap<String, ProviderRef>,
}

impl WorkspaceProvidersSwap {
    /// Ids whose backing instance changed identity, in id order.
    #[must_use]
    pub fn changed_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .old
            .keys()
            .chain(self.new.keys())
            .map(String::as_str)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.retain(|id| {
            match (self.old.get(*id), self.new.get(*id)) {
                (Some(old), Some(new)) => !lset_core::same_provider(old, new),
                (None, None) => false,
                _ => true,
            }
        });
        ids
    }
}

/// Registry of workspace-level providers: the extension catalog, the raw
/// backing table and the stable wrapper handles.
#[derive(Debug)]
pub struct ProviderRegistry {
    catalog: ExtensionCatalog,
    table: Arc<ProviderTable>,
    wrappers: RwLock<BTreeMap<String, Arc<WorkspaceProvider>>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(catalog: ExtensionCatalog) -> Self {
        let table = Arc::new(ProviderTable::default());
        table.replace(catalog.templates());
        Self {
            catalog,
            table,
            wrappers: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    /// The stable wrapper for `id`, created on first request. Never `None`,
    /// even when no raw provider backs the id yet.
    #[must_use]
    pub fn workspace_provider(&self, id: &str) -> ProviderRef {
        self.workspace_provider_handle(id)
    }

    #[must_use]
    pub fn workspace_provider_handle(&self, id: &str) -> Arc<WorkspaceProvider> {
        let mut wrappers = self.wrappers.write().unwrap_or_else(PoisonError::into_inner);
        wrappers
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(WorkspaceProvider {
                    id: id.to_string(),
                    table: Arc::clone(&self.table),
                    live_refs: AtomicUsize::new(0),
                })
            })
            .clone()
    }

    /// Wrapper handles for every currently backed id, in id order.
    #[must_use]
    pub fn workspace_providers(&self) -> Vec<ProviderRef> {
        self.table
            .snapshot()
            .into_keys()
            .map(|id| self.workspace_provider(&id))
            .collect()
    }

    #[must_use]
    pub fn raw_provider_by_id(&self, id: &str) -> Option<ProviderRef> {
        self.table.get(id)
    }

    /// Snapshot of all raw backing instances, in id order.
    #[must_use]
    pub fn raw_providers(&self) -> Vec<ProviderRef> {
        self.table.snapshot().into_values().collect()
    }

    /// Unwrap a workspace wrapper to its current backing instance; a raw
    /// provider is returned as itself.
    #[must_use]
    pub fn raw_provider(&self, provider: &ProviderRef) -> Option<ProviderRef> {
        if Self::is_workspace_provider(provider) {
            self.raw_provider_by_id(provider.id())
        } else {
            Some(provider.clone())
        }
    }

    #[must_use]
    pub fn is_workspace_provider(provider: &ProviderRef) -> bool {
        provider.as_any().is::<WorkspaceProvider>()
    }

    /// Atomically replace the raw backing table.
    ///
    /// The new table starts from the extension-catalog templates; providers
    /// in `providers` override their ids (workspace wrappers in the list are
    /// unwrapped to their current backing first). `None` resets every id to
    /// its catalog definition. Ids previously backed only by user-defined
    /// providers and absent from `providers` revert or become unresolved.
    pub fn set_workspace_providers(
        &self,
        providers: Option<&[ProviderRef]>,
    ) -> WorkspaceProvidersSwap {
        let mut new = self.catalog.templates();
        if let Some(providers) = providers {
            for provider in providers {
                let raw = if Self::is_workspace_provider(provider) {
                    self.raw_provider_by_id(provider.id())
                } else {
                    Some(provider.clone())
                };
                if let Some(raw) = raw {
                    new.insert(raw.id().to_string(), raw);
                }
            }
        }
        let old = self.table.replace(new.clone());
        WorkspaceProvidersSwap { old, new }
    }
}

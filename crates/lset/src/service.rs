use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use lset_core::{
    ConfigDescription, KindMask, ListenerAgent, ProjectDescription, ProjectLookup, ProviderRef,
    SettingEntry,
};
use lset_events::{event_for_project, reset_baseline, ListenerList, SettingsChangeListener};
use lset_persist::PersistError;
use lset_providers::{ExtensionCatalog, ProviderRegistry, WorkspaceProvider};
use lset_resolve::ReferencedProjectsProvider;
use lset_worker::{Task, Worker};
use thiserror::Error;

/// Job family of the background storage flushes; join it to wait for
/// outstanding writes.
pub const FLUSH_FAMILY: &str = "lset.flush";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown project `{0}`")]
    UnknownProject(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("failed to queue background flush: {0}")]
    Queue(String),
}

struct ServiceInner {
    registry: ProviderRegistry,
    listeners: Arc<ListenerList>,
    state_dir: Utf8PathBuf,
    // one writer at a time per workspace; documents are full replacements,
    // so racing writers degrade to last-write-wins, never to a torn file
    store_lock: Arc<Mutex<()>>,
    projects: RwLock<BTreeMap<String, Arc<RwLock<ProjectDescription>>>>,
    worker: Worker,
}

/// The engine facade: owns the provider registry, the loaded projects, the
/// change-listener registry and the background flush queue, and wires every
/// mutating operation to persistence and notification.
#[derive(Clone)]
pub struct SettingsService {
    inner: Arc<ServiceInner>,
}

impl SettingsService {
    /// Create the service and load persisted workspace-level providers.
    /// Must run inside a tokio runtime (the flush queue spawns a worker).
    #[must_use]
    pub fn new(catalog: ExtensionCatalog, state_dir: impl Into<Utf8PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let registry = ProviderRegistry::new(catalog);
        match lset_persist::load_workspace_document(registry.catalog(), &state_dir) {
            Ok(Some(providers)) => {
                registry.set_workspace_providers(Some(&providers));
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(%err, "could not load workspace language settings");
            }
        }
        Self {
            inner: Arc::new(ServiceInner {
                registry,
                listeners: Arc::new(ListenerList::new()),
                state_dir,
                store_lock: Arc::new(Mutex::new(())),
                projects: RwLock::new(BTreeMap::new()),
                worker: Worker::new(),
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn state_dir(&self) -> &Utf8Path {
        &self.inner.state_dir
    }

    pub fn register_listener(&self, listener: Arc<dyn SettingsChangeListener>) {
        self.inner.listeners.register(listener);
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn SettingsChangeListener>) {
        self.inner.listeners.unregister(listener);
    }

    /// Lookup used by computed providers to reach other projects.
    #[must_use]
    pub fn project_lookup(&self) -> Arc<dyn ProjectLookup> {
        self.inner.clone()
    }

    /// A referenced-projects provider bound to this service's projects.
    #[must_use]
    pub fn referenced_projects_provider(&self) -> Arc<ReferencedProjectsProvider> {
        let provider = ReferencedProjectsProvider::new(
            ReferencedProjectsProvider::DEFAULT_ID,
            "Referenced Projects",
        );
        provider.bind(&self.project_lookup());
        Arc::new(provider)
    }

    /// Attach a project: load its persisted provider lists (a missing store
    /// keeps the given lists, a malformed one degrades to them), capture the
    /// delta baselines so loading never fires events, and register listener
    /// agents that became live.
    pub fn add_project(&self, mut project: ProjectDescription) {
        match lset_persist::load_project(&mut project, &self.inner.state_dir, &self.inner.registry)
        {
            Ok(loaded) => {
                tracing::debug!(project = project.name(), loaded, "project settings loaded");
            }
            Err(err) => {
                tracing::error!(
                    %err,
                    project = project.name(),
                    "could not load project settings, continuing with defaults"
                );
            }
        }
        for cfg in project.configurations() {
            reset_baseline(cfg);
        }
        let pairs = agent_pairs(&project);
        self.inner
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project.name().to_string(), Arc::new(RwLock::new(project)));
        re_register(&[], &pairs);
    }

    /// Detach a project (closed or deleted), unregistering its live
    /// listener agents.
    pub fn remove_project(&self, name: &str) -> bool {
        let removed = self
            .inner
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        let Some(handle) = removed else {
            return false;
        };
        let project = handle.read().unwrap_or_else(PoisonError::into_inner);
        re_register(&agent_pairs(&project), &[]);
        true
    }

    /// Read access to a project description.
    pub fn with_project<R>(
        &self,
        name: &str,
        f: impl FnOnce(&ProjectDescription) -> R,
    ) -> Result<R, ServiceError> {
        let handle = self.project_handle(name)?;
        let project = handle.read().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&project))
    }

    /// Apply a mutation to a project description. Listener agents whose
    /// (provider, configuration) liveness changed are re-registered; the
    /// mutation is not persisted until a serialize or flush.
    pub fn update_project<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ProjectDescription) -> R,
    ) -> Result<R, ServiceError> {
        let handle = self.project_handle(name)?;
        let (result, old_pairs, new_pairs) = {
            let mut project = handle.write().unwrap_or_else(PoisonError::into_inner);
            let old_pairs = agent_pairs(&project);
            let result = f(&mut project);
            let new_pairs = agent_pairs(&project);
            (result, old_pairs, new_pairs)
        };
        re_register(&old_pairs, &new_pairs);
        Ok(result)
    }

    /// Serialize one project's settings now and fire the change event if
    /// its resolved view changed since the last serialization.
    pub fn serialize_project(&self, name: &str) -> Result<(), ServiceError> {
        let handle = self.project_handle(name)?;
        serialize_and_notify(
            &handle,
            &self.inner.state_dir,
            &self.inner.store_lock,
            &self.inner.listeners,
        )?;
        Ok(())
    }

    /// Queue a background flush of one project's settings. Use
    /// [`join_flushes`](Self::join_flushes) to wait for completion.
    pub fn schedule_flush(&self, name: &str) -> Result<(), ServiceError> {
        let handle = self.project_handle(name)?;
        self.inner
            .worker
            .execute(FlushTask {
                project: handle,
                state_dir: self.inner.state_dir.clone(),
                store_lock: Arc::clone(&self.inner.store_lock),
                listeners: Arc::clone(&self.inner.listeners),
            })
            .map_err(|err| ServiceError::Queue(err.to_string()))
    }

    /// Wait until all queued flushes have been written.
    pub async fn join_flushes(&self) {
        self.inner.worker.join_family(FLUSH_FAMILY).await;
    }

    #[must_use]
    pub fn workspace_provider(&self, id: &str) -> ProviderRef {
        self.inner.registry.workspace_provider(id)
    }

    /// Replace the workspace-level provider backings (`None` resets to the
    /// extension defaults), persist the workspace document, swap listener
    /// registrations for backings still referenced by live configurations,
    /// and fire change events for projects whose resolved views changed.
    pub fn set_workspace_providers(
        &self,
        providers: Option<&[ProviderRef]>,
    ) -> Result<(), ServiceError> {
        let swap = self.inner.registry.set_workspace_providers(providers);

        for id in swap.changed_ids() {
            let wrapper = self.inner.registry.workspace_provider_handle(id);
            if wrapper.live_refs() == 0 {
                // not referenced by any live configuration: stay lazy
                continue;
            }
            if let Some(agent) = swap.old.get(id).and_then(|p| p.as_listener_agent()) {
                guarded_unregister(agent);
            }
            if let Some(agent) = swap.new.get(id).and_then(|p| p.as_listener_agent()) {
                guarded_register(agent, None);
            }
        }

        {
            let _guard = self
                .inner
                .store_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            lset_persist::serialize_workspace_document(
                &self.inner.registry.raw_providers(),
                self.inner.registry.catalog(),
                &self.inner.state_dir,
            )?;
        }

        let handles: Vec<Arc<RwLock<ProjectDescription>>> = self
            .inner
            .projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut events = Vec::new();
        for handle in handles {
            let project = handle.read().unwrap_or_else(PoisonError::into_inner);
            let event = event_for_project(&project);
            if !event.is_empty() {
                events.push(event);
            }
        }
        for event in events {
            self.inner.listeners.notify(&event);
        }
        Ok(())
    }

    /// Conflict-resolved entries for a configuration of a loaded project.
    pub fn setting_entries_by_kind(
        &self,
        project: &str,
        cfg_id: &str,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
        kinds: KindMask,
    ) -> Result<Vec<SettingEntry>, ServiceError> {
        let cfg = self.clone_configuration(project, cfg_id)?;
        Ok(lset_resolve::entries_by_kind(&cfg, resource, language, kinds))
    }

    pub fn local_setting_entries_by_kind(
        &self,
        project: &str,
        cfg_id: &str,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
        kinds: KindMask,
    ) -> Result<Vec<SettingEntry>, ServiceError> {
        let cfg = self.clone_configuration(project, cfg_id)?;
        Ok(lset_resolve::local_entries_by_kind(&cfg, resource, language, kinds))
    }

    pub fn system_setting_entries_by_kind(
        &self,
        project: &str,
        cfg_id: &str,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
        kinds: KindMask,
    ) -> Result<Vec<SettingEntry>, ServiceError> {
        let cfg = self.clone_configuration(project, cfg_id)?;
        Ok(lset_resolve::system_entries_by_kind(&cfg, resource, language, kinds))
    }

    fn clone_configuration(
        &self,
        project: &str,
        cfg_id: &str,
    ) -> Result<ConfigDescription, ServiceError> {
        let handle = self.project_handle(project)?;
        let project_guard = handle.read().unwrap_or_else(PoisonError::into_inner);
        project_guard
            .configuration_by_id(cfg_id)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownProject(format!("{project}/{cfg_id}")))
    }

    fn project_handle(&self, name: &str) -> Result<Arc<RwLock<ProjectDescription>>, ServiceError> {
        self.inner
            .projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownProject(name.to_string()))
    }
}

impl ProjectLookup for ServiceInner {
    fn with_configuration(
        &self,
        project: &str,
        cfg_id: &str,
        f: &mut dyn FnMut(&ConfigDescription),
    ) -> bool {
        // clone the configuration out so no lock is held while the callback
        // recurses into other projects (reference chains may cycle back)
        let handle = self
            .projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project)
            .cloned();
        let Some(handle) = handle else {
            return false;
        };
        let cfg = {
            let project = handle.read().unwrap_or_else(PoisonError::into_inner);
            project.configuration_by_id(cfg_id).cloned()
        };
        match cfg {
            Some(cfg) => {
                f(&cfg);
                true
            }
            None => false,
        }
    }
}

fn serialize_and_notify(
    project: &RwLock<ProjectDescription>,
    state_dir: &Utf8Path,
    store_lock: &Mutex<()>,
    listeners: &ListenerList,
) -> Result<(), PersistError> {
    // the event is manufactured inside the lock (only after a successful
    // write) and fired outside it
    let event = {
        let _guard = store_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let project = project.read().unwrap_or_else(PoisonError::into_inner);
        lset_persist::serialize_project(&project, state_dir)?;
        event_for_project(&project)
    };
    if !event.is_empty() {
        listeners.notify(&event);
    }
    Ok(())
}

struct FlushTask {
    project: Arc<RwLock<ProjectDescription>>,
    state_dir: Utf8PathBuf,
    store_lock: Arc<Mutex<()>>,
    listeners: Arc<ListenerList>,
}

impl Task for FlushTask {
    type Output = ();

    fn run(&self) -> anyhow::Result<Self::Output> {
        serialize_and_notify(
            &self.project,
            &self.state_dir,
            &self.store_lock,
            &self.listeners,
        )
        .map_err(Into::into)
    }

    fn family(&self) -> &str {
        FLUSH_FAMILY
    }
}

/// One live (listener-agent provider, owning configuration) association.
struct AgentPair {
    provider: ProviderRef,
    cfg: ConfigDescription,
}

fn agent_pairs(project: &ProjectDescription) -> Vec<AgentPair> {
    let mut pairs = Vec::new();
    for cfg in project.configurations() {
        for provider in cfg.providers() {
            if provider.as_listener_agent().is_some() {
                pairs.push(AgentPair {
                    provider: provider.clone(),
                    cfg: cfg.clone(),
                });
            }
        }
    }
    pairs
}

fn pair_known(list: &[AgentPair], pair: &AgentPair) -> bool {
    list.iter().any(|known| {
        lset_core::same_provider(&known.provider, &pair.provider) && known.cfg.id() == pair.cfg.id()
    })
}

/// Register/unregister listener agents for pairs whose liveness changed.
/// Workspace wrappers are reference counted: their backing is registered
/// when the first live pair appears and unregistered when the last goes.
fn re_register(old: &[AgentPair], new: &[AgentPair]) {
    for pair in old {
        if pair_known(new, pair) {
            continue;
        }
        let remaining = match pair.provider.as_any().downcast_ref::<WorkspaceProvider>() {
            Some(wrapper) => wrapper.decrement_live_refs(),
            None => 0,
        };
        if remaining == 0 {
            if let Some(agent) = pair.provider.as_listener_agent() {
                guarded_unregister(agent);
            }
        }
    }
    for pair in new {
        if pair_known(old, pair) {
            continue;
        }
        let count = match pair.provider.as_any().downcast_ref::<WorkspaceProvider>() {
            Some(wrapper) => wrapper.increment_live_refs(),
            None => 1,
        };
        if count == 1 {
            if let Some(agent) = pair.provider.as_listener_agent() {
                guarded_register(agent, Some(&pair.cfg));
            }
        }
    }
}

fn guarded_register(agent: &dyn ListenerAgent, cfg: Option<&ConfigDescription>) {
    if catch_unwind(AssertUnwindSafe(|| agent.register_listener(cfg))).is_err() {
        tracing::error!("listener agent panicked in register_listener");
    }
}

fn guarded_unregister(agent: &dyn ListenerAgent) {
    if catch_unwind(AssertUnwindSafe(|| agent.unregister_listener())).is_err() {
        tracing::error!("listener agent panicked in unregister_listener");
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use lset_core::{EntryKind, EntryList, SettingFlags, SettingsProvider};
    use lset_events::SettingsChangeEvent;
    use lset_providers::{ProviderDefinition, SerializableProvider};

    use super::*;

    const CFG_ID: &str = "cfg.id";
    const LANG: &str = "lang.id";

    struct Fixture {
        _tmp: tempfile::TempDir,
        state_dir: Utf8PathBuf,
        projects_dir: Utf8PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        Fixture {
            state_dir: base.join("state"),
            projects_dir: base.join("projects"),
            _tmp: tmp,
        }
    }

    fn catalog() -> ExtensionCatalog {
        ExtensionCatalog::builder()
            .definition(ProviderDefinition {
                id: "ext.base".to_string(),
                name: "Extension Base".to_string(),
                entries: vec![SettingEntry::include_path("/usr/include", SettingFlags::BUILTIN)],
                ..ProviderDefinition::default()
            })
            .definition(ProviderDefinition {
                id: "ext.user".to_string(),
                name: "Extension User".to_string(),
                class: "generic".to_string(),
                ..ProviderDefinition::default()
            })
            .build()
    }

    fn service(fixture: &Fixture) -> SettingsService {
        SettingsService::new(catalog(), fixture.state_dir.clone())
    }

    fn project_named(
        fixture: &Fixture,
        name: &str,
        providers: Vec<ProviderRef>,
    ) -> ProjectDescription {
        let mut project = ProjectDescription::new(name, fixture.projects_dir.join(name));
        let mut cfg = ConfigDescription::new(CFG_ID, "Debug");
        cfg.set_providers(providers).unwrap();
        project.add_configuration(cfg);
        project
    }

    fn include(name: &str) -> SettingEntry {
        SettingEntry::include_path(name, SettingFlags::empty())
    }

    #[derive(Default)]
    struct Collector {
        events: Mutex<Vec<SettingsChangeEvent>>,
    }

    impl SettingsChangeListener for Collector {
        fn settings_changed(&self, event: &SettingsChangeEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        }
    }

    impl Collector {
        fn events(&self) -> Vec<SettingsChangeEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[derive(Debug)]
    struct MockAgent {
        id: String,
        registered: AtomicUsize,
        unregistered: AtomicUsize,
    }

    impl MockAgent {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                registered: AtomicUsize::new(0),
                unregistered: AtomicUsize::new(0),
            }
        }

        fn registered(&self) -> usize {
            self.registered.load(Ordering::SeqCst)
        }

        fn unregistered(&self) -> usize {
            self.unregistered.load(Ordering::SeqCst)
        }
    }

    impl SettingsProvider for MockAgent {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> String {
            "Mock Agent".to_string()
        }

        fn entries(
            &self,
            _cfg: Option<&ConfigDescription>,
            _resource: Option<&Utf8Path>,
            _language: Option<&str>,
        ) -> Option<EntryList> {
            None
        }

        fn as_listener_agent(&self) -> Option<&dyn ListenerAgent> {
            Some(self)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl ListenerAgent for MockAgent {
        fn register_listener(&self, _cfg: Option<&ConfigDescription>) {
            self.registered.fetch_add(1, Ordering::SeqCst);
        }

        fn unregister_listener(&self) {
            self.unregistered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_serialize_fires_one_event_then_suppresses() {
        let fixture = fixture();
        let service = service(&fixture);
        let provider = Arc::new(SerializableProvider::new("p.id", "P"));
        service.add_project(project_named(&fixture, "proj", vec![provider.clone()]));

        let collector = Arc::new(Collector::default());
        service.register_listener(collector.clone());

        provider.set_entries(None, None, Some(LANG), Some(vec![include("/opt/include")]));
        service.serialize_project("proj").unwrap();

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].project_name(), "proj");
        assert_eq!(events[0].configuration_ids(), vec![CFG_ID]);

        // serializing identical state again is silent
        service.serialize_project("proj").unwrap();
        assert_eq!(collector.events().len(), 1);
    }

    #[tokio::test]
    async fn test_adding_empty_provider_is_silent() {
        let fixture = fixture();
        let service = service(&fixture);
        service.add_project(project_named(&fixture, "proj", Vec::new()));

        let collector = Arc::new(Collector::default());
        service.register_listener(collector.clone());

        service
            .update_project("proj", |project| {
                let empty: ProviderRef = Arc::new(SerializableProvider::new("empty.id", "Empty"));
                project
                    .configuration_by_id_mut(CFG_ID)
                    .unwrap()
                    .set_providers(vec![empty])
                    .unwrap();
            })
            .unwrap();
        service.serialize_project("proj").unwrap();

        assert!(collector.events().is_empty());
    }

    #[tokio::test]
    async fn test_workspace_swap_fires_event_only_on_resolved_change() {
        let fixture = fixture();
        let service = service(&fixture);
        service.add_project(project_named(
            &fixture,
            "proj",
            vec![service.workspace_provider("ext.user")],
        ));

        let collector = Arc::new(Collector::default());
        service.register_listener(collector.clone());

        let replacement = Arc::new(SerializableProvider::new("ext.user", "Replaced"));
        replacement.set_entries(None, None, Some(LANG), Some(vec![include("/opt/include")]));
        let replacement: ProviderRef = replacement;
        service
            .set_workspace_providers(Some(std::slice::from_ref(&replacement)))
            .unwrap();

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].configuration_ids(), vec![CFG_ID]);

        // a different instance with the same resolved entries is silent
        let identical = replacement
            .as_editable()
            .unwrap()
            .clone_deep();
        service
            .set_workspace_providers(Some(std::slice::from_ref(&identical)))
            .unwrap();
        assert_eq!(collector.events().len(), 1);
    }

    #[tokio::test]
    async fn test_cfg_owned_agent_registration_lifecycle() {
        let fixture = fixture();
        let service = service(&fixture);
        let agent = Arc::new(MockAgent::new("agent.provider"));
        service.add_project(project_named(&fixture, "proj", vec![agent.clone()]));
        assert_eq!(agent.registered(), 1);
        assert_eq!(agent.unregistered(), 0);

        // removing the provider from the list ends the association
        service
            .update_project("proj", |project| {
                project
                    .configuration_by_id_mut(CFG_ID)
                    .unwrap()
                    .set_providers(Vec::new())
                    .unwrap();
            })
            .unwrap();
        assert_eq!(agent.unregistered(), 1);
    }

    #[tokio::test]
    async fn test_shared_workspace_agent_is_reference_counted() {
        let fixture = fixture();
        let service = service(&fixture);
        let agent = Arc::new(MockAgent::new("shared.agent"));
        let agent_ref: ProviderRef = agent.clone();
        service
            .set_workspace_providers(Some(std::slice::from_ref(&agent_ref)))
            .unwrap();
        // in the catalog-backed table but referenced by no configuration
        assert_eq!(agent.registered(), 0);

        let mut project = ProjectDescription::new("proj", fixture.projects_dir.join("proj"));
        for cfg_id in ["cfg.1", "cfg.2"] {
            let mut cfg = ConfigDescription::new(cfg_id, cfg_id);
            cfg.set_providers(vec![service.workspace_provider("shared.agent")])
                .unwrap();
            project.add_configuration(cfg);
        }
        service.add_project(project);
        // two live pairs, but the backing registers once
        assert_eq!(agent.registered(), 1);

        service
            .update_project("proj", |project| {
                project
                    .configuration_by_id_mut("cfg.2")
                    .unwrap()
                    .set_providers(Vec::new())
                    .unwrap();
            })
            .unwrap();
        assert_eq!(agent.unregistered(), 0);

        assert!(service.remove_project("proj"));
        assert_eq!(agent.unregistered(), 1);
    }

    #[tokio::test]
    async fn test_workspace_swap_re_registers_live_agent() {
        let fixture = fixture();
        let service = service(&fixture);
        let first = Arc::new(MockAgent::new("shared.agent"));
        let first_ref: ProviderRef = first.clone();
        service
            .set_workspace_providers(Some(std::slice::from_ref(&first_ref)))
            .unwrap();
        service.add_project(project_named(
            &fixture,
            "proj",
            vec![service.workspace_provider("shared.agent")],
        ));
        assert_eq!(first.registered(), 1);

        let second = Arc::new(MockAgent::new("shared.agent"));
        let second_ref: ProviderRef = second.clone();
        service
            .set_workspace_providers(Some(std::slice::from_ref(&second_ref)))
            .unwrap();
        assert_eq!(first.unregistered(), 1);
        assert_eq!(second.registered(), 1);
    }

    #[tokio::test]
    async fn test_background_flush_persists_and_notifies() {
        let fixture = fixture();
        let service = service(&fixture);
        let provider = Arc::new(SerializableProvider::new("p.id", "P"));
        provider.set_store_entries_with_project(true);
        service.add_project(project_named(&fixture, "proj", vec![provider.clone()]));

        let collector = Arc::new(Collector::default());
        service.register_listener(collector.clone());

        provider.set_entries(None, None, Some(LANG), Some(vec![include("/opt/include")]));
        service.schedule_flush("proj").unwrap();
        service.join_flushes().await;

        let store = lset_persist::project_store_path(&fixture.projects_dir.join("proj"));
        assert!(store.as_std_path().exists());
        assert_eq!(collector.events().len(), 1);
    }

    #[tokio::test]
    async fn test_project_settings_survive_service_restart() {
        let fixture = fixture();
        {
            let service = service(&fixture);
            let provider = Arc::new(SerializableProvider::new("p.id", "P"));
            provider.set_store_entries_with_project(true);
            provider.set_entries(None, None, Some(LANG), Some(vec![include("/opt/include")]));
            service.add_project(project_named(&fixture, "proj", vec![provider]));
            service.serialize_project("proj").unwrap();
        }

        let service = service(&fixture);
        service.add_project(project_named(&fixture, "proj", Vec::new()));
        let entries = service
            .setting_entries_by_kind(
                "proj",
                CFG_ID,
                Some(Utf8Path::new("src/main.c")),
                Some(LANG),
                KindMask::of(EntryKind::IncludePath),
            )
            .unwrap();
        assert_eq!(entries, vec![include("/opt/include")]);
    }

    #[tokio::test]
    async fn test_workspace_providers_survive_service_restart() {
        let fixture = fixture();
        let modified = Arc::new(SerializableProvider::new("ext.user", "Extension User"));
        modified.set_entries(None, None, Some(LANG), Some(vec![include("/opt/include")]));
        {
            let service = service(&fixture);
            let modified_ref: ProviderRef = modified.clone();
            service
                .set_workspace_providers(Some(std::slice::from_ref(&modified_ref)))
                .unwrap();
        }

        let service = service(&fixture);
        let raw = service.registry().raw_provider_by_id("ext.user").unwrap();
        let raw = raw
            .as_any()
            .downcast_ref::<SerializableProvider>()
            .unwrap();
        assert_eq!(raw, modified.as_ref());
    }

    #[tokio::test]
    async fn test_referenced_projects_resolve_through_service() {
        let fixture = fixture();
        let service = service(&fixture);

        for (name, other) in [("projA", "projB"), ("projB", "projA")] {
            let own = Arc::new(SerializableProvider::new("own.settings", "Own"));
            own.set_entries(
                None,
                None,
                None,
                Some(vec![
                    include(&format!("/{name}/private")),
                    SettingEntry::include_path(
                        format!("/{name}/exported"),
                        SettingFlags::EXPORTED,
                    ),
                ]),
            );
            let mut project = project_named(
                &fixture,
                name,
                vec![own, service.referenced_projects_provider()],
            );
            project
                .configuration_by_id_mut(CFG_ID)
                .unwrap()
                .set_references(vec![(other.to_string(), CFG_ID.to_string())])
                .unwrap();
            service.add_project(project);
        }

        let entries = service
            .setting_entries_by_kind("projA", CFG_ID, Some(Utf8Path::new("")), None, KindMask::ALL)
            .unwrap();
        let names: Vec<&str> = entries.iter().map(SettingEntry::name).collect();
        assert_eq!(
            names,
            vec!["/projA/private", "/projA/exported", "/projB/exported"]
        );
    }

    #[tokio::test]
    async fn test_unknown_project_is_an_error() {
        let fixture = fixture();
        let service = service(&fixture);
        assert!(matches!(
            service.serialize_project("nope"),
            Err(ServiceError::UnknownProject(_))
        ));
    }
}

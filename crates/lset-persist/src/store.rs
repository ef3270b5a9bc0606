use std::sync::Arc;

use camino::Utf8Path;
use lset_core::{ProjectDescription, ProviderRef, SerializableCapability};
use lset_providers::{
    ExtensionCatalog, ProviderRegistry, SerializableProvider, ATTR_CLASS, ATTR_ID, ATTR_NAME,
    ELEM_PROVIDER,
};
use lset_xml::Element;
use rustc_hash::FxHashSet;

use crate::{paths, PersistError};

pub const ELEM_PROJECT: &str = "project";
pub const ELEM_WORKSPACE: &str = "workspace";
pub const ELEM_CONFIGURATION: &str = "configuration";
pub const ELEM_PROVIDER_REFERENCE: &str = "provider-reference";

/// Serialize a project's provider lists into the two storage documents.
///
/// Workspace providers become `provider-reference` elements (their state is
/// never duplicated); serializable providers keeping entries with the
/// project serialize in full into the project store, the others split:
/// attributes stay in the project store, entries go to the workspace store.
/// The workspace-side configuration element is created lazily so an unused
/// split never produces a document.
pub fn serialize_project_into(
    project_store: &mut Element,
    mut workspace_store: Option<&mut Element>,
    project: &ProjectDescription,
) {
    for cfg in project.configurations() {
        // configurations without providers leave no trace, absence means default
        if cfg.providers().is_empty() {
            continue;
        }
        let cfg_element = project_store.add_child(ELEM_CONFIGURATION);
        cfg_element.set_attr(ATTR_ID, cfg.id());
        cfg_element.set_attr(ATTR_NAME, cfg.name());

        let mut workspace_cfg: Option<Element> = None;
        for provider in cfg.providers() {
            if ProviderRegistry::is_workspace_provider(provider) {
                cfg_element
                    .add_child(ELEM_PROVIDER_REFERENCE)
                    .set_attr(ATTR_ID, provider.id());
                continue;
            }
            match provider.as_serializable() {
                Some(serializable) => {
                    let split =
                        workspace_store.is_some() && !serializable.stores_entries_with_project();
                    if split {
                        serializable.serialize_attributes_into(cfg_element);
                        let workspace_cfg = workspace_cfg.get_or_insert_with(|| {
                            let mut element = Element::new(ELEM_CONFIGURATION);
                            element.set_attr(ATTR_ID, cfg.id());
                            element.set_attr(ATTR_NAME, cfg.name());
                            element
                        });
                        let provider_element = workspace_cfg.add_child(ELEM_PROVIDER);
                        provider_element.set_attr(ATTR_ID, provider.id());
                        serializable.serialize_entries_into(provider_element);
                    } else {
                        serializable.serialize_into(cfg_element);
                    }
                }
                None => {
                    // non-serializable providers persist as a bare element
                    let element = cfg_element.add_child(ELEM_PROVIDER);
                    element.set_attr(ATTR_ID, provider.id());
                    element.set_attr(ATTR_NAME, provider.name());
                    element.set_attr(ATTR_CLASS, provider.class_name());
                }
            }
        }
        if let Some(workspace_cfg) = workspace_cfg {
            if let Some(workspace_store) = workspace_store.as_deref_mut() {
                workspace_store.push_child(workspace_cfg);
            }
        }
    }
}

/// Rebuild provider lists from the storage documents. Configurations absent
/// from the document keep their current lists; a persisted id repeated
/// within one configuration keeps its first occurrence.
pub fn load_project_from(
    project_store: &Element,
    workspace_store: Option<&Element>,
    project: &mut ProjectDescription,
    registry: &ProviderRegistry,
) {
    for cfg_element in project_store.children_named(ELEM_CONFIGURATION) {
        let Some(cfg_id) = cfg_element.attr(ATTR_ID) else {
            continue;
        };
        let mut providers: Vec<ProviderRef> = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        for child in cfg_element.children() {
            let loaded: Option<ProviderRef> = match child.name() {
                ELEM_PROVIDER_REFERENCE => child
                    .attr(ATTR_ID)
                    .map(|id| registry.workspace_provider(id)),
                ELEM_PROVIDER => load_provider(child, cfg_id, workspace_store, registry),
                _ => None,
            };
            if let Some(provider) = loaded {
                if !seen.insert(provider.id().to_string()) {
                    tracing::warn!(
                        id = provider.id(),
                        cfg = cfg_id,
                        "ignoring repeatedly persisted provider"
                    );
                    continue;
                }
                providers.push(provider);
            }
        }
        if let Some(cfg) = project.configuration_by_id_mut(cfg_id) {
            if let Err(err) = cfg.set_providers(providers) {
                tracing::error!(%err, cfg = cfg_id, "could not assign loaded provider list");
            }
        } else {
            tracing::warn!(cfg = cfg_id, "persisted configuration not present in project");
        }
    }
}

fn load_provider(
    element: &Element,
    cfg_id: &str,
    workspace_store: Option<&Element>,
    registry: &ProviderRegistry,
) -> Option<ProviderRef> {
    let id = element.attr(ATTR_ID)?;
    let class = element.attr(ATTR_CLASS).unwrap_or("generic");
    if class == "base" {
        // extension singletons are resolved against the catalog, the
        // document only records that the configuration used them
        let template = registry.catalog().template(id);
        if template.is_none() {
            tracing::warn!(id, "no extension definition for persisted provider");
        }
        return template;
    }

    let provider = SerializableProvider::from_element(element);
    if !provider.stores_entries_with_project() {
        if let Some(workspace_store) = workspace_store {
            if let Some(entries_element) = find_workspace_entries(workspace_store, cfg_id, id) {
                SerializableCapability::load_entries_from(&provider, entries_element);
            }
        }
    }
    Some(Arc::new(provider))
}

fn find_workspace_entries<'a>(
    workspace_store: &'a Element,
    cfg_id: &str,
    provider_id: &str,
) -> Option<&'a Element> {
    workspace_store
        .children_named(ELEM_CONFIGURATION)
        .find(|cfg| cfg.attr(ATTR_ID) == Some(cfg_id))?
        .children_named(ELEM_PROVIDER)
        .find(|provider| provider.attr(ATTR_ID) == Some(provider_id))
}

/// Write (or remove) both storage files of a project. Stores whose content
/// collapses to all-default are removed: absence means default.
pub fn serialize_project(
    project: &ProjectDescription,
    state_dir: &Utf8Path,
) -> Result<(), PersistError> {
    let mut project_root = Element::new(ELEM_PROJECT);
    let mut workspace_root = Element::new(ELEM_PROJECT);
    serialize_project_into(&mut project_root, Some(&mut workspace_root), project);

    let project_file = paths::project_store_path(project.root());
    if project_root.has_children() {
        lset_xml::store_file(project_file.as_std_path(), &project_root)?;
    } else {
        lset_xml::remove_file(project_file.as_std_path())?;
    }

    let workspace_file = paths::project_workspace_store_path(state_dir, project.name());
    if workspace_root.has_children() {
        lset_xml::store_file(workspace_file.as_std_path(), &workspace_root)?;
    } else {
        lset_xml::remove_file(workspace_file.as_std_path())?;
    }
    Ok(())
}

/// Load a project's provider lists from its storage files.
///
/// Returns `Ok(false)` when no project store exists (nothing persisted). A
/// malformed project store is an error the caller reports while the project
/// itself still opens with default settings. A malformed workspace-side
/// store degrades to attributes-only providers.
pub fn load_project(
    project: &mut ProjectDescription,
    state_dir: &Utf8Path,
    registry: &ProviderRegistry,
) -> Result<bool, PersistError> {
    let project_file = paths::project_store_path(project.root());
    let Some(project_root) = lset_xml::load_file(project_file.as_std_path())? else {
        return Ok(false);
    };

    let workspace_file = paths::project_workspace_store_path(state_dir, project.name());
    let workspace_root = match lset_xml::load_file(workspace_file.as_std_path()) {
        Ok(root) => root,
        Err(err) => {
            tracing::error!(%err, file = %workspace_file, "skipping malformed workspace-area store");
            None
        }
    };

    load_project_from(&project_root, workspace_root.as_ref(), project, registry);
    Ok(true)
}

/// Persist user-defined workspace-level providers. Only serializable
/// providers that diverge from their extension-catalog definition are
/// written; when none do, no file is kept around.
pub fn serialize_workspace_document(
    providers: &[ProviderRef],
    catalog: &ExtensionCatalog,
    state_dir: &Utf8Path,
) -> Result<(), PersistError> {
    let mut root = Element::new(ELEM_WORKSPACE);
    for provider in providers {
        let Some(serializable) = provider.as_serializable() else {
            continue;
        };
        if catalog.is_equal_extension_provider(provider.as_ref(), true) {
            continue;
        }
        serializable.serialize_into(&mut root);
    }

    let file = paths::workspace_store_path(state_dir);
    if root.has_children() {
        lset_xml::store_file(file.as_std_path(), &root)?;
    } else {
        lset_xml::remove_file(file.as_std_path())?;
    }
    Ok(())
}

/// Load user-defined workspace-level providers. `Ok(None)` when no store
/// exists. Providers equal to their extension definition are dropped (the
/// catalog instance is authoritative); duplicate ids keep the first
/// occurrence.
pub fn load_workspace_document(
    catalog: &ExtensionCatalog,
    state_dir: &Utf8Path,
) -> Result<Option<Vec<ProviderRef>>, PersistError> {
    let file = paths::workspace_store_path(state_dir);
    let Some(root) = lset_xml::load_file(file.as_std_path())? else {
        return Ok(None);
    };

    let mut providers: Vec<ProviderRef> = Vec::new();
    let mut seen: FxHashSet<String> = FxHashSet::default();
    for element in root.children_named(ELEM_PROVIDER) {
        let Some(id) = element.attr(ATTR_ID) else {
            continue;
        };
        if !seen.insert(id.to_string()) {
            tracing::warn!(id, "ignoring repeatedly persisted workspace provider");
            continue;
        }
        let provider: ProviderRef = Arc::new(SerializableProvider::from_element(element));
        if catalog.is_equal_extension_provider(provider.as_ref(), true) {
            continue;
        }
        providers.push(provider);
    }
    Ok(Some(providers))
}

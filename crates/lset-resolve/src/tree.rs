use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use lset_core::{ConfigDescription, SettingEntry, SettingsProvider};

/// One node of a project's resource subtree handed to
/// [`compact_resource_tree`]. The engine has no resource model of its own,
/// so the caller supplies the listing.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    path: Utf8PathBuf,
    is_folder: bool,
    children: Vec<ResourceNode>,
}

impl ResourceNode {
    pub fn folder(path: impl Into<Utf8PathBuf>, children: Vec<ResourceNode>) -> Self {
        Self {
            path: path.into(),
            is_folder: true,
            children,
        }
    }

    pub fn file(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_folder: false,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Compact a provider's per-resource assignments over a folder subtree.
///
/// Bottom-up, each folder is assigned the entry list the majority of its
/// members carry, and member folders whose assignment equals the majority
/// are cleared (they inherit through the hierarchy walk instead). Files keep
/// their assignments: which files were collected stays visible, which
/// matters for partial builds.
pub fn compact_resource_tree(
    provider: &dyn SettingsProvider,
    cfg: Option<&ConfigDescription>,
    language: Option<&str>,
    folder: &ResourceNode,
) {
    let Some(serializable) = provider.as_serializable() else {
        tracing::warn!(
            provider = provider.id(),
            "resource tree compaction needs a serializable provider"
        );
        return;
    };

    for child in &folder.children {
        if child.is_folder {
            compact_resource_tree(provider, cfg, language, child);
        }
    }

    let mut votes: HashMap<Option<Vec<SettingEntry>>, usize> = HashMap::new();
    let mut voters = folder.children.len();
    let mut candidate: Option<Option<Vec<SettingEntry>>> = None;
    let mut candidate_count = 0;
    let mut majority: Option<Option<Vec<SettingEntry>>> = None;
    for child in &folder.children {
        let entries = provider
            .entries(cfg, Some(&child.path), language)
            .map(|list| list.to_vec());
        if entries.is_none() && child.is_folder {
            // folders without own data inherit and get no vote
            voters -= 1;
        } else {
            let count = votes.entry(entries.clone()).or_insert(0);
            *count += 1;
            if *count > candidate_count {
                candidate_count = *count;
                candidate = Some(entries);
            }
        }
        if candidate_count > voters / 2 {
            majority = candidate.clone();
            break;
        }
    }

    let Some(majority) = majority else {
        return;
    };
    let Some(majority_entries) = majority else {
        // the majority has no data at all, nothing to pull up
        return;
    };

    serializable.set_entries(cfg, Some(&folder.path), language, Some(majority_entries.clone()));
    for child in &folder.children {
        if !child.is_folder {
            continue;
        }
        let entries = provider
            .entries(cfg, Some(&child.path), language)
            .map(|list| list.to_vec());
        if entries.as_ref() == Some(&majority_entries) {
            serializable.set_entries(cfg, Some(&child.path), language, None);
        }
    }
}

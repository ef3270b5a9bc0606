use std::collections::BTreeMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::entry::SettingEntry;
use crate::provider::EntryList;

type LanguageMap = BTreeMap<Option<String>, EntryList>;
type ResourceMap = BTreeMap<Option<Utf8PathBuf>, LanguageMap>;

/// Per-provider settings storage: configuration id → resource path →
/// language id → ordered entry list.
///
/// Every level has a `None` key meaning "default": no configuration, the
/// default resource position, language-independent entries. Absence of a
/// language key is distinct from an explicitly empty list: the former means
/// "no data", the latter terminates the resource-hierarchy walk.
///
/// Entry lists are handed out as shared immutable slices, so callers can
/// hold on to a result without ever observing later mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryStorage {
    map: BTreeMap<Option<String>, ResourceMap>,
}

impl EntryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries stored for exactly this (configuration, resource, language)
    /// position; `None` when nothing is stored there.
    #[must_use]
    pub fn entries(
        &self,
        cfg_id: Option<&str>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
    ) -> Option<EntryList> {
        self.map
            .get(&cfg_id.map(ToOwned::to_owned))
            .and_then(|resources| resources.get(&resource.map(Utf8Path::to_path_buf)))
            .and_then(|languages| languages.get(&language.map(ToOwned::to_owned)))
            .cloned()
    }

    /// Store `entries` for the given position. `Some(vec![])` stores an
    /// explicitly empty list; `None` removes the position entirely, pruning
    /// now-empty inner maps so storages compare equal regardless of history.
    pub fn set_entries(
        &mut self,
        cfg_id: Option<&str>,
        resource: Option<&Utf8Path>,
        language: Option<&str>,
        entries: Option<Vec<SettingEntry>>,
    ) {
        let cfg_key = cfg_id.map(ToOwned::to_owned);
        let resource_key = resource.map(Utf8Path::to_path_buf);
        let language_key = language.map(ToOwned::to_owned);

        match entries {
            Some(entries) => {
                self.map
                    .entry(cfg_key)
                    .or_default()
                    .entry(resource_key)
                    .or_default()
                    .insert(language_key, Arc::from(entries));
            }
            None => {
                let Some(resources) = self.map.get_mut(&cfg_key) else {
                    return;
                };
                if let Some(languages) = resources.get_mut(&resource_key) {
                    languages.remove(&language_key);
                    if languages.is_empty() {
                        resources.remove(&resource_key);
                    }
                }
                if resources.is_empty() {
                    self.map.remove(&cfg_key);
                }
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// All stored positions in deterministic (sorted) order. This is the
    /// iteration the serializer and the delta computation rely on.
    pub fn iter(
        &self,
    ) -> impl Iterator<
        Item = (
            Option<&str>,
            Option<&Utf8Path>,
            Option<&str>,
            &EntryList,
        ),
    > {
        self.map.iter().flat_map(|(cfg, resources)| {
            resources.iter().flat_map(move |(resource, languages)| {
                languages.iter().map(move |(language, entries)| {
                    (
                        cfg.as_deref(),
                        resource.as_deref(),
                        language.as_deref(),
                        entries,
                    )
                })
            })
        })
    }
}

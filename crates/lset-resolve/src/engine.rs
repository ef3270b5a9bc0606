use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use camino::Utf8Path;
use lset_core::{
    ConfigDescription, EntryKind, EntryList, KindMask, ResolutionGuard, SettingEntry,
    SettingFlags, SettingsProvider,
};
use rustc_hash::FxHashSet;

/// Query one provider at an exact position, containing provider faults.
///
/// A panicking provider is logged and treated as an explicitly empty
/// contribution: empty is terminal, so a fault can never make the walk pick
/// up unrelated entries further up the resource tree.
fn query(
    provider: &dyn SettingsProvider,
    cfg: Option<&ConfigDescription>,
    resource: Option<&Utf8Path>,
    language: Option<&str>,
    guard: &mut ResolutionGuard,
) -> Option<EntryList> {
    let result = catch_unwind(AssertUnwindSafe(|| {
        provider.entries_with_guard(cfg, resource, language, guard)
    }));
    match result {
        Ok(entries) => entries,
        Err(_) => {
            tracing::error!(
                provider = provider.id(),
                resource = ?resource,
                language = ?language,
                "provider panicked while computing entries, treating as empty"
            );
            Some(Arc::from(Vec::new()))
        }
    }
}

/// Entries of one provider for a resource, walking up the resource tree.
///
/// The provider is asked at the exact resource first; any non-`None` answer
/// (including an explicitly empty one) is terminal. Otherwise the walk moves
/// through the parent chain to the project root (the empty path), and
/// finally to the default position. Never returns "no data": an exhausted
/// walk yields an empty list.
#[must_use]
pub fn entries_up_tree(
    provider: &dyn SettingsProvider,
    cfg: Option<&ConfigDescription>,
    resource: Option<&Utf8Path>,
    language: Option<&str>,
) -> EntryList {
    let mut guard = ResolutionGuard::new();
    entries_up_tree_guarded(provider, cfg, resource, language, &mut guard)
}

pub(crate) fn entries_up_tree_guarded(
    provider: &dyn SettingsProvider,
    cfg: Option<&ConfigDescription>,
    resource: Option<&Utf8Path>,
    language: Option<&str>,
    guard: &mut ResolutionGuard,
) -> EntryList {
    if let Some(entries) = query(provider, cfg, resource, language, guard) {
        return entries;
    }
    if let Some(resource) = resource {
        let mut parent = resource.parent();
        while let Some(ancestor) = parent {
            if let Some(entries) = query(provider, cfg, Some(ancestor), language, guard) {
                return entries;
            }
            parent = ancestor.parent();
        }
        // out of parent resources: default entries for the language
        if let Some(entries) = query(provider, None, None, language, guard) {
            return entries;
        }
    }
    Arc::from(Vec::new())
}

/// Conflict-resolved entries of the given kinds for a configuration,
/// resource and language, combined over all providers of the configuration.
/// Both local and system entries are returned, local ones first per kind.
#[must_use]
pub fn entries_by_kind(
    cfg: &ConfigDescription,
    resource: Option<&Utf8Path>,
    language: Option<&str>,
    kinds: KindMask,
) -> Vec<SettingEntry> {
    let mut guard = ResolutionGuard::new();
    entries_by_kind_guarded(cfg, resource, language, kinds, None, &mut guard)
}

/// Only entries flagged LOCAL (the `#include "..."` flavor of lookup).
#[must_use]
pub fn local_entries_by_kind(
    cfg: &ConfigDescription,
    resource: Option<&Utf8Path>,
    language: Option<&str>,
    kinds: KindMask,
) -> Vec<SettingEntry> {
    let mut guard = ResolutionGuard::new();
    entries_by_kind_guarded(cfg, resource, language, kinds, Some(true), &mut guard)
}

/// Only entries without the LOCAL flag (the `#include <...>` flavor).
#[must_use]
pub fn system_entries_by_kind(
    cfg: &ConfigDescription,
    resource: Option<&Utf8Path>,
    language: Option<&str>,
    kinds: KindMask,
) -> Vec<SettingEntry> {
    let mut guard = ResolutionGuard::new();
    entries_by_kind_guarded(cfg, resource, language, kinds, Some(false), &mut guard)
}

pub(crate) fn entries_by_kind_guarded(
    cfg: &ConfigDescription,
    resource: Option<&Utf8Path>,
    language: Option<&str>,
    kinds: KindMask,
    local: Option<bool>,
    guard: &mut ResolutionGuard,
) -> Vec<SettingEntry> {
    let mut buckets: Vec<(EntryKind, Vec<SettingEntry>)> =
        EntryKind::ALL.iter().map(|kind| (*kind, Vec::new())).collect();
    let mut seen: FxHashSet<(EntryKind, String)> = FxHashSet::default();

    for provider in cfg.providers() {
        let entries = entries_up_tree_guarded(provider.as_ref(), Some(cfg), resource, language, guard);
        for entry in entries.iter() {
            if !kinds.contains(entry.kind()) {
                continue;
            }
            let key = (entry.kind(), entry.name().to_string());
            if seen.contains(&key) {
                // only the first provider to name an entry is considered;
                // later contributions can neither override nor delete it
                continue;
            }
            let locality_matches = local
                .is_none_or(|want_local| entry.has_flag(SettingFlags::LOCAL) == want_local);
            if locality_matches {
                seen.insert(key);
                // UNDEFINED entries only block lower-precedence names
                if !entry.has_flag(SettingFlags::UNDEFINED) {
                    if let Some((_, bucket)) =
                        buckets.iter_mut().find(|(kind, _)| *kind == entry.kind())
                    {
                        bucket.push(entry.clone());
                    }
                }
            }
        }
    }

    let mut result = Vec::new();
    for (kind, mut bucket) in buckets {
        if local.is_none() {
            // unfiltered calls list local entries before system entries
            bucket.sort_by_key(|entry| !entry.has_flag(SettingFlags::LOCAL));
        }
        if kind == EntryKind::Macro {
            bucket.sort_by(|a, b| a.name().cmp(b.name()));
        }
        result.append(&mut bucket);
    }
    result
}

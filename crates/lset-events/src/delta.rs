use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use lset_core::{ConfigDescription, ProjectDescription, ResolvedView};

use crate::{SettingsChangeEvent, SettingsDelta};

/// The configuration's current resolved view: per (language, resource)
/// position, the entries its providers store, in provider order.
///
/// Computed from raw storage snapshots. Providers whose entries are derived
/// rather than stored have no snapshot and are excluded; their inputs are
/// other configurations' stored state, which produces events of its own.
#[must_use]
pub fn resolved_view(cfg: &ConfigDescription) -> ResolvedView {
    let mut view = ResolvedView::new();
    for provider in cfg.providers() {
        let Some(storage) = provider.storage_snapshot() else {
            continue;
        };
        for (cfg_key, resource, language, entries) in storage.iter() {
            // positions stored for other configurations don't affect this one
            if cfg_key.is_some_and(|id| id != cfg.id()) {
                continue;
            }
            view.entry((
                language.map(ToOwned::to_owned),
                resource.map(Utf8Path::to_path_buf),
            ))
            .or_default()
            .extend(entries.iter().cloned());
        }
    }
    view
}

/// Capture the current resolved view as the new delta baseline. Called when
/// a configuration is freshly loaded, so the load itself never fires.
pub fn reset_baseline(cfg: &ConfigDescription) {
    cfg.set_baseline(resolved_view(cfg));
}

/// Diff the configuration against its baseline and reset the baseline.
/// Returns `None` when the resolved view is unchanged.
pub fn drop_delta(cfg: &ConfigDescription) -> Option<SettingsDelta> {
    let before = cfg.baseline();
    let after = resolved_view(cfg);
    if before == after {
        return None;
    }

    let mut affected_resources: BTreeSet<Utf8PathBuf> = BTreeSet::new();
    for key in before.keys().chain(after.keys()) {
        if before.get(key) != after.get(key) {
            let (_, resource) = key;
            // the default position affects the project resource itself
            affected_resources.insert(resource.clone().unwrap_or_default());
        }
    }

    cfg.set_baseline(after);
    Some(SettingsDelta { affected_resources })
}

/// Assemble the change event for a project, dropping the deltas of all its
/// configurations. An event with no deltas must not be fired; creating the
/// event consumes the deltas either way.
#[must_use]
pub fn event_for_project(project: &ProjectDescription) -> SettingsChangeEvent {
    let mut deltas = std::collections::BTreeMap::new();
    for cfg in project.configurations() {
        if let Some(delta) = drop_delta(cfg) {
            deltas.insert(cfg.id().to_string(), delta);
        }
    }
    SettingsChangeEvent {
        project: project.name().to_string(),
        deltas,
    }
}

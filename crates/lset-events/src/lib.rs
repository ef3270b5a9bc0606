//! Change detection and notification for language settings.
//!
//! Every mutating operation runs through the same funnel: compute the
//! configuration's resolved view, diff it against the baseline captured at
//! the last load/serialization, and emit an event only when they differ.
//! No-op mutations (re-serializing identical entries, attaching a provider
//! that contributes nothing) are suppressed here, not at the call sites.

mod delta;
mod listeners;

pub use delta::{drop_delta, event_for_project, reset_baseline, resolved_view};
pub use listeners::{ListenerList, SettingsChangeListener};

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;

/// Per-configuration change: the set of resources whose resolution changed
/// since the last serialization. The project resource itself is the empty
/// path; changes at the default (no-resource) position map to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsDelta {
    affected_resources: BTreeSet<Utf8PathBuf>,
}

impl SettingsDelta {
    #[must_use]
    pub fn affected_resources(&self) -> &BTreeSet<Utf8PathBuf> {
        &self.affected_resources
    }
}

/// Event describing what changed in one project's settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChangeEvent {
    project: String,
    deltas: BTreeMap<String, SettingsDelta>,
}

impl SettingsChangeEvent {
    #[must_use]
    pub fn project_name(&self) -> &str {
        &self.project
    }

    /// Ids of the configuration descriptions whose resolution changed.
    #[must_use]
    pub fn configuration_ids(&self) -> Vec<&str> {
        self.deltas.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn delta(&self, cfg_id: &str) -> Option<&SettingsDelta> {
        self.deltas.get(cfg_id)
    }

    /// `true` when no configuration changed; such events are never fired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

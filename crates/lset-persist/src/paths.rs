use camino::{Utf8Path, Utf8PathBuf};

const SETTINGS_FOLDER: &str = ".settings";
const STORE_FILE: &str = "language-settings.xml";

/// Project-area store: lives inside the project, travels with it.
#[must_use]
pub fn project_store_path(project_root: &Utf8Path) -> Utf8PathBuf {
    project_root.join(SETTINGS_FOLDER).join(STORE_FILE)
}

/// Per-project store in the workspace state area, for providers that keep
/// their entries out of the project.
#[must_use]
pub fn project_workspace_store_path(state_dir: &Utf8Path, project_name: &str) -> Utf8PathBuf {
    state_dir.join(format!("{project_name}.{STORE_FILE}"))
}

/// Store for user-defined workspace-level providers.
#[must_use]
pub fn workspace_store_path(state_dir: &Utf8Path) -> Utf8PathBuf {
    state_dir.join(STORE_FILE)
}

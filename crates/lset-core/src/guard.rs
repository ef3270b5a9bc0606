use rustc_hash::FxHashSet;

/// Visited set threaded through one top-level resolution.
///
/// Referenced-project resolution recurses through an arbitrary, possibly
/// cyclic reference graph; each (project, configuration) pair is entered at
/// most once per guard, which bounds the recursion. The guard is created at
/// the public entry points of the resolution engine and passed down
/// explicitly rather than living in thread-local state.
#[derive(Debug, Default)]
pub struct ResolutionGuard {
    visited: FxHashSet<(String, String)>,
}

impl ResolutionGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a configuration as entered. Returns `false` if it was already
    /// visited under this guard, in which case the caller must not recurse.
    pub fn enter(&mut self, project: &str, cfg_id: &str) -> bool {
        self.visited
            .insert((project.to_string(), cfg_id.to_string()))
    }
}

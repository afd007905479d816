use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use treadle::WorkItem;

/// A reference-index build job flowing through the lattice → anchors →
/// assemble stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    /// Unique ID for this work item (one per build invocation).
    id: String,
    /// Cache directory the build publishes into.
    pub cache_dir: PathBuf,
}

impl BuildJob {
    #[must_use]
    pub fn new(id: impl Into<String>, cache_dir: PathBuf) -> Self {
        Self {
            id: id.into(),
            cache_dir,
        }
    }
}

impl WorkItem for BuildJob {
    fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for BuildJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.id, self.cache_dir.display())
    }
}

//! The consolidated output handed from the transform stage to the publisher.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file produced by the transform job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Local path of the file.
    pub path: PathBuf,

    /// Logical name, the file name of `path`.
    pub name: String,
}

impl Artifact {
    /// Build an artifact from its local path; the name is the path's file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_from_path() {
        let artifact = Artifact::from_path("data_final/world_data.csv");
        assert_eq!(artifact.name, "world_data.csv");
        assert_eq!(artifact.path(), Path::new("data_final/world_data.csv"));
    }
}

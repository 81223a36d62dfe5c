//! Project tree discovery.
//!
//! The orchestrator works against a project layout with a `backend/` Go
//! service and a `mobile/` Expo app side by side. Nothing here is mutated;
//! the paths are resolved once at startup and handed to whoever needs them.

use std::io;
use std::path::{Path, PathBuf};

/// Resolved locations inside the project tree.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub backend: PathBuf,
    pub mobile: PathBuf,
    pub task_file: PathBuf,
}

impl ProjectPaths {
    /// Resolve the project layout under `root`. The task file lives wherever
    /// configuration says; it is not required to exist yet.
    pub fn discover(root: &Path, task_file: &Path) -> io::Result<Self> {
        let root = root.canonicalize()?;
        Ok(Self {
            backend: root.join("backend"),
            mobile: root.join("mobile"),
            task_file: task_file.to_path_buf(),
            root,
        })
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_dir()
    }

    pub fn has_mobile(&self) -> bool {
        self.mobile.is_dir()
    }

    pub fn has_task_file(&self) -> bool {
        self.task_file.is_file()
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::FileSystemKind;

/// A file reference passed to a File Mover: which backend, and where the
/// file lives within it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRef {
    pub filesystem_kind: FileSystemKind,
    pub file_path: String,
    pub file_name: String,
}

impl FileRef {
    pub fn new(
        filesystem_kind: FileSystemKind,
        file_path: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            filesystem_kind,
            file_path: file_path.into(),
            file_name: file_name.into(),
        }
    }

    pub fn full_path(&self) -> PathBuf {
        Path::new(&self.file_path).join(&self.file_name)
    }
}

mod local;
mod object;

pub use local::LocalFileMover;
pub use object::ObjectFileMover;

use async_trait::async_trait;
use rasbora_common::config::{FileSystemKind, FilesystemConfig};
use rasbora_common::types::FileRef;

/// Uniform contract over a POSIX directory tree or an S3-compatible object
/// store (§2 item 2, §6 "File Mover"). `get` stages a remote file locally,
/// `put` promotes a local file to the destination. Local temp-file cleanup
/// (§4.3.6) always operates on the pipeline's own local working directory
/// directly, never through this trait — matching the Go original, whose
/// `_cleanAndPrepareForNextTask` calls `os.RemoveAll` rather than its
/// `FileSystem.Interface`'s otherwise-uncalled `RemoveFile`/`RemoveAll`.
#[async_trait]
pub trait FileMover: Send + Sync {
    async fn get(&self, src: &FileRef, dst: &FileRef) -> std::io::Result<()>;
    async fn put(&self, src: &FileRef, dst: &FileRef) -> std::io::Result<()>;
}

/// Build the mover named by `kind`, configured from `filesystem.*`.
pub async fn mover_for(
    kind: FileSystemKind,
    config: &FilesystemConfig,
) -> std::io::Result<Box<dyn FileMover>> {
    match kind {
        FileSystemKind::Local => Ok(Box::new(LocalFileMover::new())),
        FileSystemKind::Object => Ok(Box::new(ObjectFileMover::connect(&config.object).await)),
    }
}

/// Where a promoted file's `subpath` (e.g. `"logs"`, `"outputs"`) resolves
/// to under the *configured* destination: under `filesystem.local.base_path`
/// for a local mover, or as a bare object-key prefix for an object mover
/// (the bucket itself already scopes the key).
pub fn destination_prefix(kind: FileSystemKind, config: &FilesystemConfig, subpath: &str) -> String {
    match kind {
        FileSystemKind::Local => {
            let base = config.local.base_path.trim_end_matches('/');
            if base.is_empty() {
                subpath.to_string()
            } else {
                format!("{base}/{subpath}")
            }
        }
        FileSystemKind::Object => subpath.to_string(),
    }
}

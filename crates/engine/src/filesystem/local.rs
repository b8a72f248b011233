use async_trait::async_trait;
use rasbora_common::types::FileRef;

use super::FileMover;

/// POSIX-filesystem backed mover. Grounded on
/// `internal/filesystem/filesystem_local.go`: `get` copies, `put` renames
/// (same-filesystem move), removal is a plain file/tree delete.
#[derive(Default)]
pub struct LocalFileMover;

impl LocalFileMover {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileMover for LocalFileMover {
    async fn get(&self, src: &FileRef, dst: &FileRef) -> std::io::Result<()> {
        let src = src.full_path();
        let dst = dst.full_path();
        tokio::fs::copy(&src, &dst).await?;
        Ok(())
    }

    async fn put(&self, src: &FileRef, dst: &FileRef) -> std::io::Result<()> {
        tokio::fs::rename(src.full_path(), dst.full_path()).await
    }

}

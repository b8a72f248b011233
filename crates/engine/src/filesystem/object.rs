use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use rasbora_common::config::ObjectFilesystemConfig;
use rasbora_common::types::FileRef;

use super::FileMover;

/// S3-compatible object-store backed mover. Grounded on
/// `internal/filesystem/filesystem_objects.go`'s `ObjectFileSystem`
/// (`minio-go`); `aws-sdk-s3` is used instead since this is a native S3
/// client available in the Rust ecosystem and several pack manifests reach
/// for it for S3-compatible endpoints. The bucket is centrally configured
/// (`filesystem.object.bucket`); a `FileRef`'s `file_path`/`file_name` form
/// the object key within it.
pub struct ObjectFileMover {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectFileMover {
    pub async fn connect(config: &ObjectFilesystemConfig) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "rasbora-static",
        );

        let scheme = if config.use_ssl { "https" } else { "http" };
        let endpoint = format!("{scheme}://{}", config.endpoint);

        let s3_config = aws_sdk_s3::config::Builder::new()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .force_path_style(true)
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }

    fn key(file: &FileRef) -> String {
        format!("{}/{}", file.file_path.trim_matches('/'), file.file_name)
    }
}

fn to_io_error<E: std::fmt::Display>(e: E) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

#[async_trait]
impl FileMover for ObjectFileMover {
    async fn get(&self, src: &FileRef, dst: &FileRef) -> std::io::Result<()> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(src))
            .send()
            .await
            .map_err(to_io_error)?;

        let data = output.body.collect().await.map_err(to_io_error)?;
        tokio::fs::write(dst.full_path(), data.into_bytes()).await
    }

    async fn put(&self, src: &FileRef, dst: &FileRef) -> std::io::Result<()> {
        let body = ByteStream::from_path(src.full_path())
            .await
            .map_err(to_io_error)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key(dst))
            .body(body)
            .send()
            .await
            .map_err(to_io_error)?;

        Ok(())
    }

}

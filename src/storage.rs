use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Narrow contract with object storage: upload a blob and get back an opaque
/// URL for `Board.image_url`, delete a blob by that URL. The core never
/// interprets the URL.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<String, ImageStoreError>;
    async fn delete(&self, url: &str) -> Result<(), ImageStoreError>;
}

// ---------------- S3 implementation (MinIO compatible) ----------------
pub struct S3ImageStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
    public_base: String,
}

impl S3ImageStore {
    pub async fn new() -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "agora-images".into());
        let endpoint = std::env::var("S3_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));
        loader = loader.endpoint_url(endpoint.clone());
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing (required for MinIO/local endpoints without
        // wildcard DNS)
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3/MinIO client (path-style addressing enabled)");

        // Ensure bucket exists (create if missing)
        if client.head_bucket().bucket(&bucket).send().await.is_err() {
            warn!("head_bucket failed for '{bucket}', attempting create");
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e) if attempt >= 8 => {
                        error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e:?}");
                        return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e}"));
                    }
                    Err(e) => {
                        let backoff_ms = 200 * attempt.pow(2);
                        warn!("create_bucket attempt {attempt} failed: {e:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64))
                            .await;
                    }
                }
            }
        }

        let public_base = format!("{}/{}", endpoint.trim_end_matches('/'), bucket);
        Ok(Self {
            bucket,
            client,
            prefix: "images".into(),
            public_base,
        })
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}/{}/{}", self.prefix, &key[0..2], key)
    }

    fn url_for(&self, object_key: &str) -> String {
        format!("{}/{}", self.public_base, object_key)
    }

    fn key_from_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&format!("{}/", self.public_base))
            .map(|k| k.to_string())
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<String, ImageStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let object_key = self.key_for(key);
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!(
                "put_object failed key={object_key} bucket={} err={:?}",
                self.bucket, e
            );
            return Err(ImageStoreError::Other(e.to_string()));
        }
        Ok(self.url_for(&object_key))
    }

    async fn delete(&self, url: &str) -> Result<(), ImageStoreError> {
        let Some(object_key) = self.key_from_url(url) else {
            warn!("image url '{url}' does not belong to this store, skipping delete");
            return Ok(());
        };
        // Best-effort delete: treat not found as success
        let _ = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;
        Ok(())
    }
}

// Factory helper used in main (panic early if misconfigured)
pub async fn build_image_store() -> Arc<dyn ImageStore> {
    match S3ImageStore::new().await {
        Ok(store) => Arc::new(store),
        Err(e) => panic!("Failed to initialize S3 image store: {e}"),
    }
}

//! Blob storage for uploaded document files.

pub mod local;
pub mod supabase;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BlobBackend;
use crate::error::BlobError;

pub use local::LocalBlobStore;
pub use supabase::SupabaseBlobStore;

/// A bucket of immutable objects addressed by path.
///
/// Uploads never overwrite: writing an existing path fails with
/// [`BlobError::AlreadyExists`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` at `path` and returns the public URL.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError>;

    /// Public URL of an object, whether or not it exists.
    fn public_url(&self, path: &str) -> String;

    async fn download(&self, path: &str) -> Result<Vec<u8>, BlobError>;
}

/// Builds the configured backend.
pub fn from_backend(backend: &BlobBackend) -> Arc<dyn BlobStore> {
    match backend {
        BlobBackend::Local {
            dir,
            public_base_url,
        } => Arc::new(LocalBlobStore::new(dir.clone(), public_base_url.clone())),
        BlobBackend::Supabase { url, key, bucket } => {
            Arc::new(SupabaseBlobStore::new(url.clone(), key.clone(), bucket.clone()))
        }
    }
}

/// Rejects empty, absolute and parent-relative object paths.
pub(crate) fn check_path(path: &str) -> Result<(), BlobError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(BlobError::InvalidPath(path.to_string()));
    }
    Ok(())
}

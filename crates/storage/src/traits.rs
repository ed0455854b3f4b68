//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// Page size constraints for listing operations.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Maximum size for continuation tokens (2 KB).
pub const MAX_TOKEN_SIZE: usize = 2048;

/// A boxed stream of listing pages.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ListingPage>> + Send + 'a>>;

/// An opaque, backend-specific continuation token.
#[derive(Clone, PartialEq, Eq)]
pub struct ContinuationToken(Vec<u8>);

impl ContinuationToken {
    /// Returns an error if the token exceeds [`MAX_TOKEN_SIZE`].
    pub fn new(data: Vec<u8>) -> StorageResult<Self> {
        if data.len() > MAX_TOKEN_SIZE {
            return Err(crate::error::StorageError::InvalidContinuationToken(
                format!(
                    "continuation token too large: {} bytes (max: {})",
                    data.len(),
                    MAX_TOKEN_SIZE
                ),
            ));
        }
        Ok(Self(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContinuationToken")
            .field(&"<redacted>")
            .finish()
    }
}

/// A single page of listing results.
#[derive(Clone, Debug)]
pub struct ListingPage {
    /// Object keys in this page.
    pub keys: Vec<String>,
    /// Set when the backend has more results after this page.
    pub next_token: Option<ContinuationToken>,
}

/// Options for listing operations.
#[derive(Clone, Debug)]
pub struct ListingOptions {
    /// Keys per page, clamped to [`MIN_PAGE_SIZE`, `MAX_PAGE_SIZE`].
    pub page_size: usize,
}

impl ListingOptions {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    pub fn normalized_page_size(&self) -> usize {
        self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// Blob store holding offloaded Data payloads.
///
/// Keys are `/`-separated relative paths. `delete` of a missing key returns
/// [`StorageError::NotFound`](crate::StorageError::NotFound) so that callers can
/// decide whether absence is an error.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size and modification time without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object atomically, replacing any previous content.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Put an object only if it doesn't exist. Returns whether it was written.
    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List objects under a prefix, one page at a time.
    fn list_pages<'a>(&'a self, prefix: &str, options: ListingOptions) -> PageStream<'a>;

    /// Static identifier used in logs and metrics (e.g. "s3", "filesystem").
    fn backend_name(&self) -> &'static str;

    /// Verify backend connectivity. Called once at startup.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Flat key stream over [`ObjectStore::list_pages`].
pub trait ObjectStoreListStreamExt: ObjectStore {
    fn list_keys<'a>(
        &'a self,
        prefix: &str,
        options: Option<ListingOptions>,
    ) -> Pin<Box<dyn Stream<Item = StorageResult<String>> + Send + 'a>> {
        let page_stream = self.list_pages(prefix, options.unwrap_or_default());

        let key_stream = page_stream.flat_map(|page_result| match page_result {
            Ok(page) => futures::stream::iter(page.keys.into_iter().map(Ok)).boxed(),
            Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
        });

        Box::pin(key_stream)
    }
}

impl<T: ObjectStore + ?Sized> ObjectStoreListStreamExt for T {}

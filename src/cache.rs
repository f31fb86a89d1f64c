use crate::{Request, Response};
use async_trait::async_trait;

/// Named, durable partitions of request/response pairs.
///
/// Each operation is individually atomic, but nothing spans several
/// operations. Implementations must refuse to store anything but `GET`
/// requests, and lookups for any other method always miss.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the partition called `name` if it doesn't already exist.
    async fn open(&self, name: &str) -> Result<(), StorageError>;

    /// The names of every partition, in the order they were created.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Does a partition called `name` exist?
    async fn has(&self, name: &str) -> Result<bool, StorageError>;

    /// Destroy a partition, returning `true` if it existed.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    /// Look up a stored response. A missing partition is treated as empty.
    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError>;

    /// Store a single entry, replacing any previous response for the same
    /// request.
    async fn put(
        &self,
        name: &str,
        request: &Request,
        response: Response,
    ) -> Result<(), StorageError> {
        self.put_all(name, vec![(request.clone(), response)]).await
    }

    /// Store a batch of entries. Either every entry is written or none are.
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), StorageError>;

    /// How many entries are in a partition?
    async fn entries(&self, name: &str) -> Result<usize, StorageError>;
}

#[async_trait]
impl<'s, S: CacheStorage + ?Sized> CacheStorage for &'s S {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        (**self).open(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        (**self).keys().await
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        (**self).has(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        (**self).delete(name).await
    }

    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError> {
        (**self).match_request(name, request).await
    }

    async fn put(
        &self,
        name: &str,
        request: &Request,
        response: Response,
    ) -> Result<(), StorageError> {
        (**self).put(name, request, response).await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), StorageError> {
        (**self).put_all(name, entries).await
    }

    async fn entries(&self, name: &str) -> Result<usize, StorageError> {
        (**self).entries(name).await
    }
}

/// Reasons a [`CacheStorage`] operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The partition hasn't been opened.
    #[error("The \"{0}\" cache partition doesn't exist")]
    NoSuchPartition(String),
    /// The partition name can't be used by this storage backend.
    #[error("\"{0}\" isn't a valid cache partition name")]
    InvalidName(String),
    /// Only `GET` requests can be cached.
    #[error("Unable to cache a \"{method}\" request for \"{url}\"")]
    UnsupportedMethod {
        /// The offending method.
        method: http::Method,
        /// The request's URL.
        url: url::Url,
    },
    /// Partial responses can't be cached.
    #[error("Unable to cache the partial response for \"{0}\"")]
    PartialResponse(url::Url),
    /// An OS-level error occurred.
    #[error("An OS-level error occurred")]
    Io(#[from] std::io::Error),
    /// A stored partition couldn't be decoded.
    #[cfg(feature = "serde-1")]
    #[error("Unable to decode the stored partition")]
    Corrupted(#[from] serde_json::Error),
    /// A stored entry decoded, but its status or headers are invalid.
    #[cfg(feature = "serde-1")]
    #[error("The stored entry for \"{0}\" is malformed")]
    Malformed(url::Url),
}

/// Check an entry is something a cache is allowed to store.
pub(crate) fn ensure_cacheable(
    request: &Request,
    response: &Response,
) -> Result<(), StorageError> {
    if request.method() != http::Method::GET {
        return Err(StorageError::UnsupportedMethod {
            method: request.method().clone(),
            url: request.url().clone(),
        });
    }

    if response.status() == http::StatusCode::PARTIAL_CONTENT {
        return Err(StorageError::PartialResponse(request.url().clone()));
    }

    Ok(())
}

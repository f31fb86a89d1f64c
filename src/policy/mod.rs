//! Deciding which requests the worker should answer.

mod context;
mod options;

pub use context::{BasicContext, Context};
pub use options::Options;

use url::Url;

/// How a request will be handled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Answer from the current cache partition, falling back to the network.
    CacheFirst,
    /// Leave the request alone so the host's default handling applies.
    NotIntercepted,
}

impl Options {
    /// Decide whether a request for `url` is eligible for cache-first
    /// handling.
    ///
    /// A URL is eligible when its path is exactly one of the
    /// [`Options::precache()`] entries, or its origin is exactly one of the
    /// [`Options::trusted_origins()`]. No normalisation is done, so a
    /// relative entry like `"index.html"` never matches the path
    /// `"/index.html"`.
    pub fn classify(&self, url: &Url) -> Classification {
        let path = url.path();
        let origin = url.origin().ascii_serialization();

        if self.precache().iter().any(|p| p == path)
            || self.trusted_origins().iter().any(|o| *o == origin)
        {
            Classification::CacheFirst
        } else {
            Classification::NotIntercepted
        }
    }
}

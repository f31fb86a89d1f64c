//! [`CacheStorage`][crate::CacheStorage] backends.

#[cfg(feature = "serde-1")]
mod directory;
mod memory;

#[cfg(feature = "serde-1")]
pub use directory::DirectoryStorage;
pub use memory::MemoryStorage;

use crate::{
    cache::ensure_cacheable, CacheStorage, Request, RequestKey, Response,
    StorageError,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

/// An in-memory [`CacheStorage`].
///
/// The lock is only ever held for the duration of a single operation, so it's
/// fine to use a [`std::sync::Mutex`] even though callers are `async`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    partitions: Mutex<Vec<Partition>>,
}

#[derive(Debug)]
struct Partition {
    name: String,
    entries: HashMap<RequestKey, Response>,
}

impl MemoryStorage {
    /// Create a new, empty [`MemoryStorage`].
    pub fn new() -> Self { MemoryStorage::default() }

    fn partitions(&self) -> MutexGuard<'_, Vec<Partition>> {
        // a panic while holding the lock can't leave a partition half-written
        self.partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn find<'p>(
    partitions: &'p mut [Partition],
    name: &str,
) -> Option<&'p mut Partition> {
    partitions.iter_mut().find(|p| p.name == name)
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        let mut partitions = self.partitions();

        if find(&mut partitions, name).is_none() {
            partitions.push(Partition {
                name: name.to_string(),
                entries: HashMap::new(),
            });
        }

        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.partitions().iter().map(|p| p.name.clone()).collect())
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.partitions().iter().any(|p| p.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let mut partitions = self.partitions();
        let before = partitions.len();
        partitions.retain(|p| p.name != name);

        Ok(partitions.len() != before)
    }

    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError> {
        if request.method() != http::Method::GET {
            return Ok(None);
        }

        let mut partitions = self.partitions();

        Ok(find(&mut partitions, name)
            .and_then(|p| p.entries.get(&request.key()))
            .cloned())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), StorageError> {
        for (request, response) in &entries {
            ensure_cacheable(request, response)?;
        }

        let mut partitions = self.partitions();
        let partition = find(&mut partitions, name)
            .ok_or_else(|| StorageError::NoSuchPartition(name.to_string()))?;

        partition.entries.extend(
            entries
                .into_iter()
                .map(|(request, response)| (request.key(), response)),
        );

        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<usize, StorageError> {
        let mut partitions = self.partitions();

        find(&mut partitions, name)
            .map(|p| p.entries.len())
            .ok_or_else(|| StorageError::NoSuchPartition(name.to_string()))
    }
}

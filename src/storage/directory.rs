use crate::{
    cache::ensure_cacheable, CacheStorage, Request, RequestKey, Response,
    StorageError,
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Mutex,
    time::SystemTime,
};
use url::Url;

/// A [`CacheStorage`] which persists each partition as a JSON file inside a
/// directory, so cached entries survive restarts.
///
/// # Note
///
/// Partition files are small, so reads and writes are done synchronously
/// while holding an internal lock. Each write goes to a temporary file which
/// is then renamed over the original, meaning a partition is never observed
/// half-written.
#[derive(Debug)]
pub struct DirectoryStorage {
    root: PathBuf,
    lock: Mutex<()>,
}

impl DirectoryStorage {
    const EXTENSION: &'static str = "json";

    /// Use `root` for storage, creating it if necessary.
    pub fn new<P: Into<PathBuf>>(root: P) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(DirectoryStorage {
            root,
            lock: Mutex::new(()),
        })
    }

    /// The directory partitions are stored in.
    pub fn root(&self) -> &Path { &self.root }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_name(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }

        Ok(self.root.join(format!("{}.{}", name, Self::EXTENSION)))
    }

    fn with_lock<T>(
        &self,
        thunk: impl FnOnce() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        thunk()
    }

    fn load(&self, name: &str) -> Result<Option<Stored>, StorageError> {
        let path = self.path_for(name)?;

        match fs::read(&path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, partition: &Stored) -> Result<(), StorageError> {
        let path = self.path_for(&partition.name)?;
        let temp = path.with_extension("tmp");

        fs::write(&temp, serde_json::to_vec(partition)?)?;
        fs::rename(&temp, &path)?;

        Ok(())
    }

    /// Every partition name, named after its file so that a partition which
    /// no longer decodes can still be listed (and deleted).
    fn names(&self) -> Result<Vec<String>, StorageError> {
        let mut partitions = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();

            if path.extension().and_then(|ext| ext.to_str())
                != Some(Self::EXTENSION)
            {
                continue;
            }

            let stem = path.file_stem().and_then(|stem| stem.to_str());
            let name = match stem {
                Some(stem) if is_valid_name(stem) => stem.to_string(),
                _ => continue,
            };

            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!(
                        "Unable to read \"{}\": {}",
                        path.display(),
                        e
                    );
                    continue;
                },
            };

            let created_at = match serde_json::from_slice::<Stored>(&raw) {
                Ok(stored) => stored.created_at,
                Err(e) => {
                    log::warn!(
                        "The \"{}\" cache partition is corrupted: {}",
                        name,
                        e
                    );
                    SystemTime::UNIX_EPOCH
                },
            };

            partitions.push((created_at, name));
        }

        partitions.sort();

        Ok(partitions.into_iter().map(|(_, name)| name).collect())
    }
}

/// Partition names become file names, so they mustn't be able to escape the
/// root directory.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| c == '/' || c == '\\' || c == '\0')
}

#[async_trait]
impl CacheStorage for DirectoryStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        self.with_lock(|| {
            if self.load(name)?.is_none() {
                self.save(&Stored {
                    name: name.to_string(),
                    created_at: SystemTime::now(),
                    entries: Vec::new(),
                })?;
            }

            Ok(())
        })
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.with_lock(|| self.names())
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        self.with_lock(|| Ok(self.path_for(name)?.exists()))
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        self.with_lock(|| match fs::remove_file(self.path_for(name)?) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
    }

    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, StorageError> {
        if request.method() != Method::GET {
            return Ok(None);
        }

        let key = request.key();

        self.with_lock(|| {
            let partition = match self.load(name)? {
                Some(p) => p,
                None => return Ok(None),
            };

            partition
                .entries
                .into_iter()
                .find(|entry| {
                    entry.url == key.url && entry.method == key.method.as_str()
                })
                .map(StoredEntry::into_response)
                .transpose()
        })
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), StorageError> {
        for (request, response) in &entries {
            ensure_cacheable(request, response)?;
        }

        self.with_lock(|| {
            let mut partition = self.load(name)?.ok_or_else(|| {
                StorageError::NoSuchPartition(name.to_string())
            })?;

            for (request, response) in entries {
                let entry = StoredEntry::new(request.key(), &response);
                partition.entries.retain(|existing| {
                    existing.url != entry.url || existing.method != entry.method
                });
                partition.entries.push(entry);
            }

            self.save(&partition)
        })
    }

    async fn entries(&self, name: &str) -> Result<usize, StorageError> {
        self.with_lock(|| {
            self.load(name)?
                .map(|p| p.entries.len())
                .ok_or_else(|| {
                    StorageError::NoSuchPartition(name.to_string())
                })
        })
    }
}

/// The on-disk representation of a partition.
#[derive(Debug, Serialize, Deserialize)]
struct Stored {
    name: String,
    created_at: SystemTime,
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    method: String,
    url: Url,
    status: u16,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

impl StoredEntry {
    fn new(key: RequestKey, response: &Response) -> Self {
        StoredEntry {
            method: key.method.as_str().to_string(),
            url: key.url,
            status: response.status().as_u16(),
            headers: response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (name.as_str().to_string(), value.as_bytes().to_vec())
                })
                .collect(),
            body: response.body().to_vec(),
        }
    }

    fn into_response(self) -> Result<Response, StorageError> {
        let url = self.url;
        let malformed = || StorageError::Malformed(url.clone());

        let status =
            StatusCode::from_u16(self.status).map_err(|_| malformed())?;
        let mut headers = HeaderMap::new();

        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| malformed())?;
            let value =
                HeaderValue::from_bytes(&value).map_err(|_| malformed())?;
            headers.append(name, value);
        }

        Ok(Response::from_parts(status, headers, Bytes::from(self.body)))
    }
}

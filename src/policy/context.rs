use crate::{storage::MemoryStorage, CacheStorage, HttpNetwork, Network};
use std::sync::atomic::{AtomicBool, Ordering};

/// The host environment a policy runs inside.
///
/// This gives the policy access to cache storage and the network, and lets
/// it nudge the worker lifecycle along.
pub trait Context: Sync {
    /// The cache storage shared by every event.
    fn storage(&self) -> &dyn CacheStorage;

    /// The network used for precaching and cache misses.
    fn network(&self) -> &dyn Network;

    /// Ask the host to activate this version immediately instead of waiting
    /// for every page using the previous version to close.
    fn skip_waiting(&self) {}

    /// Ask the host to route requests from already-open pages through this
    /// version without a reload.
    fn claim_clients(&self) {}
}

/// A basic [`Context`] implementation which records lifecycle signals.
#[derive(Debug)]
pub struct BasicContext<S = MemoryStorage, N = HttpNetwork> {
    storage: S,
    network: N,
    skipped_waiting: AtomicBool,
    claimed_clients: AtomicBool,
}

impl<S, N> BasicContext<S, N> {
    /// Create a [`BasicContext`] from its parts.
    pub fn new(storage: S, network: N) -> Self {
        BasicContext {
            storage,
            network,
            skipped_waiting: AtomicBool::new(false),
            claimed_clients: AtomicBool::new(false),
        }
    }

    /// Has [`Context::skip_waiting()`] been called?
    pub fn skipped_waiting(&self) -> bool {
        self.skipped_waiting.load(Ordering::SeqCst)
    }

    /// Has [`Context::claim_clients()`] been called?
    pub fn claimed_clients(&self) -> bool {
        self.claimed_clients.load(Ordering::SeqCst)
    }

    /// Get a reference to the underlying storage.
    pub fn storage_ref(&self) -> &S { &self.storage }

    /// Get a reference to the underlying network.
    pub fn network_ref(&self) -> &N { &self.network }
}

impl Default for BasicContext {
    fn default() -> Self {
        BasicContext::new(MemoryStorage::new(), HttpNetwork::default())
    }
}

impl<S, N> Context for BasicContext<S, N>
where
    S: CacheStorage,
    N: Network,
{
    fn storage(&self) -> &dyn CacheStorage { &self.storage }

    fn network(&self) -> &dyn Network { &self.network }

    fn skip_waiting(&self) {
        log::debug!("Skipping the waiting phase");
        self.skipped_waiting.store(true, Ordering::SeqCst);
    }

    fn claim_clients(&self) {
        log::debug!("Claiming already-open clients");
        self.claimed_clients.store(true, Ordering::SeqCst);
    }
}

//! The install, activate, and fetch handlers.

use crate::{
    Classification, Context, FetchError, Options, Request, Response,
    StorageError,
};
use async_trait::async_trait;
use futures::future;
use http::StatusCode;
use url::Url;

/// The three events a host delivers to a worker.
///
/// Each handler only resolves once all of its asynchronous work has settled,
/// so a host (or a test) can await it instead of relying on event timing.
#[async_trait]
pub trait Worker: Sync {
    /// Populate the cache for this version, returning the number of entries
    /// written.
    ///
    /// An error means the cache couldn't be populated. It is informational
    /// only: installation still counts as complete.
    async fn on_install(&self, ctx: &dyn Context)
        -> Result<usize, InstallError>;

    /// Remove every cache partition belonging to another version.
    async fn on_activate(
        &self,
        ctx: &dyn Context,
    ) -> Result<Activation, StorageError>;

    /// Decide how an outgoing request should be answered.
    async fn on_fetch(&self, ctx: &dyn Context, request: &Request)
        -> FetchOutcome;
}

/// A [`Worker`] which serves allow-listed resources cache-first and leaves
/// everything else to the network.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheFirst {
    options: Options,
}

impl CacheFirst {
    /// Create a new [`CacheFirst`] policy.
    pub fn new(options: Options) -> Self { CacheFirst { options } }

    /// The [`Options`] this policy was created with.
    pub fn options(&self) -> &Options { &self.options }

    async fn precache(&self, ctx: &dyn Context) -> Result<usize, InstallError> {
        let version = self.options.version();
        let storage = ctx.storage();

        storage.open(version).await?;
        log::info!("Populating the \"{}\" cache", version);

        let urls = self.options.precache_urls()?;
        let fetches = urls.into_iter().map(|url| fetch_ok(ctx, url));
        let entries = future::try_join_all(fetches).await?;
        let count = entries.len();

        storage.put_all(version, entries).await?;

        Ok(count)
    }

    async fn fill(
        &self,
        ctx: &dyn Context,
        request: &Request,
        response: &Response,
    ) {
        if !response.ok() {
            return;
        }

        let version = self.options.version();
        let storage = ctx.storage();
        let result = match storage.open(version).await {
            Ok(_) => storage.put(version, request, response.clone()).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            log::warn!(
                "Unable to store \"{}\" in the \"{}\" cache: {}",
                request.url(),
                version,
                e
            );
        }
    }
}

/// Fetch a resource for precaching, treating anything but a `2xx` as an
/// error.
async fn fetch_ok(
    ctx: &dyn Context,
    url: Url,
) -> Result<(Request, Response), InstallError> {
    let request = Request::get(url);
    let response = ctx.network().fetch(&request).await?;

    if !response.ok() {
        return Err(InstallError::BadStatus {
            url: request.url().clone(),
            status: response.status(),
        });
    }

    Ok((request, response))
}

#[async_trait]
impl Worker for CacheFirst {
    async fn on_install(
        &self,
        ctx: &dyn Context,
    ) -> Result<usize, InstallError> {
        log::info!("Installing \"{}\"", self.options.version());

        let result = self.precache(ctx).await;

        if let Err(e) = &result {
            log::error!("Unable to populate the initial cache: {}", e);
        }

        ctx.skip_waiting();
        result
    }

    async fn on_activate(
        &self,
        ctx: &dyn Context,
    ) -> Result<Activation, StorageError> {
        let version = self.options.version();
        log::info!("Activating \"{}\"", version);

        let storage = ctx.storage();
        let names = match storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                log::error!("Unable to list the existing caches: {}", e);
                ctx.claim_clients();
                return Err(e);
            },
        };

        let deletions = names
            .into_iter()
            .filter(|name| name != version)
            .map(|name| async move {
                log::info!("Deleting the old \"{}\" cache", name);
                let result = storage.delete(&name).await;
                (name, result)
            });

        let mut activation = Activation::default();

        for (name, result) in future::join_all(deletions).await {
            match result {
                Ok(true) => activation.deleted.push(name),
                Ok(false) => {
                    log::debug!("The \"{}\" cache was already gone", name)
                },
                Err(e) => {
                    log::warn!(
                        "Unable to delete the \"{}\" cache: {}",
                        name,
                        e
                    );
                    activation.failed.push((name, e));
                },
            }
        }

        ctx.claim_clients();
        Ok(activation)
    }

    async fn on_fetch(
        &self,
        ctx: &dyn Context,
        request: &Request,
    ) -> FetchOutcome {
        let classification = self.options.classify(request.url());

        if classification == Classification::NotIntercepted {
            return FetchOutcome::PassThrough;
        }

        log::debug!("Cache-first for \"{}\"", request.url());

        match ctx
            .storage()
            .match_request(self.options.version(), request)
            .await
        {
            Ok(Some(response)) => {
                return FetchOutcome::Respond {
                    response,
                    source: Source::Cache,
                };
            },
            Ok(None) => {},
            Err(e) => log::warn!(
                "Unable to check the cache for \"{}\": {}",
                request.url(),
                e
            ),
        }

        match ctx.network().fetch(request).await {
            Ok(response) => {
                if self.options.fill_on_miss() {
                    self.fill(ctx, request, &response).await;
                }

                FetchOutcome::Respond {
                    response,
                    source: Source::Network,
                }
            },
            Err(e) => {
                log::error!("Fetch failed for \"{}\": {}", request.url(), e);
                FetchOutcome::NetworkError
            },
        }
    }
}

/// What happened when a [`Worker`] saw a request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The worker answered the request.
    Respond {
        /// The response handed back to the page.
        response: Response,
        /// Where the response came from.
        source: Source,
    },
    /// The request was eligible for caching, but it wasn't cached and the
    /// network fetch failed. The page will see a network error.
    NetworkError,
    /// The worker didn't intervene, so the host's default handling applies.
    PassThrough,
}

impl FetchOutcome {
    /// The response sent back to the page, if the worker answered.
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Did the worker take over this request?
    pub fn is_intercepted(&self) -> bool {
        !matches!(self, FetchOutcome::PassThrough)
    }
}

/// Where a [`FetchOutcome::Respond`] came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Source {
    /// The current cache partition.
    Cache,
    /// A live network request.
    Network,
}

/// The result of activating a worker.
#[derive(Debug, Default)]
pub struct Activation {
    /// Old partitions which this activation removed.
    pub deleted: Vec<String>,
    /// Old partitions which couldn't be removed.
    pub failed: Vec<(String, StorageError)>,
}

/// Reasons the cache couldn't be populated during installation.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// A precache entry isn't a valid URL.
    #[error("Unable to resolve a precache entry")]
    InvalidUrl(#[from] url::ParseError),
    /// A precache entry couldn't be fetched.
    #[error("Unable to fetch a precache entry")]
    Fetch(#[from] FetchError),
    /// The server didn't respond with a `2xx` status.
    #[error("Fetching \"{url}\" returned {status}")]
    BadStatus {
        /// The resource that was requested.
        url: Url,
        /// The status code that came back.
        status: StatusCode,
    },
    /// The cache partition couldn't be written to.
    #[error("Unable to update the cache")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{storage::MemoryStorage, BasicContext, CacheStorage, Network};
    use pretty_assertions::assert_eq;
    use std::{collections::HashMap, sync::Mutex};

    /// A [`Network`] which serves canned responses and remembers every URL it
    /// was asked for.
    #[derive(Debug, Default)]
    struct FakeNetwork {
        responses: HashMap<Url, Response>,
        requested: Mutex<Vec<Url>>,
    }

    impl FakeNetwork {
        fn serving<'a, I>(items: I) -> Self
        where
            I: IntoIterator<Item = (&'a str, &'a str)>,
        {
            FakeNetwork {
                responses: items
                    .into_iter()
                    .map(|(url, body)| {
                        (
                            Url::parse(url).unwrap(),
                            Response::new(StatusCode::OK, body.to_string()),
                        )
                    })
                    .collect(),
                ..Default::default()
            }
        }

        fn with(mut self, url: &str, response: Response) -> Self {
            self.responses.insert(Url::parse(url).unwrap(), response);
            self
        }

        fn requested(&self) -> Vec<Url> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn fetch(
            &self,
            request: &Request,
        ) -> Result<Response, FetchError> {
            self.requested.lock().unwrap().push(request.url().clone());

            self.responses.get(request.url()).cloned().ok_or_else(|| {
                FetchError::Unreachable {
                    url: request.url().clone(),
                    reason: String::from("offline"),
                }
            })
        }
    }

    /// A [`CacheStorage`] which refuses to delete one partition, and loses
    /// another one to somebody else right before it is deleted.
    #[derive(Debug)]
    struct StubbornStorage {
        inner: MemoryStorage,
        undeletable: &'static str,
        vanishing: &'static str,
    }

    #[async_trait]
    impl CacheStorage for StubbornStorage {
        async fn open(&self, name: &str) -> Result<(), StorageError> {
            self.inner.open(name).await
        }

        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            self.inner.keys().await
        }

        async fn has(&self, name: &str) -> Result<bool, StorageError> {
            self.inner.has(name).await
        }

        async fn delete(&self, name: &str) -> Result<bool, StorageError> {
            if name == self.undeletable {
                Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied)
                    .into())
            } else if name == self.vanishing {
                self.inner.delete(name).await?;
                self.inner.delete(name).await
            } else {
                self.inner.delete(name).await
            }
        }

        async fn match_request(
            &self,
            name: &str,
            request: &Request,
        ) -> Result<Option<Response>, StorageError> {
            self.inner.match_request(name, request).await
        }

        async fn put_all(
            &self,
            name: &str,
            entries: Vec<(Request, Response)>,
        ) -> Result<(), StorageError> {
            self.inner.put_all(name, entries).await
        }

        async fn entries(&self, name: &str) -> Result<usize, StorageError> {
            self.inner.entries(name).await
        }
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn shell() -> FakeNetwork {
        FakeNetwork::serving(vec![
            ("http://localhost/", "<html>root</html>"),
            ("http://localhost/index.html", "<html>index</html>"),
        ])
    }

    fn get(url: &str) -> Request { Request::get(Url::parse(url).unwrap()) }

    const V1: &str = "dacapo-cache-v1";
    const V2: &str = "dacapo-cache-v2";

    #[tokio::test]
    async fn install_stores_every_precache_entry() {
        init_logging();
        let ctx = BasicContext::new(MemoryStorage::new(), shell());
        let worker = CacheFirst::default();

        let got = worker.on_install(&ctx).await.unwrap();

        assert_eq!(got, 2);
        assert_eq!(ctx.storage_ref().entries(V1).await.unwrap(), 2);
        assert!(ctx.skipped_waiting());
    }

    #[tokio::test]
    async fn precached_resources_are_served_without_the_network() {
        init_logging();
        let ctx = BasicContext::new(MemoryStorage::new(), shell());
        let worker = CacheFirst::default();
        worker.on_install(&ctx).await.unwrap();
        let calls_after_install = ctx.network_ref().requested().len();

        let got = worker.on_fetch(&ctx, &get("http://localhost/")).await;

        assert_eq!(
            got,
            FetchOutcome::Respond {
                response: Response::new(StatusCode::OK, "<html>root</html>"),
                source: Source::Cache,
            }
        );
        assert_eq!(ctx.network_ref().requested().len(), calls_after_install);
    }

    #[tokio::test]
    async fn cached_bodies_are_returned_byte_for_byte() {
        init_logging();
        let ctx =
            BasicContext::new(MemoryStorage::new(), FakeNetwork::default());
        let worker = CacheFirst::default();
        let request = get("http://localhost/");
        let body: Vec<u8> = (0..=255).collect();
        let stored = Response::new(StatusCode::OK, body.clone()).with_header(
            http::header::ETAG,
            http::HeaderValue::from_static("\"abc\""),
        );
        ctx.storage().open(V1).await.unwrap();
        ctx.storage().put(V1, &request, stored.clone()).await.unwrap();

        let got = worker.on_fetch(&ctx, &request).await;

        assert_eq!(got.response(), Some(&stored));
        assert_eq!(got.response().unwrap().body().as_ref(), &body[..]);
        assert!(ctx.network_ref().requested().is_empty());
    }

    #[tokio::test]
    async fn a_failed_precache_still_completes_installation() {
        init_logging();
        let network = FakeNetwork::serving(vec![(
            "http://localhost/",
            "<html>root</html>",
        )]);
        let ctx = BasicContext::new(MemoryStorage::new(), network);
        let worker = CacheFirst::default();

        let err = worker.on_install(&ctx).await.unwrap_err();

        assert!(matches!(err, InstallError::Fetch(_)));
        assert!(ctx.skipped_waiting());
        assert!(ctx.storage_ref().has(V1).await.unwrap());
        assert_eq!(ctx.storage_ref().entries(V1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn error_statuses_fail_the_precache() {
        init_logging();
        let network = shell().with(
            "http://localhost/index.html",
            Response::new(StatusCode::NOT_FOUND, "missing"),
        );
        let ctx = BasicContext::new(MemoryStorage::new(), network);
        let worker = CacheFirst::default();

        let err = worker.on_install(&ctx).await.unwrap_err();

        match err {
            InstallError::BadStatus { url, status } => {
                assert_eq!(url.as_str(), "http://localhost/index.html");
                assert_eq!(status, StatusCode::NOT_FOUND);
            },
            other => panic!("Unexpected error: {:?}", other),
        }
        assert_eq!(ctx.storage_ref().entries(V1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn activation_deletes_every_other_partition() {
        init_logging();
        let ctx =
            BasicContext::new(MemoryStorage::new(), FakeNetwork::default());
        for name in &["dacapo-cache-v0", V1, "someone-elses-cache"] {
            ctx.storage().open(name).await.unwrap();
        }
        let worker = CacheFirst::default();

        let got = worker.on_activate(&ctx).await.unwrap();

        assert_eq!(got.deleted, vec!["dacapo-cache-v0", "someone-elses-cache"]);
        assert!(got.failed.is_empty());
        assert_eq!(ctx.storage_ref().keys().await.unwrap(), vec![V1]);
        assert!(ctx.claimed_clients());
    }

    #[tokio::test]
    async fn failed_deletions_are_collected_not_escalated() {
        init_logging();
        let storage = StubbornStorage {
            inner: MemoryStorage::new(),
            undeletable: "pinned",
            vanishing: "",
        };
        let ctx = BasicContext::new(storage, FakeNetwork::default());
        for name in &["pinned", "dacapo-cache-v0", V1] {
            ctx.storage().open(name).await.unwrap();
        }
        let worker = CacheFirst::default();

        let got = worker.on_activate(&ctx).await.unwrap();

        assert_eq!(got.deleted, vec!["dacapo-cache-v0"]);
        assert_eq!(got.failed.len(), 1);
        assert_eq!(got.failed[0].0, "pinned");
        assert_eq!(ctx.storage_ref().keys().await.unwrap(), vec!["pinned", V1]);
        assert!(ctx.claimed_clients());
    }

    #[tokio::test]
    async fn bumping_the_version_empties_storage_until_the_next_install() {
        init_logging();
        let ctx = BasicContext::new(MemoryStorage::new(), shell());
        let v1 = CacheFirst::default();
        v1.on_install(&ctx).await.unwrap();
        assert_eq!(ctx.storage_ref().entries(V1).await.unwrap(), 2);

        let v2 = CacheFirst::new(Options::default().with_version(V2));
        v2.on_activate(&ctx).await.unwrap();

        assert!(ctx.storage_ref().keys().await.unwrap().is_empty());

        v2.on_install(&ctx).await.unwrap();

        assert_eq!(ctx.storage_ref().keys().await.unwrap(), vec![V2]);
        assert_eq!(ctx.storage_ref().entries(V2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn trusted_origin_misses_go_to_the_network_without_caching() {
        init_logging();
        let font = "https://fonts.gstatic.com/s/dmsans/v15/font.woff2";
        let network = FakeNetwork::serving(vec![(font, "font bytes")]);
        let ctx = BasicContext::new(MemoryStorage::new(), network);
        ctx.storage().open(V1).await.unwrap();
        let worker = CacheFirst::default();

        let first = worker.on_fetch(&ctx, &get(font)).await;
        let second = worker.on_fetch(&ctx, &get(font)).await;

        let expected = FetchOutcome::Respond {
            response: Response::new(StatusCode::OK, "font bytes"),
            source: Source::Network,
        };
        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_eq!(ctx.network_ref().requested().len(), 2);
        assert_eq!(ctx.storage_ref().entries(V1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn network_failures_on_a_miss_become_network_errors() {
        init_logging();
        let ctx =
            BasicContext::new(MemoryStorage::new(), FakeNetwork::default());
        let worker = CacheFirst::default();
        let request = get("https://unpkg.com/lucide@latest");

        let got = worker.on_fetch(&ctx, &request).await;

        assert_eq!(got, FetchOutcome::NetworkError);
        assert!(got.is_intercepted());
        assert_eq!(ctx.network_ref().requested(), vec![request.url().clone()]);
    }

    #[tokio::test]
    async fn unlisted_requests_pass_straight_through() {
        init_logging();
        let api = "https://api.example.com/v1/scores";
        let network = FakeNetwork::serving(vec![(api, "[]")]);
        let ctx = BasicContext::new(MemoryStorage::new(), network);
        let worker = CacheFirst::default();

        let got = worker.on_fetch(&ctx, &get(api)).await;

        assert_eq!(got, FetchOutcome::PassThrough);
        assert!(!got.is_intercepted());
        assert!(ctx.network_ref().requested().is_empty());
        assert!(ctx.storage_ref().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filling_on_miss_stores_the_response_once() {
        init_logging();
        let css = "https://fonts.googleapis.com/css2?family=DM+Sans";
        let network = FakeNetwork::serving(vec![(css, "@font-face {}")]);
        let ctx = BasicContext::new(MemoryStorage::new(), network);
        let worker = CacheFirst::new(Options::default().set_fill_on_miss(true));

        let first = worker.on_fetch(&ctx, &get(css)).await;
        let second = worker.on_fetch(&ctx, &get(css)).await;

        assert!(matches!(
            first,
            FetchOutcome::Respond {
                source: Source::Network,
                ..
            }
        ));
        assert!(matches!(
            second,
            FetchOutcome::Respond {
                source: Source::Cache,
                ..
            }
        ));
        assert_eq!(ctx.network_ref().requested().len(), 1);
        assert_eq!(ctx.storage_ref().entries(V1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn filling_on_miss_skips_error_responses() {
        init_logging();
        let missing = "https://unpkg.com/does-not-exist";
        let network = FakeNetwork::default()
            .with(missing, Response::new(StatusCode::NOT_FOUND, "nope"));
        let ctx = BasicContext::new(MemoryStorage::new(), network);
        let worker = CacheFirst::new(Options::default().set_fill_on_miss(true));

        let got = worker.on_fetch(&ctx, &get(missing)).await;

        assert_eq!(got.response().unwrap().status(), StatusCode::NOT_FOUND);
        assert!(!ctx.storage_ref().has(V1).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_fetches_are_handled_independently() {
        init_logging();
        let ctx = BasicContext::new(MemoryStorage::new(), shell());
        let worker = CacheFirst::default();
        worker.on_install(&ctx).await.unwrap();
        let requests = vec![
            get("http://localhost/"),
            get("https://api.example.com/v1/scores"),
            get("https://unpkg.com/lucide@latest"),
        ];

        let got = future::join_all(
            requests.iter().map(|request| worker.on_fetch(&ctx, request)),
        )
        .await;

        assert!(matches!(
            got[0],
            FetchOutcome::Respond {
                source: Source::Cache,
                ..
            }
        ));
        assert_eq!(got[1], FetchOutcome::PassThrough);
        assert_eq!(got[2], FetchOutcome::NetworkError);
    }

    #[tokio::test]
    async fn partitions_that_were_already_gone_are_not_reported() {
        init_logging();
        let storage = StubbornStorage {
            inner: MemoryStorage::new(),
            undeletable: "",
            vanishing: "dacapo-cache-v0",
        };
        let ctx = BasicContext::new(storage, FakeNetwork::default());
        for name in &["dacapo-cache-v0", "dacapo-cache-beta", V1] {
            ctx.storage().open(name).await.unwrap();
        }
        let worker = CacheFirst::default();

        let got = worker.on_activate(&ctx).await.unwrap();

        assert_eq!(got.deleted, vec!["dacapo-cache-beta"]);
        assert!(got.failed.is_empty());
        assert_eq!(ctx.storage_ref().keys().await.unwrap(), vec![V1]);
    }
}

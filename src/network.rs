use crate::{Request, Response};
use async_trait::async_trait;
use reqwest::Client;

/// Something which can send a [`Request`] over the network.
#[async_trait]
pub trait Network: Send + Sync {
    /// Send the request, returning whatever the server responded with.
    ///
    /// An error status (e.g. `404`) is still a successful fetch. Only
    /// transport-level failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

#[async_trait]
impl<'n, N: Network + ?Sized> Network for &'n N {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        (**self).fetch(request).await
    }
}

/// A [`Network`] backed by a [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    /// The User-Agent used by [`HttpNetwork::default()`].
    pub const USER_AGENT: &'static str =
        concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

    /// Create a [`HttpNetwork`] with an already initialized [`Client`].
    pub fn with_client(client: Client) -> Self { HttpNetwork { client } }
}

impl Default for HttpNetwork {
    fn default() -> Self {
        let client = Client::builder()
            .user_agent(HttpNetwork::USER_AGENT)
            .build()
            .expect("Unable to initialize the client");

        HttpNetwork::with_client(client)
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        log::debug!("Fetching \"{}\" from the network", request.url());

        send(&self.client, request).await.map_err(|e| FetchError::Http {
            url: request.url().clone(),
            inner: e,
        })
    }
}

/// Send a request and buffer the entire body.
pub async fn send(
    client: &Client,
    request: &Request,
) -> Result<Response, reqwest::Error> {
    let response = client
        .request(request.method().clone(), request.url().clone())
        .headers(request.headers().clone())
        .send()
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    Ok(Response::from_parts(status, headers, body))
}

/// Reasons a fetch can fail.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The HTTP client was unable to complete the request.
    #[error("Unable to fetch \"{url}\"")]
    Http {
        /// The requested URL.
        url: url::Url,
        /// The underlying error.
        #[source]
        inner: reqwest::Error,
    },
    /// The resource couldn't be reached for some other reason.
    #[error("Unable to fetch \"{url}\": {reason}")]
    Unreachable {
        /// The requested URL.
        url: url::Url,
        /// A human-readable description of what went wrong.
        reason: String,
    },
}

//! A cache-first request interception policy for an offline-capable
//! application shell.
//!
//! Everything the host provides is injected through the [`Context`] trait,
//! so the [`CacheFirst`] policy itself is stateless and can be driven from
//! tests.

#![forbid(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

mod cache;
mod network;
mod policy;
pub mod storage;
mod worker;

pub use cache::{CacheStorage, StorageError};
pub use network::{FetchError, HttpNetwork, Network};
pub use policy::*;
pub use worker::*;

use bytes::Bytes;
use http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode};
use url::Url;

/// An intercepted outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
}

impl Request {
    /// Create a new [`Request`].
    pub fn new(method: Method, url: Url) -> Self {
        Request {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Create a `GET` [`Request`].
    pub fn get(url: Url) -> Self { Request::new(Method::GET, url) }

    /// Add a header to the request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method { &self.method }

    /// The target URL.
    pub fn url(&self) -> &Url { &self.url }

    /// Any headers sent with the request.
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// The identity a cache uses to store this request.
    ///
    /// Fragments never reach the server, so they aren't part of the key.
    pub fn key(&self) -> RequestKey {
        let mut url = self.url.clone();
        url.set_fragment(None);

        RequestKey {
            method: self.method.clone(),
            url,
        }
    }
}

/// The identity of a [`Request`] inside a cache partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// The request method.
    pub method: Method,
    /// The request URL, minus its fragment.
    pub url: Url,
}

/// A response, either stored in a cache partition or freshly fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Create a new [`Response`] with no headers.
    pub fn new<B: Into<Bytes>>(status: StatusCode, body: B) -> Self {
        Response::from_parts(status, HeaderMap::new(), body.into())
    }

    /// Assemble a [`Response`] from its parts.
    pub fn from_parts(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Response {
            status,
            headers,
            body,
        }
    }

    /// Add a header to the response.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The status code.
    pub fn status(&self) -> StatusCode { self.status }

    /// Was the request successful (i.e. a `2xx` status)?
    pub fn ok(&self) -> bool { self.status.is_success() }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// The response body.
    pub fn body(&self) -> &Bytes { &self.body }
}

//! Request and response snapshots latched by a fetch.

use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Method, StatusCode};
use url::Url;

/// An HTTP request: method, URL and headers.
///
/// Immutable once handed to a fetch. Redirects produce new requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
}

impl FetchRequest {
    /// Creates a GET request for `url`.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Parses `url` and creates a GET request for it.
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed URLs.
    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Url::parse(url).map(Self::get)
    }

    /// Replaces the request method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Builds the request that follows `response`, if it is a redirect with a
    /// usable `Location`.
    pub(crate) fn redirected_by(&self, response: &ResponseHead) -> Option<Self> {
        let status = response.status();
        if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
            return None;
        }
        let location = response.headers().get(LOCATION)?.to_str().ok()?;
        let url = response.url().join(location).ok()?;

        let method = match status.as_u16() {
            303 if self.method != Method::HEAD => Method::GET,
            301 | 302 if self.method != Method::GET && self.method != Method::HEAD => Method::GET,
            _ => self.method.clone(),
        };

        let mut headers = self.headers.clone();
        if !same_origin(&self.url, &url) {
            headers.remove(AUTHORIZATION);
        }
        Some(Self {
            method,
            url,
            headers,
        })
    }
}

/// Returns false when a `status` answer to `method` never carries a body.
pub(crate) fn response_carries_body(method: &Method, status: StatusCode) -> bool {
    *method != Method::HEAD
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

pub(crate) fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Status line and headers of a received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    status: StatusCode,
    url: Url,
    headers: HeaderMap,
}

impl ResponseHead {
    /// Creates a response head from its parts.
    #[must_use]
    pub fn new(status: StatusCode, url: Url, headers: HeaderMap) -> Self {
        Self {
            status,
            url,
            headers,
        }
    }

    pub(crate) fn from_response(response: &reqwest::Response) -> Self {
        Self::new(
            response.status(),
            response.url().clone(),
            response.headers().clone(),
        )
    }

    /// Returns the status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the URL that produced this response.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the declared `Content-Length`, if any.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Returns the declared media type: lower-cased, parameters stripped.
    #[must_use]
    pub fn media_type(&self) -> Option<String> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(media_type_essence)
    }
}

/// Extracts `type/subtype` from a `Content-Type` value.
#[must_use]
pub fn media_type_essence(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
}

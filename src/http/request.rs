use percent_encoding::percent_decode_str;
use serde::Deserialize;
use url::Url;

use crate::http::headers::{HeaderMap, has_token};
use crate::http::response::StatusCode;

/// HTTP request methods.
///
/// The server accepts exactly this set; any other token on the request line
/// is answered with 501 Not Implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// OPTIONS - Describe communication options
    OPTIONS,
}

/// Protocol version from the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// Represents a parsed HTTP request from a client.
///
/// `target` is the request-target exactly as received; `path` is its
/// percent-decoded, dot-segment-normalised path and `query` the raw query
/// string. The body is length-delimited and may contain any byte, including
/// NUL. A request that failed to parse still reaches the router, carrying the
/// status in `error`.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Raw request-target (e.g., "/a%20b/index.html?x=1")
    pub target: String,
    /// Decoded path (e.g., "/a b/index.html")
    pub path: String,
    /// Raw query string without the leading '?'
    pub query: String,
    /// HTTP version
    pub version: Version,
    /// Request headers
    pub headers: HeaderMap,
    /// Trailer fields received after a chunked body
    pub trailers: HeaderMap,
    /// Request body
    pub body: Vec<u8>,
    /// Declared Content-Length, if any
    pub content_length: Option<usize>,
    /// Whether the body used chunked transfer-encoding
    pub chunked: bool,
    /// Terminal parse status, if parsing failed
    pub error: Option<StatusCode>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Option<Version>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use webserv::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "HEAD" => Some(Method::HEAD),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "OPTIONS" => Some(Method::OPTIONS),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Version {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// Splits an origin-form request-target into a decoded path and raw query.
///
/// Dot segments are resolved, so `/a/../b` becomes `/b`. Returns `None` for
/// targets that are not origin-form, or that decode to invalid UTF-8 or
/// contain NUL.
pub fn decode_target(target: &str) -> Option<(String, String)> {
    if !target.starts_with('/') {
        return None;
    }
    // Prefixing an authority keeps "//x" a path instead of a host.
    let url = Url::parse(&format!("http://localhost{target}")).ok()?;
    let path = percent_decode_str(url.path()).decode_utf8().ok()?;
    if path.contains('\0') {
        return None;
    }
    Some((path.into_owned(), url.query().unwrap_or_default().to_string()))
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::GET,
            target: "/".to_string(),
            path: "/".to_string(),
            query: String::new(),
            version: Version::Http11,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            body: Vec::new(),
            content_length: None,
            chunked: false,
            error: None,
        }
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            target: None,
            version: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the request-target; it is decoded when the request is built.
    pub fn path(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let target = self.target.ok_or("path missing")?;
        let (path, query) = decode_target(&target).ok_or("invalid path")?;
        let content_length = (!self.body.is_empty()).then_some(self.body.len());
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            target,
            path,
            query,
            version: self.version.unwrap_or(Version::Http11),
            headers: self.headers,
            trailers: HeaderMap::new(),
            body: self.body,
            content_length,
            chunked: false,
            error: None,
        })
    }
}

impl Request {
    /// Retrieves a header value by name (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Declared Content-Length, or 0 when the header was absent.
    pub fn content_length(&self) -> usize {
        self.content_length.unwrap_or(0)
    }

    /// Size of the payload for limit checks: the larger of the declared and
    /// received lengths.
    pub fn payload_len(&self) -> usize {
        self.content_length().max(self.body.len())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Host header with any port stripped.
    pub fn host(&self) -> Option<&str> {
        let host = self.header("Host")?.trim();
        if host.starts_with('[') {
            // IPv6 literal: "[::1]:8080"
            return host.split_once(']').map(|(h, _)| &host[..h.len() + 1]);
        }
        Some(host.split(':').next().unwrap_or(host))
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent;
    /// HTTP/1.0 only keeps the connection with an explicit `keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("Connection");
        match self.version {
            Version::Http11 => !connection.is_some_and(|v| has_token(v, "close")),
            Version::Http10 => connection.is_some_and(|v| has_token(v, "keep-alive")),
        }
    }
}

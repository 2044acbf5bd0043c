use std::fmt;
use std::mem;

use bytes::{Buf, BytesMut};

use crate::http::request::{Method, Request, Version, decode_target};
use crate::http::response::StatusCode;

/// Bytes on the request line besides the target (method, spaces, version).
const REQUEST_LINE_OVERHEAD: usize = 32;
const MAX_CHUNK_LINE: usize = 1024;
const MAX_HEADERS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidTarget,
    UnsupportedVersion,
    UriTooLong,
    InvalidHeader,
    HeaderFieldTooLarge,
    HeadersTooLarge,
    MissingHost,
    DuplicateHeader,
    InvalidContentLength,
    UnsupportedTransferEncoding,
    AmbiguousFraming,
    InvalidChunk,
    PayloadTooLarge,
    /// More bytes are needed. Only returned by [`parse_http_request`].
    Incomplete,
}

impl ParseError {
    /// Status the server answers with for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::InvalidMethod | ParseError::UnsupportedTransferEncoding => {
                StatusCode::NotImplemented
            }
            ParseError::UnsupportedVersion => StatusCode::HttpVersionNotSupported,
            ParseError::UriTooLong => StatusCode::UriTooLong,
            ParseError::HeadersTooLarge => StatusCode::RequestHeaderFieldsTooLarge,
            ParseError::PayloadTooLarge => StatusCode::PayloadTooLarge,
            _ => StatusCode::BadRequest,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::InvalidRequest => "malformed request line",
            ParseError::InvalidMethod => "unsupported method",
            ParseError::InvalidTarget => "invalid request target",
            ParseError::UnsupportedVersion => "unsupported HTTP version",
            ParseError::UriTooLong => "request target too long",
            ParseError::InvalidHeader => "malformed header field",
            ParseError::HeaderFieldTooLarge => "header field too large",
            ParseError::HeadersTooLarge => "header section too large",
            ParseError::MissingHost => "missing Host header",
            ParseError::DuplicateHeader => "conflicting duplicate header",
            ParseError::InvalidContentLength => "invalid Content-Length",
            ParseError::UnsupportedTransferEncoding => "unsupported Transfer-Encoding",
            ParseError::AmbiguousFraming => "ambiguous message framing",
            ParseError::InvalidChunk => "malformed chunk",
            ParseError::PayloadTooLarge => "payload too large",
            ParseError::Incomplete => "incomplete request",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Hard ceilings applied while parsing. Exceeding any of them is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    pub max_uri_length: usize,
    pub max_header_block: usize,
    pub max_header_field: usize,
    pub max_body: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_uri_length: 4096,
            max_header_block: 8192,
            max_header_field: 4096,
            max_body: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    Fixed { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    ChunkTrailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body(BodyState),
    Complete,
    Error(ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Incomplete,
    Complete,
    Error(ParseError),
}

/// Incremental HTTP/1.x request parser.
///
/// Bytes are consumed from the front of the caller's buffer as they are
/// recognised, so the same parser can be fed one byte or one megabyte at a
/// time and reaches the same result. Anything after a complete request is
/// left in the buffer for the next one.
#[derive(Debug)]
pub struct RequestParser {
    limits: ParserLimits,
    state: ParseState,
    request: Request,
    header_bytes: usize,
    header_count: usize,
}

impl RequestParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            limits,
            state: ParseState::RequestLine,
            request: Request::default(),
            header_bytes: 0,
            header_count: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// True before the first byte of a request has been consumed.
    pub fn is_idle(&self) -> bool {
        self.state == ParseState::RequestLine
    }

    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.request = Request::default();
        self.header_bytes = 0;
        self.header_count = 0;
    }

    /// Hands out the parsed request (or the partial one carrying its error)
    /// and rearms the parser.
    pub fn take_request(&mut self) -> Request {
        let request = mem::take(&mut self.request);
        self.reset();
        request
    }

    /// Consumes as much of `buf` as the current state allows.
    pub fn advance(&mut self, buf: &mut BytesMut) -> ParseStatus {
        loop {
            let step = match self.state {
                ParseState::Complete => return ParseStatus::Complete,
                ParseState::Error(e) => return ParseStatus::Error(e),
                ParseState::RequestLine => self.parse_request_line(buf),
                ParseState::Headers => self.parse_header_line(buf),
                ParseState::Body(body) => self.parse_body(body, buf),
            };

            match step {
                Ok(true) => continue,
                Ok(false) => return ParseStatus::Incomplete,
                Err(e) => {
                    self.request.error = Some(e.status());
                    self.state = ParseState::Error(e);
                    return ParseStatus::Error(e);
                }
            }
        }
    }

    fn parse_request_line(&mut self, buf: &mut BytesMut) -> Result<bool, ParseError> {
        // Tolerate empty lines ahead of the request line.
        loop {
            if buf.starts_with(b"\r\n") {
                buf.advance(2);
            } else if buf.starts_with(b"\n") {
                buf.advance(1);
            } else {
                break;
            }
        }
        if buf.as_ref() == b"\r" {
            return Ok(false);
        }

        let limit = self.limits.max_uri_length + REQUEST_LINE_OVERHEAD;
        let Some(pos) = find_lf(buf) else {
            if buf.len() > limit {
                return Err(ParseError::UriTooLong);
            }
            return Ok(false);
        };
        if pos > limit {
            return Err(ParseError::UriTooLong);
        }

        let raw = buf.split_to(pos + 1);
        let line = std::str::from_utf8(trim_eol(&raw)).map_err(|_| ParseError::InvalidRequest)?;

        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::InvalidRequest);
        };
        if method.is_empty() || target.is_empty() || version.is_empty() {
            return Err(ParseError::InvalidRequest);
        }

        let method = Method::from_str(method).ok_or(if is_token(method) {
            ParseError::InvalidMethod
        } else {
            ParseError::InvalidRequest
        })?;
        if target.len() > self.limits.max_uri_length {
            return Err(ParseError::UriTooLong);
        }
        let version = Version::from_str(version).ok_or(if version.starts_with("HTTP/") {
            ParseError::UnsupportedVersion
        } else {
            ParseError::InvalidRequest
        })?;

        self.request.method = method;
        self.request.version = version;
        self.request.target = target.to_string();
        let (path, query) = decode_target(target).ok_or(ParseError::InvalidTarget)?;
        self.request.path = path;
        self.request.query = query;

        self.state = ParseState::Headers;
        Ok(true)
    }

    fn parse_header_line(&mut self, buf: &mut BytesMut) -> Result<bool, ParseError> {
        let Some(line) = self.take_field_line(buf)? else {
            return Ok(false);
        };
        if line.is_empty() {
            self.finish_headers()?;
            return Ok(true);
        }

        self.header_count += 1;
        if self.header_count > MAX_HEADERS {
            return Err(ParseError::HeadersTooLarge);
        }

        let (name, value) = parse_field(&line)?;
        let headers = &mut self.request.headers;

        if name.eq_ignore_ascii_case("Content-Length") {
            if headers.get(&name).is_some_and(|v| v != value) {
                return Err(ParseError::DuplicateHeader);
            }
        } else if (name.eq_ignore_ascii_case("Transfer-Encoding")
            || name.eq_ignore_ascii_case("Host"))
            && headers.contains(&name)
        {
            return Err(ParseError::DuplicateHeader);
        }

        headers.insert(name, value);
        Ok(true)
    }

    /// Reads one header or trailer line, enforcing the field and block limits
    /// even when the line has not arrived in full.
    fn take_field_line(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, ParseError> {
        let Some(pos) = find_lf(buf) else {
            if self.header_bytes + buf.len() > self.limits.max_header_block {
                return Err(ParseError::HeadersTooLarge);
            }
            // One spare byte for a CR that may precede the pending LF.
            if buf.len() > self.limits.max_header_field + 1 {
                return Err(ParseError::HeaderFieldTooLarge);
            }
            return Ok(None);
        };

        self.header_bytes += pos + 1;
        if self.header_bytes > self.limits.max_header_block {
            return Err(ParseError::HeadersTooLarge);
        }

        let raw = buf.split_to(pos + 1);
        let line = trim_eol(&raw);
        if line.len() > self.limits.max_header_field {
            return Err(ParseError::HeaderFieldTooLarge);
        }
        Ok(Some(line.to_vec()))
    }

    fn finish_headers(&mut self) -> Result<(), ParseError> {
        let req = &mut self.request;

        if req.version == Version::Http11 && !req.headers.contains("Host") {
            return Err(ParseError::MissingHost);
        }

        if let Some(len) = req.headers.get("Content-Length") {
            let len = len.trim();
            if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::InvalidContentLength);
            }
            let len = len
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength)?;
            req.content_length = Some(len);
        }

        if let Some(te) = req.headers.get("Transfer-Encoding") {
            if req.version == Version::Http10 {
                return Err(ParseError::AmbiguousFraming);
            }
            if !te.trim().eq_ignore_ascii_case("chunked") {
                return Err(ParseError::UnsupportedTransferEncoding);
            }
            req.chunked = true;
            self.state = ParseState::Body(BodyState::ChunkSize);
            return Ok(());
        }

        match req.content_length {
            Some(len) if len > self.limits.max_body => Err(ParseError::PayloadTooLarge),
            Some(len) if len > 0 => {
                req.body.reserve(len.min(64 * 1024));
                self.state = ParseState::Body(BodyState::Fixed { remaining: len });
                Ok(())
            }
            _ => {
                self.state = ParseState::Complete;
                Ok(())
            }
        }
    }

    fn parse_body(&mut self, body: BodyState, buf: &mut BytesMut) -> Result<bool, ParseError> {
        match body {
            BodyState::Fixed { remaining } => {
                let left = self.take_body_bytes(remaining, buf);
                self.state = if left == 0 {
                    ParseState::Complete
                } else {
                    ParseState::Body(BodyState::Fixed { remaining: left })
                };
                Ok(left == 0)
            }
            BodyState::ChunkSize => {
                let Some(pos) = find_lf(buf) else {
                    if buf.len() > MAX_CHUNK_LINE {
                        return Err(ParseError::InvalidChunk);
                    }
                    return Ok(false);
                };
                if pos > MAX_CHUNK_LINE {
                    return Err(ParseError::InvalidChunk);
                }
                let raw = buf.split_to(pos + 1);
                let size = parse_chunk_size(trim_eol(&raw))?;

                if size == 0 {
                    self.state = ParseState::Body(BodyState::ChunkTrailer);
                    return Ok(true);
                }
                if self.request.body.len().saturating_add(size) > self.limits.max_body {
                    return Err(ParseError::PayloadTooLarge);
                }
                self.state = ParseState::Body(BodyState::ChunkData { remaining: size });
                Ok(true)
            }
            BodyState::ChunkData { remaining } => {
                let left = self.take_body_bytes(remaining, buf);
                self.state = if left == 0 {
                    ParseState::Body(BodyState::ChunkDataEnd)
                } else {
                    ParseState::Body(BodyState::ChunkData { remaining: left })
                };
                Ok(left == 0)
            }
            BodyState::ChunkDataEnd => {
                if buf.starts_with(b"\r\n") {
                    buf.advance(2);
                } else if buf.starts_with(b"\n") {
                    buf.advance(1);
                } else if buf.is_empty() || buf.as_ref() == b"\r" {
                    return Ok(false);
                } else {
                    return Err(ParseError::InvalidChunk);
                }
                self.state = ParseState::Body(BodyState::ChunkSize);
                Ok(true)
            }
            BodyState::ChunkTrailer => {
                let Some(line) = self.take_field_line(buf)? else {
                    return Ok(false);
                };
                if line.is_empty() {
                    let req = &self.request;
                    if req.content_length.is_some_and(|len| len != req.body.len()) {
                        return Err(ParseError::AmbiguousFraming);
                    }
                    self.state = ParseState::Complete;
                    return Ok(true);
                }
                let (name, value) = parse_field(&line)?;
                self.request.trailers.insert(name, value);
                Ok(true)
            }
        }
    }

    /// Moves up to `remaining` bytes into the body; returns what is still owed.
    fn take_body_bytes(&mut self, remaining: usize, buf: &mut BytesMut) -> usize {
        let n = remaining.min(buf.len());
        self.request.body.extend_from_slice(&buf[..n]);
        buf.advance(n);
        remaining - n
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(ParserLimits::default())
    }
}

/// Parses one complete request from `buf`.
///
/// Returns the request and the number of bytes it occupied, or
/// `ParseError::Incomplete` when `buf` ends before the request does.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let mut parser = RequestParser::new(ParserLimits {
        max_body: usize::MAX,
        ..ParserLimits::default()
    });
    let mut pending = BytesMut::from(buf);

    match parser.advance(&mut pending) {
        ParseStatus::Complete => Ok((parser.take_request(), buf.len() - pending.len())),
        ParseStatus::Incomplete => Err(ParseError::Incomplete),
        ParseStatus::Error(e) => Err(e),
    }
}

fn find_lf(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

fn parse_field(line: &[u8]) -> Result<(String, String), ParseError> {
    if line.starts_with(b" ") || line.starts_with(b"\t") {
        // obsolete line folding
        return Err(ParseError::InvalidHeader);
    }
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::InvalidHeader)?;

    let name = std::str::from_utf8(&line[..colon]).map_err(|_| ParseError::InvalidHeader)?;
    if !is_token(name) {
        return Err(ParseError::InvalidHeader);
    }

    let value = &line[colon + 1..];
    if value.iter().any(|&b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(ParseError::InvalidHeader);
    }
    let value = String::from_utf8_lossy(value);
    let value = value.trim_matches(|c| c == ' ' || c == '\t');

    Ok((name.to_string(), value.to_string()))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    let size = std::str::from_utf8(size)
        .map_err(|_| ParseError::InvalidChunk)?
        .trim_matches(|c| c == ' ' || c == '\t');
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidChunk);
    }
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn leftover_bytes_stay_in_buffer() {
        let mut parser = RequestParser::default();
        let mut buf = BytesMut::from(
            &b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n"[..],
        );

        assert_eq!(parser.advance(&mut buf), ParseStatus::Complete);
        assert_eq!(parser.take_request().path, "/a");
        assert!(parser.is_idle());
        assert_eq!(parser.advance(&mut buf), ParseStatus::Complete);
        assert_eq!(parser.take_request().path, "/b");
        assert!(buf.is_empty());
    }

    #[test]
    fn chunk_size_extensions_are_ignored() {
        assert_eq!(parse_chunk_size(b"1a;name=value"), Ok(26));
        assert_eq!(parse_chunk_size(b"zz"), Err(ParseError::InvalidChunk));
        assert_eq!(parse_chunk_size(b""), Err(ParseError::InvalidChunk));
    }

    #[test]
    fn error_state_is_sticky() {
        let mut parser = RequestParser::default();
        let mut buf = BytesMut::from(&b"BREW / HTTP/1.1\r\n"[..]);

        assert_eq!(parser.advance(&mut buf), ParseStatus::Error(ParseError::InvalidMethod));
        buf.extend_from_slice(b"Host: x\r\n\r\n");
        assert_eq!(parser.advance(&mut buf), ParseStatus::Error(ParseError::InvalidMethod));
        assert_eq!(parser.take_request().error, Some(StatusCode::NotImplemented));
    }
}

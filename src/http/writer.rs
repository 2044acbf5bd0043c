use std::io::{self, Write};

use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes a response into its wire form.
///
/// Content-Length is always written from the body length, so a handler can
/// never emit a mismatched framing header. With `head_only` the headers
/// describe the full body but the body itself is left out.
pub fn serialize_response(resp: &Response, head_only: bool) -> Vec<u8> {
    let body: &[u8] = if head_only { &[] } else { &resp.body };
    let mut buf = Vec::with_capacity(256 + body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in resp.headers.iter() {
        if k.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(format!("Content-Length: {}\r\n", resp.body.len()).as_bytes());

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(body);

    buf
}

/// Outcome of one write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Bytes remain; wait for the next writable event.
    Partial,
    /// Every byte has been handed to the socket.
    Complete,
}

/// Serialized response plus the offset already flushed.
///
/// `written` only moves forward and never exceeds the buffer length.
pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response, false),
            written: 0,
        }
    }

    /// Writer for a HEAD response: GET headers, no body.
    pub fn head_only(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response, true),
            written: 0,
        }
    }

    /// Issues a single non-blocking write of the remaining bytes.
    pub fn write_to<W: Write>(&mut self, stream: &mut W) -> io::Result<WriteProgress> {
        if self.is_complete() {
            return Ok(WriteProgress::Complete);
        }

        match stream.write(&self.buffer[self.written..]) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "connection closed while writing",
            )),
            Ok(n) => {
                self.written += n;
                if self.is_complete() {
                    Ok(WriteProgress::Complete)
                } else {
                    Ok(WriteProgress::Partial)
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(WriteProgress::Partial)
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.written >= self.buffer.len()
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

use crate::http::headers::HeaderMap;
use crate::http::response::{Response, StatusCode};

/// Framing and hop-by-hop fields a script may not set. The server always
/// frames the body itself with Content-Length.
const DROPPED: &[&str] = &[
    "Content-Length",
    "Transfer-Encoding",
    "Keep-Alive",
    "Upgrade",
    "TE",
    "Trailer",
    "Proxy-Connection",
];

/// Turns raw script output into a response.
///
/// The header block ends at the first blank line (`\r\n\r\n` or `\n\n`,
/// whichever comes first). A `Status` field overrides the status, a
/// `Location` without one means 302. Output without a blank line is
/// served whole as a 200 HTML body.
pub fn translate(output: &[u8]) -> Response {
    let Some((head_end, sep_len)) = find_separator(output) else {
        return plain_body(output.to_vec());
    };

    let head = String::from_utf8_lossy(&output[..head_end]);
    let body = output[head_end + sep_len..].to_vec();

    let mut status = None;
    let mut headers = HeaderMap::new();
    for line in head.split('\n') {
        let line = line.trim_end_matches('\r');
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            continue;
        }
        if name.eq_ignore_ascii_case("Status") {
            status = value
                .get(..3)
                .and_then(|code| code.parse::<u16>().ok())
                .and_then(StatusCode::from_u16);
        } else if !DROPPED.iter().any(|d| d.eq_ignore_ascii_case(name)) {
            headers.insert(name, value);
        }
    }

    let status = status.unwrap_or(if headers.contains("Location") {
        StatusCode::Found
    } else {
        StatusCode::Ok
    });
    if !headers.contains("Content-Type") {
        headers.insert("Content-Type", "text/html; charset=utf-8");
    }

    let mut response = Response {
        status,
        headers,
        body: Vec::new(),
    };
    response.set_body(body);
    response
}

fn plain_body(body: Vec<u8>) -> Response {
    let mut response = Response {
        status: StatusCode::Ok,
        headers: HeaderMap::new(),
        body: Vec::new(),
    };
    response
        .headers
        .insert("Content-Type", "text/html; charset=utf-8");
    response.set_body(body);
    response
}

fn find_separator(output: &[u8]) -> Option<(usize, usize)> {
    let crlf = output.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = output.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l < c => Some((l, 2)),
        (Some(c), _) => Some((c, 4)),
        (None, Some(l)) => Some((l, 2)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_header_overrides() {
        let resp = translate(b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\nNot found");
        assert_eq!(resp.status, StatusCode::NotFound);
        assert_eq!(resp.body, b"Not found");
        assert_eq!(resp.headers.get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn lf_only_separator() {
        let resp = translate(b"X-Test: 1\n\nbody\n\nmore");
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(resp.headers.get("X-Test"), Some("1"));
        assert_eq!(resp.body, b"body\n\nmore");
    }

    #[test]
    fn location_defaults_to_found() {
        let resp = translate(b"Location: /elsewhere\r\n\r\n");
        assert_eq!(resp.status, StatusCode::Found);
    }

    #[test]
    fn framing_headers_are_not_forwarded() {
        let resp = translate(
            b"Transfer-Encoding: chunked\r\nKeep-Alive: timeout=5\r\nUpgrade: h2c\r\n\
              TE: trailers\r\nTrailer: X-Sum\r\nProxy-Connection: keep-alive\r\n\
              Content-Length: 999\r\nConnection: close\r\nX-Kept: yes\r\n\r\nhello",
        );
        for name in ["Transfer-Encoding", "Keep-Alive", "Upgrade", "TE", "Trailer", "Proxy-Connection"] {
            assert!(!resp.headers.contains(name), "{name} forwarded");
        }
        assert_eq!(resp.headers.get("Content-Length"), Some("5"));
        assert_eq!(resp.headers.get("Connection"), Some("close"));
        assert_eq!(resp.headers.get("X-Kept"), Some("yes"));

        let wire = String::from_utf8(crate::http::writer::serialize_response(&resp, false)).unwrap();
        assert!(!wire.to_ascii_lowercase().contains("chunked"), "{wire}");
        assert!(wire.ends_with("\r\n\r\nhello"), "{wire}");
    }

    #[test]
    fn no_separator_is_whole_body() {
        let resp = translate(b"just text");
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(resp.body, b"just text");
        assert_eq!(resp.headers.get("Content-Length"), Some("9"));
    }
}

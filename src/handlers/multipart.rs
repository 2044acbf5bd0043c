//! Minimal `multipart/form-data` reader.
//!
//! Works on the raw body bytes with explicit lengths; file payloads may hold
//! any byte, NUL included.

const MAX_BOUNDARY: usize = 70;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart<'a> {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: &'a [u8],
}

/// Extracts the boundary from a `multipart/form-data` Content-Type.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media = params.next()?.trim();
    if !media.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }

    params
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty() && b.len() <= MAX_BOUNDARY)
}

pub fn is_multipart(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        ct.split(';')
            .next()
            .is_some_and(|m| m.trim().to_ascii_lowercase().starts_with("multipart/"))
    })
}

/// Returns the first part that carries a `filename`; other parts are skipped.
pub fn first_file_part<'a>(body: &'a [u8], boundary: &str) -> Option<FilePart<'a>> {
    let delimiter = format!("--{boundary}");
    let closing = format!("\r\n--{boundary}");

    let mut pos = find(body, delimiter.as_bytes(), 0)? + delimiter.len();
    loop {
        // "--" right after a delimiter ends the body.
        if body[pos..].starts_with(b"--") {
            return None;
        }
        pos = skip_eol(body, pos)?;

        let headers_end = find(body, b"\r\n\r\n", pos)?;
        let headers = String::from_utf8_lossy(&body[pos..headers_end]);
        let data_start = headers_end + 4;
        let data_end = find(body, closing.as_bytes(), data_start)?;

        if let Some(filename) = part_filename(&headers) {
            return Some(FilePart {
                filename,
                content_type: part_header(&headers, "Content-Type").map(str::to_string),
                data: &body[data_start..data_end],
            });
        }
        pos = data_end + closing.len();
    }
}

fn part_header<'h>(headers: &'h str, name: &str) -> Option<&'h str> {
    headers.split("\r\n").find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim().eq_ignore_ascii_case(name).then_some(v.trim())
    })
}

fn part_filename(headers: &str) -> Option<String> {
    let disposition = part_header(headers, "Content-Disposition")?;
    disposition
        .split(';')
        .skip(1)
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
}

fn skip_eol(body: &[u8], pos: usize) -> Option<usize> {
    let rest = body.get(pos..)?;
    if rest.starts_with(b"\r\n") {
        Some(pos + 2)
    } else if rest.starts_with(b"\n") {
        Some(pos + 1)
    } else {
        None
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_from_content_type() {
        assert_eq!(
            boundary("multipart/form-data; boundary=\"abc123\"").as_deref(),
            Some("abc123")
        );
        assert_eq!(boundary("multipart/form-data"), None);
        assert_eq!(boundary("text/plain; boundary=x"), None);
    }

    #[test]
    fn skips_parts_without_filename() {
        let body = b"--XX\r\n\
Content-Disposition: form-data; name=\"note\"\r\n\r\n\
hello\r\n\
--XX\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\
Content-Type: application/octet-stream\r\n\r\n\
\x00\x01\r\n\x02\r\n\
--XX--\r\n";

        let part = first_file_part(body, "XX").unwrap();
        assert_eq!(part.filename, "a.bin");
        assert_eq!(part.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(part.data, b"\x00\x01\r\n\x02");
    }

    #[test]
    fn no_file_part() {
        let body = b"--XX\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--XX--\r\n";
        assert!(first_file_part(body, "XX").is_none());
    }
}

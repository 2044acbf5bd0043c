use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::handlers::HandlerResult;
use crate::handlers::multipart;
use crate::http::request::Request;
use crate::http::response::{ResponseBuilder, StatusCode};

const WRITE_CHUNK: usize = 64 * 1024;
const MAX_FILENAME: usize = 255;
const MAX_SUFFIX: usize = 10_000;
const DEFAULT_NAME: &str = "upload";

/// Stores the request body in `dir`.
///
/// Multipart bodies store their first file part; anything else is stored
/// raw, named after the last path segment below `route_path`.
pub fn store(dir: &Path, route_path: &str, request: &Request) -> HandlerResult {
    let (name, data) = if multipart::is_multipart(request.content_type()) {
        let boundary = request
            .content_type()
            .and_then(multipart::boundary)
            .ok_or(StatusCode::BadRequest)?;
        let part =
            multipart::first_file_part(&request.body, &boundary).ok_or(StatusCode::BadRequest)?;
        (sanitize_filename(&part.filename), part.data)
    } else {
        let rest = request.path.strip_prefix(route_path).unwrap_or("");
        let name = rest
            .rsplit('/')
            .find(|s| !s.is_empty())
            .map(sanitize_filename)
            .unwrap_or_else(|| DEFAULT_NAME.to_string());
        (name, request.body.as_slice())
    };

    fs::create_dir_all(dir).map_err(|e| {
        error!(dir = %dir.display(), error = %e, "cannot create upload directory");
        StatusCode::InternalServerError
    })?;

    let (file, path) = create_unique(dir, &name).map_err(|e| {
        error!(dir = %dir.display(), error = %e, "cannot create upload file");
        StatusCode::InternalServerError
    })?;

    if let Err(e) = write_chunks(file, data) {
        error!(path = %path.display(), error = %e, "upload write failed");
        let _ = fs::remove_file(&path);
        return Err(StatusCode::InternalServerError);
    }

    let stored = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(name);
    info!(path = %path.display(), bytes = data.len(), "stored upload");

    let location = format!("{}/{}", route_path.trim_end_matches('/'), stored);
    Ok(ResponseBuilder::new(StatusCode::Created)
        .header("Location", location)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(format!("Stored {stored}\n"))
        .build())
}

/// Reduces a client-supplied name to a safe single path component.
///
/// ```
/// # use webserv::handlers::upload::sanitize_filename;
/// assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
/// assert_eq!(sanitize_filename("my report (1).pdf"), "my_report__1_.pdf");
/// assert_eq!(sanitize_filename(".."), "upload");
/// ```
pub fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let mut name = last.replace('\0', "");
    while name.contains("..") {
        name = name.replace("..", "");
    }

    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut name = name.trim_start_matches('.').to_string();
    name.truncate(MAX_FILENAME);

    if name.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        name
    }
}

/// Opens `name` in `dir` for writing without ever touching an existing
/// file; collisions get `_1`, `_2`, ... before the extension.
pub fn create_unique(dir: &Path, name: &str) -> io::Result<(File, PathBuf)> {
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };

    for n in 0..MAX_SUFFIX {
        let candidate = if n == 0 {
            dir.join(name)
        } else {
            dir.join(format!("{stem}_{n}{ext}"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {name}"),
    ))
}

fn write_chunks(mut file: File, data: &[u8]) -> io::Result<()> {
    for chunk in data.chunks(WRITE_CHUNK) {
        file.write_all(chunk)?;
    }
    file.flush()
}

use std::fs;
use std::io;
use std::path::Path;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tracing::warn;

use crate::handlers::HandlerResult;
use crate::http::mime;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Characters escaped in listing links.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub fn serve_file(path: &Path) -> HandlerResult {
    let body = fs::read(path).map_err(|e| io_status(&e, path))?;
    Ok(ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", mime::from_path(path))
        .body(body)
        .build())
}

/// Serves a directory: slash redirect, then index file, then listing, else 403.
pub fn serve_directory(
    dir: &Path,
    request_path: &str,
    index: &str,
    autoindex: bool,
) -> HandlerResult {
    if !request_path.ends_with('/') {
        return Ok(Response::redirect(
            StatusCode::MovedPermanently,
            &format!("{request_path}/"),
        ));
    }

    let index_path = dir.join(index);
    if !index.is_empty() && index_path.is_file() {
        return serve_file(&index_path);
    }
    if !autoindex {
        return Err(StatusCode::Forbidden);
    }

    let html = directory_listing(dir, request_path).map_err(|e| io_status(&e, dir))?;
    Ok(ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html)
        .build())
}

/// Serves whatever `path` names, file or directory.
pub fn serve(path: &Path, request_path: &str, index: &str, autoindex: bool) -> HandlerResult {
    let meta = fs::metadata(path).map_err(|e| io_status(&e, path))?;
    if meta.is_dir() {
        serve_directory(path, request_path, index, autoindex)
    } else {
        serve_file(path)
    }
}

pub fn directory_listing(dir: &Path, request_path: &str) -> io::Result<String> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            name
        })
        .collect::<Vec<_>>();
    entries.sort();

    let title = html_escape(request_path);
    let mut html = format!(
        "<!DOCTYPE html>\n<html><head><title>Index of {title}</title></head>\n<body><h1>Index of {title}</h1><hr><ul>\n"
    );
    if request_path != "/" {
        html.push_str("<li><a href=\"../\">../</a></li>\n");
    }
    for name in &entries {
        let href = utf8_percent_encode(name, SEGMENT);
        html.push_str(&format!(
            "<li><a href=\"{href}\">{}</a></li>\n",
            html_escape(name)
        ));
    }
    html.push_str("</ul><hr></body></html>\n");
    Ok(html)
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) fn io_status(err: &io::Error, path: &Path) -> StatusCode {
    match err.kind() {
        io::ErrorKind::NotFound => StatusCode::NotFound,
        io::ErrorKind::PermissionDenied => StatusCode::Forbidden,
        _ => {
            warn!(path = %path.display(), error = %err, "filesystem error");
            StatusCode::InternalServerError
        }
    }
}

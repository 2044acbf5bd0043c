//! Request handlers the router dispatches to.
//!
//! Handlers return `Err(status)` for failures; the router turns that into
//! the server's error page.

use std::path::{Path, PathBuf};

use crate::http::response::{Response, StatusCode};

pub mod delete;
pub mod error_page;
pub mod multipart;
pub mod static_files;
pub mod upload;

pub type HandlerResult = Result<Response, StatusCode>;

/// Joins a decoded request path onto `root`.
///
/// `..` segments, NUL bytes and backslashes are refused with 403 so a
/// request can never name a file outside `root`.
pub fn resolve_path(root: &Path, path: &str) -> Result<PathBuf, StatusCode> {
    let mut resolved = root.to_path_buf();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StatusCode::Forbidden),
            s if s.contains('\0') || s.contains('\\') => return Err(StatusCode::Forbidden),
            s => resolved.push(s),
        }
    }
    Ok(resolved)
}

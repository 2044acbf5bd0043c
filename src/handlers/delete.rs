use std::fs;
use std::path::Path;

use tracing::info;

use crate::handlers::HandlerResult;
use crate::handlers::static_files::io_status;
use crate::http::response::{ResponseBuilder, StatusCode};

/// Removes one regular file. Missing files are 404, directories 403.
pub fn remove(path: &Path) -> HandlerResult {
    let meta = fs::symlink_metadata(path).map_err(|e| io_status(&e, path))?;
    if meta.is_dir() {
        return Err(StatusCode::Forbidden);
    }

    fs::remove_file(path).map_err(|e| io_status(&e, path))?;
    info!(path = %path.display(), "deleted");
    Ok(ResponseBuilder::new(StatusCode::NoContent).build())
}

use tracing::debug;

use crate::config::ServerConfig;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Error response using the server's configured page when it can be read,
/// otherwise a small built-in page.
pub fn render(server: &ServerConfig, status: StatusCode) -> Response {
    let custom = server.error_page(status.as_u16()).and_then(|path| {
        std::fs::read(path)
            .inspect_err(|e| debug!(path = %path.display(), error = %e, "error page unreadable"))
            .ok()
    });

    let body = custom.unwrap_or_else(|| builtin(status).into_bytes());
    ResponseBuilder::new(status)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(body)
        .build()
}

fn builtin(status: StatusCode) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><title>{status}</title></head>\n<body><h1>{status}</h1></body></html>\n"
    )
}

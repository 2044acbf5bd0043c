//! Request routing.
//!
//! [`resolve`] is a pure decision over the request and the immutable
//! server table; [`Router`] carries out the chosen [`Action`].

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::debug;

use crate::cgi::{CgiExecutor, CgiRequest};
use crate::config::{Config, RouteConfig, ServerConfig};
use crate::handlers::{self, HandlerResult, delete, error_page, static_files, upload};
use crate::http::connection::Handler;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};

/// What to do with a request. Evaluated in order, first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<'a> {
    /// Body over the route limit, or the parser already failed.
    Reject(StatusCode),
    Options { allow: String },
    Redirect { status: StatusCode, location: &'a str },
    MethodNotAllowed { allow: String },
    Cgi { script_name: &'a str, path_info: &'a str },
    Upload,
    Delete,
    Index,
    Static(PathBuf),
    NotFound,
}

/// Picks the action for `request` on `server`.
pub fn resolve<'a>(server: &'a ServerConfig, request: &'a Request) -> Action<'a> {
    let route = server.route_for(&request.path);

    if request.payload_len() > server.max_body_for(route) {
        return Action::Reject(StatusCode::PayloadTooLarge);
    }
    if let Some(status) = request.error {
        return Action::Reject(status);
    }
    if request.method == Method::OPTIONS {
        return Action::Options { allow: route.allow_header() };
    }
    if let Some(redirect) = &route.redirect {
        let status = StatusCode::from_u16(redirect.code).unwrap_or(StatusCode::MovedPermanently);
        return Action::Redirect { status, location: &redirect.to };
    }
    if !route.allows(request.method) {
        return Action::MethodNotAllowed { allow: route.allow_header() };
    }
    if let Some((script_name, path_info)) = route.cgi_split(&request.path) {
        return Action::Cgi { script_name, path_info };
    }
    match request.method {
        Method::POST | Method::PUT => return Action::Upload,
        Method::DELETE => return Action::Delete,
        _ => {}
    }
    if request.path == "/" {
        return Action::Index;
    }

    let root = server.root_for(route);
    match handlers::resolve_path(root, &request.path) {
        Ok(path) if path.exists() => Action::Static(path),
        Ok(_) => Action::NotFound,
        Err(status) => Action::Reject(status),
    }
}

/// Dispatches resolved actions to their handlers.
pub struct Router {
    cgi: CgiExecutor,
}

impl Router {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            cgi: CgiExecutor::new(config)?,
        })
    }

    pub fn with_cgi(cgi: CgiExecutor) -> Self {
        Self { cgi }
    }

    pub fn route(&self, server: &ServerConfig, request: &Request, peer: SocketAddr) -> Response {
        let action = resolve(server, request);
        debug!(path = %request.path, ?action, "routed");

        let route = server.route_for(&request.path);
        let result = match action {
            Action::Reject(status) => Err(status),
            Action::Options { allow } => Ok(Response::options(&allow)),
            Action::Redirect { status, location } => Ok(Response::redirect(status, location)),
            Action::MethodNotAllowed { allow } => {
                let mut resp = error_page::render(server, StatusCode::MethodNotAllowed);
                resp.headers.insert("Allow", allow);
                Ok(resp)
            }
            Action::Cgi { script_name, path_info } => {
                self.run_cgi(server, route, request, peer, script_name, path_info)
            }
            Action::Upload => self.upload(server, route, request),
            Action::Delete => handlers::resolve_path(server.root_for(route), &request.path)
                .and_then(|path| delete::remove(&path)),
            Action::Index => {
                let root = server.root_for(route);
                let index = server.index_for(route);
                if root.join(index).is_file() {
                    static_files::serve_file(&root.join(index))
                } else if server.autoindex_for(route) {
                    static_files::serve_directory(root, "/", "", true)
                } else {
                    Err(StatusCode::NotFound)
                }
            }
            Action::Static(path) => static_files::serve(
                &path,
                &request.path,
                server.index_for(route),
                server.autoindex_for(route),
            ),
            Action::NotFound => Err(StatusCode::NotFound),
        };

        result.unwrap_or_else(|status| error_page::render(server, status))
    }

    fn run_cgi(
        &self,
        server: &ServerConfig,
        route: &RouteConfig,
        request: &Request,
        peer: SocketAddr,
        script_name: &str,
        path_info: &str,
    ) -> HandlerResult {
        let document_root = server.root_for(route);
        let script = handlers::resolve_path(document_root, script_name)?;
        self.cgi.execute(&CgiRequest {
            script,
            script_name,
            path_info,
            document_root,
            server,
            request,
            peer,
        })
    }

    fn upload(&self, server: &ServerConfig, route: &RouteConfig, request: &Request) -> HandlerResult {
        let dir = match server.upload_dir_for(route) {
            Some(dir) => dir.to_path_buf(),
            None => handlers::resolve_path(server.root_for(route), &route.path)?,
        };
        upload::store(&dir, &route.path, request)
    }
}

impl Handler for Router {
    fn handle(&self, server: &ServerConfig, request: &Request, peer: SocketAddr) -> Response {
        self.route(server, request, peer)
    }
}

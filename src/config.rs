use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::http::parser::ParserLimits;
use crate::http::request::Method;

/// Immutable server table, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub cgi: CgiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server_name: String,
    pub listen: Vec<String>,
    pub root: PathBuf,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default)]
    pub autoindex: bool,
    #[serde(default = "default_max_body")]
    pub client_max_body_size: usize,
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    #[serde(default)]
    pub error_pages: HashMap<u16, PathBuf>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(skip)]
    fallback: RouteConfig,
    #[serde(skip)]
    addrs: Vec<SocketAddr>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub autoindex: Option<bool>,
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    #[serde(default)]
    pub cgi_extensions: Vec<String>,
    #[serde(default)]
    pub redirect: Option<Redirect>,
    #[serde(default)]
    pub client_max_body_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Redirect {
    pub to: String,
    #[serde(default = "default_redirect_code")]
    pub code: u16,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_uri_length: usize,
    pub max_header_block: usize,
    pub max_header_field: usize,
    pub max_connections: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_uri_length: 4096,
            max_header_block: 8192,
            max_header_field: 4096,
            max_connections: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub idle_secs: u64,
    pub cgi_secs: u64,
    pub max_connection_age_secs: u64,
    pub max_requests_per_connection: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            idle_secs: 60,
            cgi_secs: 30,
            max_connection_age_secs: 300,
            max_requests_per_connection: 100,
            shutdown_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CgiConfig {
    /// Extension (".py") to interpreter path; consulted before the built-in table.
    #[serde(default)]
    pub interpreters: HashMap<String, PathBuf>,
}

fn default_index() -> String {
    "index.html".to_string()
}

fn default_max_body() -> usize {
    1024 * 1024
}

fn default_methods() -> Vec<Method> {
    vec![Method::GET]
}

fn default_redirect_code() -> u16 {
    301
}

impl Config {
    /// Reads and validates a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let mut config: Config = serde_yaml::from_str(text).context("parsing YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> anyhow::Result<()> {
        if self.servers.is_empty() {
            bail!("at least one server must be configured");
        }
        for (i, server) in self.servers.iter_mut().enumerate() {
            server
                .prepare()
                .with_context(|| format!("server #{i} ({:?})", server.server_name))?;
        }
        Ok(())
    }

    /// Parser ceilings for a listener whose largest body limit is `max_body`.
    pub fn parser_limits(&self, max_body: usize) -> ParserLimits {
        ParserLimits {
            max_uri_length: self.limits.max_uri_length,
            max_header_block: self.limits.max_header_block,
            max_header_field: self.limits.max_header_field,
            max_body,
        }
    }
}

impl ServerConfig {
    fn prepare(&mut self) -> anyhow::Result<()> {
        if self.listen.is_empty() {
            bail!("no listen address");
        }
        self.addrs = self
            .listen
            .iter()
            .map(|l| parse_listen(l))
            .collect::<anyhow::Result<_>>()?;

        let mut seen = HashSet::new();
        for route in &mut self.routes {
            if !route.path.starts_with('/') {
                bail!("route path {:?} must start with '/'", route.path);
            }
            if route.path.len() > 1 {
                let trimmed = route.path.trim_end_matches('/');
                route.path = if trimmed.is_empty() { "/".into() } else { trimmed.into() };
            }
            if !seen.insert(route.path.clone()) {
                bail!("duplicate route {:?}", route.path);
            }
            if route.methods.is_empty() {
                bail!("route {:?} allows no methods", route.path);
            }
            if let Some(redirect) = &route.redirect {
                if !(300..400).contains(&redirect.code) {
                    bail!("route {:?}: redirect code {} is not 3xx", route.path, redirect.code);
                }
            }
            for ext in &mut route.cgi_extensions {
                if !ext.starts_with('.') {
                    ext.insert(0, '.');
                }
            }
        }

        self.fallback = RouteConfig {
            path: "/".into(),
            methods: default_methods(),
            ..RouteConfig::default()
        };
        Ok(())
    }

    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Longest literal prefix match, walking from the full path toward `/`.
    pub fn find_route(&self, path: &str) -> Option<&RouteConfig> {
        let mut candidate = path;
        loop {
            if let Some(route) = self.routes.iter().find(|r| r.path == candidate) {
                return Some(route);
            }
            if candidate == "/" || candidate.is_empty() {
                return None;
            }
            candidate = match candidate.rfind('/') {
                Some(0) | None => "/",
                Some(i) => &candidate[..i],
            };
        }
    }

    /// Matching route, or the GET-only `/` fallback.
    pub fn route_for(&self, path: &str) -> &RouteConfig {
        self.find_route(path).unwrap_or(&self.fallback)
    }

    pub fn root_for<'a>(&'a self, route: &'a RouteConfig) -> &'a Path {
        route.root.as_deref().unwrap_or(&self.root)
    }

    pub fn index_for<'a>(&'a self, route: &'a RouteConfig) -> &'a str {
        route.index.as_deref().unwrap_or(&self.index)
    }

    pub fn autoindex_for(&self, route: &RouteConfig) -> bool {
        route.autoindex.unwrap_or(self.autoindex)
    }

    pub fn upload_dir_for<'a>(&'a self, route: &'a RouteConfig) -> Option<&'a Path> {
        route.upload_dir.as_deref().or(self.upload_dir.as_deref())
    }

    pub fn max_body_for(&self, route: &RouteConfig) -> usize {
        route.client_max_body_size.unwrap_or(self.client_max_body_size)
    }

    /// Largest body any route of this server accepts.
    pub fn max_body_ceiling(&self) -> usize {
        self.routes
            .iter()
            .filter_map(|r| r.client_max_body_size)
            .fold(self.client_max_body_size, usize::max)
    }

    pub fn error_page(&self, code: u16) -> Option<&Path> {
        self.error_pages.get(&code).map(PathBuf::as_path)
    }
}

impl RouteConfig {
    /// HEAD rides along with GET.
    pub fn allows(&self, method: Method) -> bool {
        self.methods.contains(&method)
            || (method == Method::HEAD && self.methods.contains(&Method::GET))
    }

    /// Value for an `Allow` header: the configured methods, in order.
    pub fn allow_header(&self) -> String {
        self.methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Splits `path` at the first segment ending in a CGI extension into the
    /// script part and the trailing PATH_INFO.
    pub fn cgi_split<'p>(&self, path: &'p str) -> Option<(&'p str, &'p str)> {
        if self.cgi_extensions.is_empty() {
            return None;
        }
        let mut end = 0;
        for segment in path.split('/') {
            end += segment.len();
            if !segment.is_empty() && self.cgi_extensions.iter().any(|ext| segment.ends_with(ext.as_str())) {
                return Some((&path[..end], &path[end..]));
            }
            end += 1;
        }
        None
    }
}

fn parse_listen(listen: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(port) = listen.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    listen
        .to_socket_addrs()
        .with_context(|| format!("invalid listen address {listen:?}"))?
        .next()
        .with_context(|| format!("listen address {listen:?} resolved to nothing"))
}

/// Servers sharing one listening socket. The first is the default; others
/// are chosen by matching the request's `Host` against `server_name`.
#[derive(Debug, Clone)]
pub struct VirtualHosts<'cfg> {
    default: &'cfg ServerConfig,
    others: Arc<[&'cfg ServerConfig]>,
}

impl<'cfg> VirtualHosts<'cfg> {
    pub fn new(default: &'cfg ServerConfig, others: Vec<&'cfg ServerConfig>) -> Self {
        Self {
            default,
            others: others.into(),
        }
    }

    pub fn select(&self, host: Option<&str>) -> &'cfg ServerConfig {
        host.and_then(|host| {
            self.others
                .iter()
                .copied()
                .find(|s| !s.server_name.is_empty() && s.server_name.eq_ignore_ascii_case(host))
        })
        .unwrap_or(self.default)
    }

    /// Body ceiling the parser enforces on this listener.
    pub fn max_body_size(&self) -> usize {
        self.others
            .iter()
            .map(|s| s.max_body_ceiling())
            .fold(self.default.max_body_ceiling(), usize::max)
    }
}

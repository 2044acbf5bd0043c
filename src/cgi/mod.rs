//! CGI/1.1 script execution.
//!
//! Each invocation runs Spawn → WriteStdin → ReadStdout (bounded by a wall
//! clock) → Reap → Translate. The child is owned by a [`CgiProcess`] that
//! always waits on it before returning, on the timeout path included, and
//! kills it if it is dropped early.
//!
//! The event loop blocks on the child for the duration of the call. A
//! current-thread tokio runtime drives the pipes so stdin and stdout are
//! serviced concurrently and a large request body cannot deadlock against
//! a script that writes before it reads.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

use crate::config::{Config, ServerConfig};
use crate::handlers::HandlerResult;
use crate::http::request::Request;
use crate::http::response::StatusCode;

pub mod env;
pub mod interpreter;
pub mod output;

pub use interpreter::InterpreterTable;

/// Script output beyond this is discarded.
const MAX_OUTPUT: u64 = 16 * 1024 * 1024;
/// How long a child that closed stdout may take to exit before it is killed.
const REAP_GRACE: Duration = Duration::from_secs(1);

/// Everything one script invocation needs.
#[derive(Debug)]
pub struct CgiRequest<'a> {
    /// Filesystem path of the script.
    pub script: PathBuf,
    /// URL path of the script (`SCRIPT_NAME`).
    pub script_name: &'a str,
    /// Path below the script (`PATH_INFO`).
    pub path_info: &'a str,
    pub document_root: &'a Path,
    pub server: &'a ServerConfig,
    pub request: &'a Request,
    pub peer: SocketAddr,
}

pub struct CgiExecutor {
    runtime: Runtime,
    interpreters: InterpreterTable,
    timeout: Duration,
}

impl CgiExecutor {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("building CGI runtime")?;
        Ok(Self {
            runtime,
            interpreters: InterpreterTable::new(&config.cgi.interpreters),
            timeout: Duration::from_secs(config.timeouts.cgi_secs),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the script and translates its output.
    ///
    /// Missing script: 404. No interpreter for the extension: 501.
    /// Spawn failure, I/O failure, timeout or empty output: 500.
    pub fn execute(&self, job: &CgiRequest<'_>) -> HandlerResult {
        let script = std::fs::canonicalize(&job.script).map_err(|_| StatusCode::NotFound)?;
        if !script.is_file() {
            return Err(StatusCode::NotFound);
        }

        let ext = script
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let interpreter = self.interpreters.resolve(&ext).ok_or_else(|| {
            warn!(script = %script.display(), "no interpreter for CGI extension");
            StatusCode::NotImplemented
        })?;

        let job = CgiRequest {
            script,
            script_name: job.script_name,
            path_info: job.path_info,
            document_root: job.document_root,
            server: job.server,
            request: job.request,
            peer: job.peer,
        };
        let vars = env::build(&job);

        let result: anyhow::Result<Vec<u8>> = self.runtime.block_on(async {
            let mut process = CgiProcess::spawn(&interpreter, &job.script, vars)?;
            let output = process.exchange(&job.request.body, self.timeout).await;
            process.reap(output.is_err()).await;
            output
        });

        match result {
            Ok(out) if out.is_empty() => {
                warn!(script = %job.script.display(), "CGI produced no output");
                Err(StatusCode::InternalServerError)
            }
            Ok(out) => Ok(output::translate(&out)),
            Err(e) => {
                warn!(script = %job.script.display(), error = %e, "CGI failed");
                Err(StatusCode::InternalServerError)
            }
        }
    }
}

/// A running script. Dropping it kills the child; [`CgiProcess::reap`]
/// waits for it.
struct CgiProcess {
    child: Child,
}

impl CgiProcess {
    fn spawn(interpreter: &Path, script: &Path, vars: Vec<(String, String)>) -> anyhow::Result<Self> {
        let dir = script.parent().unwrap_or_else(|| Path::new("/"));
        let child = Command::new(interpreter)
            .arg(script)
            .env_clear()
            .envs(vars)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", interpreter.display()))?;
        debug!(pid = child.id(), script = %script.display(), "CGI spawned");
        Ok(Self { child })
    }

    /// Feeds the body to stdin, closes it, and collects stdout, all within
    /// `limit`.
    async fn exchange(&mut self, body: &[u8], limit: Duration) -> anyhow::Result<Vec<u8>> {
        let stdin = self.child.stdin.take();
        let stdout = self.child.stdout.take().context("stdout not piped")?;

        let feed = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(body).await {
                    Ok(()) => {}
                    // The script may exit without reading its input.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                }
            }
            Ok::<(), std::io::Error>(())
        };
        let collect = async move {
            let mut out = Vec::new();
            stdout.take(MAX_OUTPUT).read_to_end(&mut out).await?;
            Ok::<Vec<u8>, std::io::Error>(out)
        };

        match tokio::time::timeout(limit, async { tokio::join!(feed, collect) }).await {
            Ok((fed, out)) => {
                fed.context("writing CGI stdin")?;
                out.context("reading CGI stdout")
            }
            Err(_) => Err(anyhow!("timed out after {}s", limit.as_secs())),
        }
    }

    /// Waits for the child, killing it first when `kill` is set or when it
    /// lingers after closing stdout.
    async fn reap(&mut self, kill: bool) {
        if kill {
            let _ = self.child.start_kill();
        } else if tokio::time::timeout(REAP_GRACE, self.child.wait()).await.is_ok() {
            return;
        } else {
            let _ = self.child.start_kill();
        }

        match self.child.wait().await {
            Ok(status) => debug!(%status, "CGI reaped"),
            Err(e) => warn!(error = %e, "waiting for CGI child failed"),
        }
    }
}

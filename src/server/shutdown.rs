use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use mio::Waker;
use tracing::{error, info, warn};

/// Cancellation flag polled by the event loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancels the token and wakes the poll so the loop notices at once.
#[derive(Clone)]
pub struct ShutdownHandle {
    token: ShutdownToken,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn new(token: ShutdownToken, waker: Arc<Waker>) -> Self {
        Self { token, waker }
    }

    pub fn shutdown(&self) {
        self.token.cancel();
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake event loop");
        }
    }
}

/// Watches for SIGINT/SIGTERM on a dedicated thread and triggers `handle`.
pub fn spawn_signal_listener(handle: ShutdownHandle) -> anyhow::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "cannot start signal runtime");
                    return;
                }
            };

            runtime.block_on(async {
                #[cfg(unix)]
                {
                    use tokio::signal::unix::{SignalKind, signal};
                    let mut term = match signal(SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(e) => {
                            error!(error = %e, "cannot install SIGTERM handler");
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                        _ = term.recv() => info!("SIGTERM received"),
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown signal received");
                }
            });

            handle.shutdown();
        })
        .context("spawning signal thread")
}

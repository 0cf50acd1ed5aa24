//! Tokio runtime wrapper shared by the `serp` binary and integration tests.
//!
//! The runtime owns one [`CancellationToken`]; every batch receives a clone
//! and stops issuing new requests once it fires (Ctrl-C or shutdown).
use anyhow::Result;
use serp_common::Status;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct SerpHandle {
    inner: Handle,
    cancel: CancellationToken,
}

pub struct SerpRuntime {
    runtime: Runtime,
    cancel: CancellationToken,
}

impl SerpRuntime {
    /// Build a multi-threaded Tokio runtime.
    ///
    /// ```
    /// use serp_runtime::SerpRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = SerpRuntime::build("doctest-runtime", Some(1))
    ///     .expect("runtime builds");
    /// let value = runtime.block_on(async { 2 + 2 });
    /// assert_eq!(value, 4);
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn build(thread_name: &str, worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name(thread_name);

        if let Some(workers) = worker_threads {
            builder.worker_threads(workers.max(1));
        }

        let runtime = builder.build()?;
        Ok(Self {
            runtime,
            cancel: CancellationToken::new(),
        })
    }

    /// Obtain a cloned handle for spawning tasks and sharing cancellation.
    pub fn handle(&self) -> SerpHandle {
        SerpHandle {
            inner: self.runtime.handle().clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Cancel outstanding work and shut the runtime down gracefully.
    pub fn shutdown(self, graceful: std::time::Duration) {
        self.cancel.cancel();
        self.runtime.shutdown_timeout(graceful);
    }
}

impl SerpHandle {
    /// Clone the shared cancellation token.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the shared token on the first Ctrl-C.
    ///
    /// The listener exits quietly if the token is cancelled first.
    pub fn cancel_on_ctrl_c(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        self.inner.spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(err) = res {
                        tracing::warn!(action = "ctrl_c", status = %Status::Fail, error = %err, "signal listener failed");
                        return;
                    }
                    tracing::warn!(action = "ctrl_c", status = %Status::Warning, "interrupt received, stopping after in-flight requests");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        })
    }
}

//! Serialized dispatch point for multi-threaded hosts
//!
//! The Bridge is single-threaded. A [`Dispatcher`] owns one on a dedicated
//! thread running a current-thread runtime and a `LocalSet`; other threads
//! send it jobs through a cloneable [`DispatcherHandle`]. Jobs run one at a
//! time, in submission order.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use eyre::{Context, Result, eyre};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};

type Job = Box<dyn FnOnce(&Bridge) + Send>;
type AsyncJob = Box<dyn FnOnce(&Bridge) -> LocalBoxFuture<'static, ()> + Send>;

/// Requests handled by the dispatch thread
enum DispatchRequest {
    /// Run to completion before the next request
    Run(Job),

    /// Start a future on the local task set and move on
    Spawn(AsyncJob),

    Shutdown,
}

/// Owner of the dispatch thread
pub struct Dispatcher {
    handle: DispatcherHandle,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the dispatch thread with a fresh Bridge built from `config`
    pub fn spawn(config: BridgeConfig) -> Result<Self> {
        debug!("Dispatcher::spawn: called");
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name("bridge-dispatch".to_string())
            .spawn(move || run(config, rx))
            .context("Failed to spawn dispatch thread")?;

        Ok(Self {
            handle: DispatcherHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Ask the thread to stop after queued jobs and wait for it
    pub fn join(mut self) -> Result<()> {
        debug!("Dispatcher::join: called");
        let _ = self.handle.shutdown();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| eyre!("Dispatch thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.handle.shutdown();
        }
    }
}

fn run(config: BridgeConfig, mut rx: mpsc::UnboundedReceiver<DispatchRequest>) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build dispatch runtime");
            return;
        }
    };
    let local = LocalSet::new();

    local.block_on(&runtime, async move {
        let bridge = Bridge::new(config);
        info!("Dispatcher started");

        while let Some(request) = rx.recv().await {
            match request {
                DispatchRequest::Run(job) => {
                    if panic::catch_unwind(AssertUnwindSafe(|| job(&bridge))).is_err() {
                        warn!("Dispatched job panicked");
                    }
                }
                DispatchRequest::Spawn(job) => {
                    let future = job(&bridge);
                    tokio::task::spawn_local(future);
                }
                DispatchRequest::Shutdown => {
                    debug!("Dispatcher: shutdown requested");
                    break;
                }
            }
        }

        info!("Dispatcher stopped");
    });
}

/// Cloneable, `Send` handle for submitting work to the dispatch thread
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<DispatchRequest>,
}

impl DispatcherHandle {
    /// Queue `job` without waiting for it
    pub fn submit(&self, job: impl FnOnce(&Bridge) + Send + 'static) -> BridgeResult<()> {
        self.tx
            .send(DispatchRequest::Run(Box::new(job)))
            .map_err(|_| BridgeError::DispatcherClosed)
    }

    /// Run `job` on the dispatch thread and await its result
    pub async fn call<R, F>(&self, job: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Bridge) -> R + Send + 'static,
    {
        let rx = self.send_call(job)?;
        rx.await.map_err(|_| cancelled())
    }

    /// Like [`call`](Self::call), for threads outside any async runtime
    ///
    /// Panics if called from within an async context.
    pub fn call_blocking<R, F>(&self, job: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Bridge) -> R + Send + 'static,
    {
        let rx = self.send_call(job)?;
        rx.blocking_recv().map_err(|_| cancelled())
    }

    /// Start the future `job` builds on the dispatch thread and await its output
    ///
    /// For suspending operations such as `use_service` and `wait_for`. Other
    /// jobs keep running while the future is pending.
    pub async fn call_async<R, F>(&self, job: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Bridge) -> LocalBoxFuture<'static, R> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: AsyncJob = Box::new(move |bridge: &Bridge| -> LocalBoxFuture<'static, ()> {
            let future = job(bridge);
            async move {
                let _ = tx.send(future.await);
            }
            .boxed_local()
        });
        self.tx
            .send(DispatchRequest::Spawn(job))
            .map_err(|_| BridgeError::DispatcherClosed)?;
        rx.await.map_err(|_| cancelled())
    }

    /// Stop the dispatch thread after the jobs already queued
    pub fn shutdown(&self) -> BridgeResult<()> {
        debug!("DispatcherHandle::shutdown: called");
        self.tx
            .send(DispatchRequest::Shutdown)
            .map_err(|_| BridgeError::DispatcherClosed)
    }

    /// Whether the dispatch thread has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send_call<R, F>(&self, job: F) -> BridgeResult<oneshot::Receiver<R>>
    where
        R: Send + 'static,
        F: FnOnce(&Bridge) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move |bridge| {
            let _ = tx.send(job(bridge));
        })?;
        Ok(rx)
    }
}

fn cancelled() -> BridgeError {
    BridgeError::Cancelled {
        what: "a dispatched job".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn test_call_blocking_from_many_threads() {
        let dispatcher = Dispatcher::spawn(BridgeConfig::default()).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let handle = dispatcher.handle();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        handle
                            .call_blocking(|bridge| {
                                bridge
                                    .update("counter", |v| json!(v.and_then(|v| v.as_u64()).unwrap_or(0) + 1))
                                    .unwrap();
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let total = dispatcher
            .handle()
            .call_blocking(|bridge| bridge.get("counter").unwrap())
            .unwrap();
        assert_eq!(total, Some(json!(100)));
        dispatcher.join().unwrap();
    }

    #[tokio::test]
    async fn test_call_async_waits_for_later_provide() {
        let dispatcher = Dispatcher::spawn(BridgeConfig::default()).unwrap();
        let handle = dispatcher.handle();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .call_async(|bridge| {
                        let pending = bridge.use_service::<String>("audio", Some(Duration::from_secs(2)));
                        async move { pending.await.map(|s| s.as_str().to_string()) }.boxed_local()
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle
            .submit(|bridge| {
                bridge.provide("audio", Rc::new("mixer".to_string()));
            })
            .unwrap();

        let name = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(name, "mixer");
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_dispatcher() {
        let dispatcher = Dispatcher::spawn(BridgeConfig::default()).unwrap();
        let handle = dispatcher.handle();

        let err = handle.call(|_| -> u8 { panic!("bad job") }).await.unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled { .. }));

        let value = handle.call(|bridge| bridge.has_service("none")).await.unwrap();
        assert!(!value);
    }

    #[test]
    fn test_closed_after_join() {
        let dispatcher = Dispatcher::spawn(BridgeConfig::default()).unwrap();
        let handle = dispatcher.handle();
        dispatcher.join().unwrap();
        assert!(handle.is_closed());
        assert!(matches!(handle.submit(|_| {}), Err(BridgeError::DispatcherClosed)));
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Routing units of work to their backend.
//!
//! [`Dispatcher::dispatch`] takes a [`Policy`], a future producing the
//! operands (typically pipeline access futures joined together) and the
//! operation. It returns a [`Completion`] right away; the spawned task waits
//! for the operands, runs the operation on the compute pool (`Mc`) or on a
//! device stream (`Gpu`), and resolves the completion with its result.
//!
//! Operations dispatched through the same [`Chain`] share one stream and
//! therefore execute in the order they were dispatched.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

#[cfg(feature = "cuda")]
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::compute::ComputePool;
use crate::config::TuneParameters;
use crate::policy::{Backend, Policy, Priority};
use crate::runtime::Runtime;
use crate::stream::Stream;
use crate::{Device, Error, Result};

/// What an operation sees while it runs.
pub struct ExecutionContext {
    runtime: Runtime,
    policy: Policy,
    stream: Option<Stream>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("policy", &self.policy)
            .field("stream", &self.stream)
            .finish()
    }
}

impl ExecutionContext {
    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn tune(&self) -> &TuneParameters {
        self.runtime.tune()
    }

    /// The compute pool matching the policy's priority.
    pub fn compute(&self) -> &ComputePool {
        match self.policy.priority() {
            Priority::Normal => self.runtime.compute(),
            Priority::High => self.runtime.high_priority_compute(),
        }
    }

    /// The stream of the chain; `None` on the `Mc` backend.
    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    #[cfg(feature = "cuda")]
    pub fn cuda_stream(&self) -> Option<&Arc<cudarc::driver::CudaStream>> {
        self.stream.as_ref().map(Stream::cuda)
    }
}

/// Schedules operations according to their [`Policy`].
#[derive(Clone, Debug)]
pub struct Dispatcher {
    runtime: Runtime,
}

impl Dispatcher {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// A dependency chain bound to `policy`. On the `Gpu` backend the chain
    /// owns the next stream of the device's pool.
    pub fn chain(&self, policy: Policy) -> Result<Chain> {
        let stream = match (policy.backend(), policy.device()) {
            (Backend::Gpu, Device::Gpu(id)) => {
                Some(self.runtime.streams().next(id, policy.priority())?)
            }
            _ => None,
        };
        Ok(Chain {
            runtime: self.runtime.clone(),
            policy,
            stream,
        })
    }

    /// Run `op` on the backend of `policy` once `operands` resolves.
    pub fn dispatch<T, R, Fut, F>(&self, policy: Policy, operands: Fut, op: F) -> Completion<R>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(T, &ExecutionContext) -> Result<R> + Send + 'static,
    {
        self.try_dispatch(policy, operands.map(Ok), op)
    }

    /// Like [`Dispatcher::dispatch`]; an upstream failure fails the
    /// completion without running `op`.
    pub fn try_dispatch<T, R, Fut, F>(&self, policy: Policy, operands: Fut, op: F) -> Completion<R>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(T, &ExecutionContext) -> Result<R> + Send + 'static,
    {
        match self.chain(policy) {
            Ok(chain) => chain.try_dispatch(operands, op),
            Err(error) => self.unavailable(policy, error),
        }
    }

    /// Run an asynchronous body on the chain of `policy`.
    ///
    /// For work that completes outside the compute pool and the streams,
    /// such as transport requests.
    pub fn spawn<R, Fut>(&self, policy: Policy, body: Fut) -> Completion<R>
    where
        R: Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        match self.chain(policy) {
            Ok(chain) => chain.spawn(body),
            Err(error) => self.unavailable(policy, error),
        }
    }

    fn unavailable<R: Send + 'static>(&self, policy: Policy, error: Error) -> Completion<R> {
        tracing::warn!(%policy, %error, "no execution context for policy");
        let chain = Chain {
            runtime: self.runtime.clone(),
            policy,
            stream: None,
        };
        Completion::failed(chain, error)
    }
}

/// A sequence of operations sharing one execution context.
#[derive(Clone, Debug)]
pub struct Chain {
    runtime: Runtime,
    policy: Policy,
    stream: Option<Stream>,
}

impl Chain {
    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    pub fn dispatch<T, R, Fut, F>(&self, operands: Fut, op: F) -> Completion<R>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(T, &ExecutionContext) -> Result<R> + Send + 'static,
    {
        self.try_dispatch(operands.map(Ok), op)
    }

    pub fn try_dispatch<T, R, Fut, F>(&self, operands: Fut, op: F) -> Completion<R>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(T, &ExecutionContext) -> Result<R> + Send + 'static,
    {
        let chain = self.clone();
        self.spawn(async move {
            let operands = operands.await?;
            chain.execute(operands, op).await
        })
    }

    /// Run `body` as part of this chain. The body is spawned immediately.
    pub fn spawn<R, Fut>(&self, body: Fut) -> Completion<R>
    where
        R: Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Completion {
            handle: self.runtime.handle().spawn(body),
            chain: self.clone(),
        }
    }

    async fn execute<T, R, F>(self, operands: T, op: F) -> Result<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(T, &ExecutionContext) -> Result<R> + Send + 'static,
    {
        let ctx = ExecutionContext {
            runtime: self.runtime.clone(),
            policy: self.policy,
            stream: self.stream.clone(),
        };

        match self.policy.backend() {
            Backend::Mc => {
                let pool = ctx.compute().clone();
                pool.execute(move || op(operands, &ctx)).await?
            }
            Backend::Gpu => {
                let Some(stream) = self.stream else {
                    return Err(Error::Unsupported(format!(
                        "policy {} has no stream",
                        self.policy
                    )));
                };

                #[cfg(feature = "cuda")]
                let cuda = stream.cuda().clone();

                let job = stream.submit(move || {
                    let output = op(operands, &ctx)?;
                    // marks the point the stream has to reach
                    #[cfg(feature = "cuda")]
                    let output = (output, cuda.record_event(None)?);
                    Ok(output)
                });
                let output = job.await.map_err(|_| Error::Cancelled)??;

                #[cfg(feature = "cuda")]
                let output = {
                    let (output, event) = output;
                    self.runtime
                        .notifications()
                        .register(
                            "gpu stream",
                            crate::notifications::CudaEventChecker::new(event),
                        )
                        .await
                        .map_err(Error::Completion)?;
                    output
                };

                Ok(output)
            }
        }
    }
}

/// Completion signal of a dispatched operation.
///
/// The operation is spawned when the completion is created; awaiting only
/// observes the result. Dropping a completion detaches it. [`Completion::abort`]
/// is safe as long as the operation has not started: operands still pending
/// are dropped, which withdraws their queued pipeline requests.
pub struct Completion<R> {
    handle: JoinHandle<Result<R>>,
    chain: Chain,
}

impl<R> fmt::Debug for Completion<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("policy", &self.chain.policy)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl<R: Send + 'static> Completion<R> {
    fn failed(chain: Chain, error: Error) -> Self {
        chain.spawn(async move { Err(error) })
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Continue on the same chain with the result of this operation.
    pub fn then<U, F>(self, op: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(R, &ExecutionContext) -> Result<U> + Send + 'static,
    {
        let chain = self.chain.clone();
        chain.try_dispatch(self, op)
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<R> Future for Completion<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(join)) => Poll::Ready(Err(join.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::sync::oneshot;

    fn runtime() -> Runtime {
        Runtime::from_current(TuneParameters::for_testing()).unwrap()
    }

    fn thread_name() -> String {
        std::thread::current().name().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_mc_runs_on_compute_pool() {
        let dispatcher = runtime().dispatcher();
        let (value, name) = dispatcher
            .dispatch(Policy::mc(), async { 20 }, |x, _ctx| Ok((x + 1, thread_name())))
            .await
            .unwrap();
        assert_eq!(value, 21);
        assert!(name.starts_with("tessera-compute-"), "{name}");
        assert!(!name.starts_with("tessera-compute-hp"), "{name}");
    }

    #[tokio::test]
    async fn test_high_priority_uses_dedicated_pool() {
        let dispatcher = runtime().dispatcher();
        let policy = Policy::mc().with_priority(Priority::High);
        let name = dispatcher
            .dispatch(policy, async {}, |_, ctx| {
                assert_eq!(ctx.compute().num_threads(), 1);
                Ok(thread_name())
            })
            .await
            .unwrap();
        assert!(name.starts_with("tessera-compute-hp-"), "{name}");
    }

    #[tokio::test]
    async fn test_op_waits_for_operands() {
        let dispatcher = runtime().dispatcher();
        let (tx, rx) = oneshot::channel::<i32>();
        let started = Arc::new(AtomicBool::new(false));

        let flag = started.clone();
        let completion = dispatcher.dispatch(Policy::mc(), rx, move |x, _| {
            flag.store(true, Ordering::SeqCst);
            Ok(x.unwrap() * 2)
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!started.load(Ordering::SeqCst));
        assert!(!completion.is_finished());

        tx.send(4).unwrap();
        assert_eq!(completion.await.unwrap(), 8);
        assert!(started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_upstream_failure_skips_op() {
        let dispatcher = runtime().dispatcher();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let result = dispatcher
            .try_dispatch(
                Policy::mc(),
                async { Err::<(), _>(Error::Unsupported("upstream".into())) },
                move |_, _| {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;

        assert!(matches!(result, Err(Error::Unsupported(msg)) if msg == "upstream"));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_fails_completion() {
        let dispatcher = runtime().dispatcher();
        let result = dispatcher
            .dispatch(Policy::mc(), async {}, |_, _| -> Result<()> { panic!("op exploded") })
            .await;
        assert!(matches!(result, Err(Error::Panicked(msg)) if msg == "op exploded"));
    }

    #[tokio::test]
    async fn test_abort_before_start() {
        let dispatcher = runtime().dispatcher();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let completion = dispatcher.dispatch(Policy::mc(), futures::future::pending::<()>(), move |_, _| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        completion.abort();

        assert!(matches!(completion.await, Err(Error::Cancelled)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_bound_policy() {
        let dispatcher = runtime().dispatcher();
        let bound = Policy::mc().bind(|(a, b): (i32, i32), _: &ExecutionContext| -> Result<i32> { Ok(a * b) });
        assert_eq!(bound.policy(), Policy::mc());
        assert_eq!(bound.run(&dispatcher, async { (6, 7) }).await.unwrap(), 42);
    }

    #[cfg(not(feature = "cuda"))]
    #[tokio::test]
    async fn test_gpu_chain_preserves_order() {
        let dispatcher = runtime().dispatcher();
        let chain = dispatcher.chain(Policy::gpu(0)).unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let completions: Vec<_> = (0..8u64)
            .map(|i| {
                let log = log.clone();
                chain.dispatch(async {}, move |_, ctx| {
                    std::thread::sleep(Duration::from_millis(8 - i));
                    log.lock().push(i);
                    Ok(ctx.stream().map(Stream::index))
                })
            })
            .collect();

        for completion in completions {
            assert_eq!(completion.await.unwrap(), chain.stream().map(Stream::index));
        }
        assert_eq!(*log.lock(), (0..8).collect::<Vec<_>>());
    }

    #[cfg(not(feature = "cuda"))]
    #[tokio::test]
    async fn test_then_stays_on_chain() {
        let dispatcher = runtime().dispatcher();
        let first = dispatcher.dispatch(Policy::gpu(0), async { 2 }, |x, ctx| {
            Ok((x, ctx.stream().cloned()))
        });
        let stream = first.chain().stream().cloned().unwrap();

        let second = first.then(move |(x, previous), ctx| {
            let same = previous.zip(ctx.stream()).is_some_and(|(a, b)| a.same_as(b));
            Ok((x * 10, same))
        });
        assert!(second.chain().stream().unwrap().same_as(&stream));
        assert_eq!(second.await.unwrap(), (20, true));
    }

    #[tokio::test]
    async fn test_then_propagates_failure() {
        let dispatcher = runtime().dispatcher();
        let failed = dispatcher.dispatch(Policy::mc(), async {}, |_, _| -> Result<i32> {
            Err(Error::Unsupported("first".into()))
        });
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let result = failed
            .then(move |x, _| {
                flag.store(true, Ordering::SeqCst);
                Ok(x)
            })
            .await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_async_body() {
        let dispatcher = runtime().dispatcher();
        let (tx, rx) = oneshot::channel();
        let completion = dispatcher.spawn(Policy::mc(), async move {
            rx.await.map_err(|_| Error::Cancelled)
        });
        assert_eq!(completion.chain().policy(), Policy::mc());

        tx.send(5).unwrap();
        assert_eq!(completion.await.unwrap(), 5);
    }
}

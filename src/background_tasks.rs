// Copyright (C) 2026 Marquee Developers <devs@marquee.example>
//
// This file is part of marquee.
//
// marquee is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// marquee is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with marquee.  If not,
// see <http://www.gnu.org/licenses/>.

//! # Background Task Processing
//!
//! [axum] makes no provision for compute outside the context of handling HTTP requests, so this
//! module provides a small async background task queue for marquee.
//!
//! # Design
//!
//! The goal is to let request handlers spawn work off the "hot path" of serving a request. The
//! motivating case is the welcome mail sent on first login: rather than engage in an SMTP
//! exchange inside the login handler, adding latency and additional points of failure to every
//! first login, the handler enqueues a [Task] & returns; a single background processor (per
//! process) picks tasks up & drives them with a per-task timeout.
//!
//! One could of course just use [tokio::spawn] at each call site, but funneling everything
//! through one processor bounds the concurrency, gives each task a timeout, and gives shutdown a
//! single place to drain in-flight work. Delivery is best-effort: the queue is in-memory, and
//! tasks enqueued but not yet executed at shutdown are dropped. Welcome mail doesn't warrant
//! more; a task type that does can bring its own durable queue behind the same [Receiver] trait.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, task::Poll, time::Duration};

use async_trait::async_trait;
use pin_project::pin_project;
use serde::Deserialize;
use snafu::{prelude::*, Backtrace, IntoError};
use tokio::{
    sync::{mpsc, Notify},
    task::{Id, JoinError, JoinHandle, JoinSet},
};

use crate::{
    counter_add, gauge_setu,
    metrics::{self, Instruments, Sort},
    notify::Notifier,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    // Generic error variant trait implementations can use
    #[snafu(display("{source}"))]
    Background {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
    #[snafu(display("Task processing failed to run to completion: {source}"))]
    Join {
        source: tokio::task::JoinError,
        backtrace: Backtrace,
    },
    #[snafu(display("The task queue has been closed"))]
    QueueClosed { backtrace: Backtrace },
    #[snafu(display("Timeout shutting-down the task processor: {source}"))]
    ShutdownTimeout {
        source: tokio::time::error::Elapsed,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to pick-up a new task: {source}"))]
    Take {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },
    #[snafu(display("Tried to remove an unknown TaskId"))]
    TaskId { backtrace: Backtrace },
    #[snafu(display("Failed to wait for in-flight tasks: {source}"))]
    Timeout { source: tokio::time::error::Elapsed },
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Background {
            source: Box::new(err),
            backtrace: Backtrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             tasks                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Trait defining a "task" for our purposes.
///
/// This is intentionally as general as possible: this system can handle any task that is [Send],
/// and that can convert itself into an async function yielding a `Result<()>`. Persuant to the
/// last point, note especially that the `exec()` method consumes the task!
// This trait *must* be object-safe in order to allow `process()` (below) to handle tasks in a
// generic way; the generic context parameter has to be at the trait level, as putting it on
// `exec()` would break object safety.
#[async_trait]
pub trait Task<C>: Send {
    /// Consume this task by converting it into a `Future` yielding a `Result<()>`.
    async fn exec(self: Box<Self>, context: C) -> Result<()>;
    fn timeout(&self) -> Option<Duration>;
}

/// Trait defining the ability to harvest, or "receive" [Task]s generically.
///
/// A [Receiver] needs to be able to move [Task] trait objects out of its backing queue, along
/// with a "cookie" identifying the task, and, at a later time, mark them as complete. For the
/// in-memory [Queue] the cookie is trivial; a durable implementation would use it to release a
/// lease.
#[async_trait]
pub trait Receiver<C> {
    type TaskId: Send + 'static;
    async fn mark_complete(&self, cookie: Self::TaskId) -> Result<()>;
    async fn take_task(&self) -> Result<Option<(Box<dyn Task<C>>, Self::TaskId)>>;
}

/// Blanket implementation for [Arc]s; if `T` is a [Receiver], then so is `Arc<T>`.
#[async_trait]
impl<C, T: Receiver<C> + Send + Sync> Receiver<C> for Arc<T> {
    type TaskId = T::TaskId;
    async fn mark_complete(&self, cookie: Self::TaskId) -> Result<()> {
        self.as_ref().mark_complete(cookie).await
    }
    async fn take_task(&self) -> Result<Option<(Box<dyn Task<C>>, Self::TaskId)>> {
        self.as_ref().take_task().await
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      the in-memory queue                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Everything a background task might need at execution time
#[derive(Clone)]
pub struct Context {
    pub notifier: Arc<dyn Notifier + Send + Sync>,
}

/// Handle by which request handlers enqueue background work; cheap to clone
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<Box<dyn Task<Context>>>,
}

impl Sender {
    pub async fn send(&self, task: impl Task<Context> + 'static) -> Result<()> {
        self.tx
            .send(Box::new(task))
            .await
            .map_err(|_| QueueClosedSnafu.build())
    }
}

/// The receiving half of the in-memory task queue
pub struct Queue {
    rx: tokio::sync::Mutex<mpsc::Receiver<Box<dyn Task<Context>>>>,
}

#[async_trait]
impl Receiver<Context> for Queue {
    type TaskId = ();
    async fn mark_complete(&self, _cookie: Self::TaskId) -> Result<()> {
        // The task was moved out of the channel when it was taken; nothing to release.
        Ok(())
    }
    async fn take_task(&self) -> Result<Option<(Box<dyn Task<Context>>, Self::TaskId)>> {
        Ok(self
            .rx
            .lock()
            .await
            .try_recv()
            .ok()
            .map(|task| (task, ())))
    }
}

/// Create a connected ([Sender], [Queue]) pair with room for `capacity` pending tasks
pub fn channel(capacity: usize) -> (Sender, Queue) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Sender { tx },
        Queue {
            rx: tokio::sync::Mutex::new(rx),
        },
    )
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         the processor                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// [Processor] is the type managing the ongoing processing of background tasks. It has a single
/// method, `shutdown()` which will consume the instance & resolve to the result of the
/// processing process (`Result<()>`).
// `Processor` need not be cheaply clonable; will likely be held in one place & then dropped to
// signal that it should shut down.
#[pin_project]
pub struct Processor {
    // This               👇 must match the return type of `process()`
    #[pin]
    processor: JoinHandle<Result<()>>,
    shutdown: Arc<Notify>,
}

impl Future for Processor {
    type Output = std::result::Result<Result<()>, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.processor.poll(cx)
    }
}

impl Processor {
    /// Consume the instance & return the result of processing background tasks
    ///
    /// This method will signal the processing task to shutdown, and wait for time `timeout` for
    /// the task to exit.
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        self.shutdown.notify_one();
        tokio::time::timeout(timeout, self.processor)
            .await
            .context(ShutdownTimeoutSnafu)?
            .context(JoinSnafu)?
    }
    /// Split the instance back into its parts
    ///
    /// This is convenient when waiting on the processor along with other futures (in a
    /// `tokio::select!` invocation, e.g.)
    pub fn into_parts(self) -> (JoinHandle<Result<()>>, Arc<Notify>) {
        (self.processor, self.shutdown)
    }
}

/// Configuration parameters for processing background tasks
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Timeout that will be used for any task that doesn't define its own
    #[serde(rename = "default-timeout")]
    pub default_timeout: Duration,
    /// The maximum number of tasks to drive concurrently
    #[serde(rename = "max-concurrent-tasks")]
    pub max_concurrent_tasks: usize,
    /// Amount of time to sleep when we have no tasks in process
    #[serde(rename = "sleep-duration")]
    pub sleep_duration: Duration,
    /// Amount of time to wait for in-flight tasks on shutdown
    #[serde(rename = "shutdown-timeout")]
    pub shutdown_timeout: Duration,
    /// Maximum amount of time to drive in-flight tasks without attempting to pick-up new tasks
    #[serde(rename = "pickup-timeout")]
    pub pickup_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            max_concurrent_tasks: 16,
            sleep_duration: Duration::from_secs(1),
            shutdown_timeout: Duration::from_millis(500),
            pickup_timeout: Duration::from_millis(1000),
        }
    }
}

inventory::submit! { metrics::Registration::new("background.processor.tasks.completed", Sort::IntegralCounter) }

inventory::submit! { metrics::Registration::new("background.processor.tasks.inflight", Sort::IntegralGauge) }

/// Process background tasks. `receiver` is a [Receiver] from which we can draw tasks. `config`
/// holds configuration parameters for the algorithm. `shutdown` is a [Notify] instance the
/// caller can use to signal this function to exit.
async fn process<C: Clone + 'static, R: Receiver<C>>(
    receiver: R,
    context: C,
    config: Config,
    shutdown: Arc<Notify>,
    instruments: Arc<Instruments>,
) -> Result<()> {
    // The basic outline of this logic is to maintain a `JoinSet` of currently running tasks,
    let mut tasks: HashMap<Id, R::TaskId> = HashMap::new();
    // with that, we can setup our `JoinSet`:
    let mut futures = JoinSet::new();
    // The overall structure here is an infinite loop; so long as...
    let mut done = false;
    // `done` is not true, loop:
    while !done {
        // so long as we don't have too much on our plate, try 'n grab another task:
        if futures.len() < config.max_concurrent_tasks {
            if let Some((task, cookie)) = receiver.take_task().await.context(TakeSnafu)? {
                let id = futures
                    .spawn(tokio::time::timeout(
                        task.timeout().unwrap_or(config.default_timeout),
                        task.exec(context.clone()),
                    ))
                    .id();
                tasks.insert(id, cookie);
            }
        }

        gauge_setu!(
            instruments,
            "background.processor.tasks.inflight",
            futures.len() as u64,
            &[]
        );

        if !futures.is_empty() {
            // We've got at least one task; drive 'em all forward, while waiting on our shutdown
            // notification:
            tokio::select! {
                result = futures.join_next_with_id() => {
                    match result {
                        Some(Ok((id, _))) => {
                            // The task has completed (and been consumed in the process); now all
                            // that remains is to mark it complete.
                            let cookie = tasks.remove(&id).context(TaskIdSnafu)?;
                            receiver.mark_complete(cookie).await?;
                            counter_add!(instruments, "background.processor.tasks.completed", 1, &[]);
                        },
                        Some(Err(err)) => {
                            return Err(JoinSnafu.into_error(err));
                        },
                        None => unimplemented!(), // Precluded by `.is_empty()`, above.
                    }
                },
                // If `futures` has a single task, and that task is long-running, we can get
                // "stuck" in this `select!` statement, driving that task forward, while other
                // tasks pile-up in the queue. By stopping periodically, we can pick-up new tasks.
                _ = tokio::time::sleep(config.pickup_timeout) => (),
                _ = shutdown.notified() => {
                    done = true;
                }
            }
        } else {
            // We have no tasks; hang out a bit before attempting to pick-up a task, while
            // remaining mindful of our shutdown notification:
            tokio::select! {
                _ = tokio::time::sleep(config.sleep_duration) => (), // Loop around & try again
                _ = shutdown.notified() => {
                    done = true;
                }
            }
        }
    } // End processing loop.

    // Give any in-flight tasks a chance to complete:
    tokio::time::timeout(config.shutdown_timeout, futures.join_all())
        .await
        .context(TimeoutSnafu)?;

    Ok(())
}

/// Create a new [Processor] given a [Receiver].
pub fn new<C: Clone + Send + 'static, R: Receiver<C> + Send + 'static>(
    receiver: R,
    context: C,
    config: Option<Config>,
    instruments: Arc<Instruments>,
) -> std::result::Result<Processor, Error> {
    let shutdown = Arc::new(Notify::new());
    let processor = tokio::spawn(process(
        receiver,
        context,
        config.unwrap_or_default(),
        shutdown.clone(),
        instruments,
    ));
    Ok(Processor {
        processor,
        shutdown,
    })
}

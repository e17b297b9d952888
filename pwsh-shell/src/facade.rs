// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The public surface (§4.6, §6): `call`, `destroy`, the six per-stream
//! broadcasters, and the stats snapshot.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::child::{GenerationPaths, RealChild};
use crate::command::Command;
use crate::config::Config;
use crate::dispatcher::{Broadcasters, DispatcherState, Submission};
use crate::envelope::{StreamsResult, SuccessResult};
use crate::error::ShellError;
use crate::format::OutputFormat;
use crate::lifecycle;
use crate::stats::ShellStats;

/// Per-stream broadcast channel capacity. Generous enough that a slow
/// subscriber rarely lags, without holding results indefinitely — this is a
/// live fan-out, not a replay log (§3).
const BROADCAST_CAPACITY: usize = 256;

/// A single-value, also-awaitable result of `call` or `destroy` (§4.6). A
/// dropped [`Handle`] simply stops polling — the dispatcher still runs the
/// command to completion, it just has nowhere to deliver the result.
pub struct Handle<T> {
    receiver: oneshot::Receiver<Result<T, ShellError>>,
}

impl<T> Future for Handle<T> {
    type Output = Result<T, ShellError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ShellError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Supervises a long-lived PowerShell interpreter behind a structured RPC.
///
/// Cloning is cheap — all clones share the same supervisor task, queue, and
/// broadcasters; the supervisor task itself exits once the last clone is
/// dropped and `destroy` is never called, or immediately once `destroy`
/// completes.
#[derive(Clone)]
pub struct PwshShell {
    submissions: mpsc::UnboundedSender<Submission>,
    broadcasters: Broadcasters,
    stats: watch::Receiver<ShellStats>,
}

impl PwshShell {
    /// Spawns the interpreter and the supervisor task.
    pub fn new(config: Config) -> Self {
        let (submissions_tx, submissions_rx) = mpsc::unbounded_channel();
        let broadcasters = Broadcasters::new(BROADCAST_CAPACITY);
        let (stats_tx, stats_rx) = watch::channel(ShellStats {
            queue_depth: 0,
            dispatcher_state: DispatcherState::Idle,
            generation: 0,
            pid: None,
        });

        let timeout = config.timeout();
        let collect_verbose = config.verbose();
        let collect_debug = config.debug();
        let exe_path = config.exe_path().to_path_buf();
        let tmp_dir = config.tmp_dir().to_path_buf();

        let spawn_fn = move || -> Result<(RealChild, GenerationPaths), ShellError> {
            RealChild::spawn(&exe_path, &tmp_dir)
        };

        let task_broadcasters = broadcasters.clone();
        tokio::spawn(lifecycle::run_supervisor(
            spawn_fn,
            submissions_rx,
            task_broadcasters,
            timeout,
            collect_verbose,
            collect_debug,
            stats_tx,
        ));

        Self {
            submissions: submissions_tx,
            broadcasters,
            stats: stats_rx,
        }
    }

    /// Submits a PowerShell source fragment for execution against the
    /// persistent interpreter. Returns immediately with a [`Handle`]; the
    /// submission itself is handed off via a spawned task so the handle is
    /// observable before the command can possibly complete (§4.4, §4.6).
    pub fn call(&self, source: impl Into<String>, format: OutputFormat) -> Handle<StreamsResult> {
        let fragment = source.into();
        let generation = self.stats.borrow().generation;
        let (cmd, receiver) = Command::new(fragment, format, generation);
        let sender = self.submissions.clone();
        tokio::spawn(async move {
            let _ = sender.send(Submission::Call(cmd));
        });
        Handle { receiver }
    }

    /// Shuts the supervisor down: kills the child (escalating if needed),
    /// fails any in-flight or queued command with [`ShellError::Closed`],
    /// and resolves with `true` once fully observed. Idempotent — a second
    /// call after the first has completed returns the same `true` without
    /// performing any further kill (§8, invariant 5).
    pub fn destroy(&self) -> Handle<bool> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();
        let sender = self.submissions.clone();
        tokio::spawn(async move {
            let _ = sender.send(Submission::Destroy(ack_tx));
            let _ = ack_rx.await;
            let _ = result_tx.send(Ok(true));
        });
        Handle { receiver: result_rx }
    }

    /// A read-only snapshot of queue depth, dispatcher state, generation,
    /// and child pid (§1a).
    pub fn stats(&self) -> ShellStats {
        *self.stats.borrow()
    }

    /// Subscribes to the Success stream.
    pub fn subscribe_success(&self) -> broadcast::Receiver<SuccessResult> {
        self.broadcasters.success.subscribe()
    }

    /// Subscribes to the Error stream.
    pub fn subscribe_error(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.error.subscribe()
    }

    /// Subscribes to the Warning stream.
    pub fn subscribe_warning(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.warning.subscribe()
    }

    /// Subscribes to the Verbose stream.
    pub fn subscribe_verbose(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.verbose.subscribe()
    }

    /// Subscribes to the Debug stream.
    pub fn subscribe_debug(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.debug.subscribe()
    }

    /// Subscribes to the Information stream.
    pub fn subscribe_info(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.info.subscribe()
    }
}

// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Startup, restart-on-failure, and graceful-then-forceful shutdown (§4.5).
//!
//! Runs as the single task described in §5: the dispatch loop, the kill
//! escalation timers, and the restart/shutdown transitions all execute
//! serialized here, so none of this module's state needs a lock.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::watch;

use crate::child::{ChildHandle, GenerationPaths};
use crate::command::Command;
use crate::dispatcher::{self, Broadcasters, DispatcherState, GenerationOutcome, Submission};
use crate::error::ShellError;
use crate::stats::ShellStats;

/// Delay between successive kill-escalation signals (§4.5).
const KILL_STEP: Duration = Duration::from_secs(10);

/// Runs the supervisor until `destroy` is observed or the submissions
/// channel closes.
///
/// `spawn` is called once at startup and again after every restart; it is
/// generic so tests can supply an in-memory [`crate::child::fake::FakeChild`]
/// factory instead of spawning a real interpreter.
pub(crate) async fn run_supervisor<C, Spawn>(
    mut spawn: Spawn,
    mut submissions: tokio::sync::mpsc::UnboundedReceiver<Submission>,
    broadcasters: Broadcasters,
    timeout: Duration,
    collect_verbose: bool,
    collect_debug: bool,
    stats: watch::Sender<ShellStats>,
) where
    C: ChildHandle,
    Spawn: FnMut() -> Result<(C, GenerationPaths), ShellError>,
{
    let mut generation: u64 = 0;
    let mut queue: VecDeque<Command> = VecDeque::new();

    loop {
        let (mut child, paths) = match spawn() {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn shell; failing queued work");
                drain_queue_closed(&mut queue);
                fail_remaining_submissions(&mut submissions, &mut queue).await;
                return;
            }
        };
        tracing::info!(generation, pid = child.pid(), "shell spawned");
        publish_stats(&stats, &queue, DispatcherState::Idle, generation, child.pid());

        let (_, outcome, leftover) = dispatcher::run_generation(
            &mut child,
            &paths,
            &mut queue,
            &mut submissions,
            &broadcasters,
            generation,
            timeout,
            collect_verbose,
            collect_debug,
        )
        .await;

        match outcome {
            GenerationOutcome::Restart(err) => {
                tracing::warn!(error = %err, generation, "restarting shell");
                kill_and_wait(&mut child).await;
                drain_queue_closed(&mut queue);
                generation += 1;
            }
            GenerationOutcome::ChildClosed => {
                tracing::warn!(generation, "shell exited unexpectedly; restarting");
                drain_queue_closed(&mut queue);
                generation += 1;
            }
            GenerationOutcome::ShutdownRequested(ack) => {
                tracing::info!(generation, "shutting down shell");
                kill_and_wait(&mut child).await;
                if let Some(cmd) = leftover {
                    cmd.complete(Err(ShellError::Closed));
                }
                drain_queue_closed(&mut queue);
                publish_stats(&stats, &queue, DispatcherState::Idle, generation, None);
                // Drop before acking: the caller's `destroy()` handle resolves
                // only once the scratch files are actually gone (§8 invariant 6).
                drop(child);
                let _ = ack.send(());
                return;
            }
            GenerationOutcome::FacadeGone => {
                tracing::info!(generation, "facade dropped without destroy; shutting down");
                kill_and_wait(&mut child).await;
                if let Some(cmd) = leftover {
                    cmd.complete(Err(ShellError::Closed));
                }
                drain_queue_closed(&mut queue);
                return;
            }
        }

        // Drop here (rather than at loop top) so the old generation's temp
        // files are removed before the new one's are created.
        drop(child);
    }
}

/// SIGTERM immediately, then SIGINT and SIGKILL on a 10-second schedule,
/// racing each step against the child actually closing (§4.5).
async fn kill_and_wait<C: ChildHandle>(child: &mut C) {
    let _ = child.request_exit();
    if wait_or_step(child).await {
        return;
    }
    let _ = child.interrupt();
    if wait_or_step(child).await {
        return;
    }
    let _ = child.force_kill();
    let _ = child.closed().await;
}

async fn wait_or_step<C: ChildHandle>(child: &mut C) -> bool {
    tokio::select! {
        _ = child.closed() => true,
        _ = tokio::time::sleep(KILL_STEP) => false,
    }
}

fn drain_queue_closed(queue: &mut VecDeque<Command>) {
    while let Some(cmd) = queue.pop_front() {
        cmd.complete(Err(ShellError::Closed));
    }
}

/// Reached only when the shell could not be spawned at all; fails every
/// submission that still arrives instead of leaving the façade hanging.
async fn fail_remaining_submissions(
    submissions: &mut tokio::sync::mpsc::UnboundedReceiver<Submission>,
    queue: &mut VecDeque<Command>,
) {
    drain_queue_closed(queue);
    while let Some(submission) = submissions.recv().await {
        match submission {
            Submission::Call(cmd) => cmd.complete(Err(ShellError::Closed)),
            Submission::Destroy(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn publish_stats(
    stats: &watch::Sender<ShellStats>,
    queue: &VecDeque<Command>,
    dispatcher_state: DispatcherState,
    generation: u64,
    pid: Option<u32>,
) {
    let _ = stats.send(ShellStats {
        queue_depth: queue.len(),
        dispatcher_state,
        generation,
        pid,
    });
}

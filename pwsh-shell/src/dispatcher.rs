// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The queue and the three-state dispatch loop for one child generation
//! (§4.4). Driven by [`crate::lifecycle`], which owns startup/restart/
//! shutdown around it.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::child::{ChildHandle, GenerationPaths};
use crate::command::Command;
use crate::envelope::{StreamsResult, SuccessResult};
use crate::error::ShellError;
use crate::timeout::TimeoutManager;

/// The dispatcher's current position in its three-state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// No command in flight; the next queued command may be dequeued.
    Idle,
    /// The current command's script is being written to the child's stdin.
    Writing,
    /// The write completed; waiting for the child's next envelope or timeout.
    Awaiting,
}

/// The six long-lived per-stream fan-out sinks owned by the façade (§3, §4.6).
/// `success` carries the call's decoded [`SuccessResult`]; the other five
/// always carry `Vec<String>`. Emits only non-empty sequences.
#[derive(Clone)]
pub(crate) struct Broadcasters {
    pub(crate) success: broadcast::Sender<SuccessResult>,
    pub(crate) error: broadcast::Sender<Vec<String>>,
    pub(crate) warning: broadcast::Sender<Vec<String>>,
    pub(crate) verbose: broadcast::Sender<Vec<String>>,
    pub(crate) debug: broadcast::Sender<Vec<String>>,
    pub(crate) info: broadcast::Sender<Vec<String>>,
}

impl Broadcasters {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            success: broadcast::channel(capacity).0,
            error: broadcast::channel(capacity).0,
            warning: broadcast::channel(capacity).0,
            verbose: broadcast::channel(capacity).0,
            debug: broadcast::channel(capacity).0,
            info: broadcast::channel(capacity).0,
        }
    }

    /// Emits each of a completed command's non-empty streams (§3: "emit only
    /// non-empty sequences"). Ignores the no-subscribers case — broadcasting
    /// is fire-and-forget fan-out, not a required delivery.
    pub(crate) fn fan_out(&self, result: &StreamsResult) {
        if !result.success.is_empty() {
            let _ = self.success.send(result.success.clone());
        }
        if !result.error.is_empty() {
            let _ = self.error.send(result.error.clone());
        }
        if !result.warning.is_empty() {
            let _ = self.warning.send(result.warning.clone());
        }
        if !result.verbose.is_empty() {
            let _ = self.verbose.send(result.verbose.clone());
        }
        if !result.debug.is_empty() {
            let _ = self.debug.send(result.debug.clone());
        }
        if !result.info.is_empty() {
            let _ = self.info.send(result.info.clone());
        }
    }
}

/// Why a generation's dispatch loop ended.
pub(crate) enum GenerationOutcome {
    /// A restart-provoking error occurred (timeout or decode failure); the
    /// offending command's sink has already been resolved.
    Restart(ShellError),
    /// The child's stdout closed (exit detected); awaiting `closed()` for
    /// exit details is the caller's responsibility.
    ChildClosed,
    /// `destroy` was requested; the loop exited without touching the queue
    /// so the caller can drain it under the shutdown policy. Carries the
    /// sender that must be fired once shutdown has fully completed.
    ShutdownRequested(tokio::sync::oneshot::Sender<()>),
    /// The submissions channel closed (façade dropped) with no explicit
    /// `destroy` — treated the same as a shutdown request.
    FacadeGone,
}

/// Messages the façade forwards into the running supervisor task.
pub(crate) enum Submission {
    Call(Command),
    Destroy(tokio::sync::oneshot::Sender<()>),
}

/// Drives one child generation through Idle → Writing → Awaiting → Idle
/// until a restart- or shutdown-provoking event ends it.
///
/// `queue` is owned by the caller and persists across generations; commands
/// left in it when this returns are the caller's responsibility (drain with
/// `Closed` on restart, or under the full shutdown policy).
pub(crate) async fn run_generation<C: ChildHandle>(
    child: &mut C,
    paths: &GenerationPaths,
    queue: &mut VecDeque<Command>,
    submissions: &mut tokio::sync::mpsc::UnboundedReceiver<Submission>,
    broadcasters: &Broadcasters,
    generation: u64,
    timeout: Duration,
    collect_verbose: bool,
    collect_debug: bool,
) -> (DispatcherState, GenerationOutcome, Option<Command>) {
    let mut state = DispatcherState::Idle;
    let mut current: Option<Command> = None;
    let mut command_timeout: Option<TimeoutManager> = None;

    loop {
        match state {
            DispatcherState::Idle => {
                tokio::select! {
                    biased;

                    exit = child.closed() => {
                        let _ = exit;
                        return (state, GenerationOutcome::ChildClosed, current);
                    }

                    submission = submissions.recv() => {
                        match submission {
                            Some(Submission::Call(cmd)) => queue.push_back(cmd),
                            Some(Submission::Destroy(ack)) => {
                                return (state, GenerationOutcome::ShutdownRequested(ack), current);
                            }
                            None => return (state, GenerationOutcome::FacadeGone, current),
                        }
                    }

                    _ = tokio::task::yield_now(), if !queue.is_empty() => {
                        let cmd = queue.pop_front().expect("checked non-empty above");
                        if cmd.generation != generation {
                            // Queued against a generation that no longer exists;
                            // never replayed across a restart boundary.
                            cmd.complete(Err(ShellError::Closed));
                            continue;
                        }
                        current = Some(cmd);
                        tracing::debug!(generation, "dispatcher tick: Idle -> Writing");
                        state = DispatcherState::Writing;
                    }
                }
            }

            DispatcherState::Writing => {
                let cmd = current.as_ref().expect("Writing state always has a current command");
                let script = crate::wrapper::build_wrapper_script(
                    &cmd.fragment,
                    &paths.head,
                    &paths.tail,
                    &paths.verbose_path,
                    &paths.debug_path,
                    cmd.format,
                    collect_verbose,
                    collect_debug,
                );
                tracing::trace!(generation, bytes = script.len(), "writing wrapped fragment to child stdin");
                tokio::task::yield_now().await;
                match child.write(&script).await {
                    Ok(()) => {
                        command_timeout = Some(TimeoutManager::new(timeout));
                        tracing::debug!(generation, "dispatcher tick: Writing -> Awaiting");
                        state = DispatcherState::Awaiting;
                    }
                    Err(e) => {
                        tracing::warn!(generation, error = %e, "stdin write failed");
                        let cmd = current.take().expect("present in Writing state");
                        cmd.complete(Err(e));
                        state = DispatcherState::Idle;
                    }
                }
            }

            DispatcherState::Awaiting => {
                tokio::select! {
                    biased;

                    exit = child.closed() => {
                        let _ = exit;
                        if let Some(cmd) = current.take() {
                            cmd.complete(Err(ShellError::Closed));
                        }
                        return (state, GenerationOutcome::ChildClosed, None);
                    }

                    frame = child.next_frame() => {
                        let cmd = current.take().expect("Awaiting state always has a current command");
                        match frame {
                            Some(Ok(result)) => {
                                tracing::trace!(generation, "envelope received; resolving command");
                                cmd.complete(Ok(result.clone()));
                                broadcasters.fan_out(&result);
                                tracing::debug!(generation, "dispatcher tick: Awaiting -> Idle");
                                state = DispatcherState::Idle;
                                tokio::task::yield_now().await;
                            }
                            Some(Err(e)) => {
                                let restart = e.provokes_restart();
                                tracing::warn!(generation, error = %e, restart, "envelope decode failed");
                                cmd.complete(Err(e.clone()));
                                if restart {
                                    return (DispatcherState::Idle, GenerationOutcome::Restart(e), None);
                                }
                                state = DispatcherState::Idle;
                            }
                            None => {
                                cmd.complete(Err(ShellError::Closed));
                                return (DispatcherState::Idle, GenerationOutcome::ChildClosed, None);
                            }
                        }
                    }

                    () = tokio::time::sleep(
                        command_timeout.as_ref().expect("Awaiting state always has a running timeout").remaining()
                    ) => {
                        let configured = command_timeout
                            .as_ref()
                            .expect("Awaiting state always has a running timeout")
                            .timeout();
                        tracing::warn!(generation, ?configured, "command timed out; provoking restart");
                        let cmd = current.take().expect("Awaiting state always has a current command");
                        cmd.complete(Err(ShellError::Timeout(configured)));
                        return (DispatcherState::Idle, GenerationOutcome::Restart(ShellError::Timeout(configured)), None);
                    }

                    submission = submissions.recv() => {
                        match submission {
                            Some(Submission::Call(cmd)) => queue.push_back(cmd),
                            Some(Submission::Destroy(ack)) => {
                                // The in-flight command is left unresolved here;
                                // the caller fails it with `Closed` as part of
                                // the shutdown drain, same as queued commands.
                                return (state, GenerationOutcome::ShutdownRequested(ack), current);
                            }
                            None => return (state, GenerationOutcome::FacadeGone, current),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::fake::{FakeChild, SignalLog};
    use crate::format::OutputFormat;
    use std::path::PathBuf;

    fn harness() -> (
        FakeChild,
        tokio::sync::mpsc::UnboundedReceiver<String>,
        tokio::sync::mpsc::UnboundedSender<Result<StreamsResult, ShellError>>,
        tokio::sync::oneshot::Sender<(Option<i32>, Option<i32>)>,
    ) {
        let (writes_tx, writes_rx) = tokio::sync::mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = tokio::sync::mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        let child = FakeChild {
            writes: writes_tx,
            frames: frames_rx,
            closed_rx,
            signals: SignalLog::default(),
            pid: Some(4242),
        };
        (child, writes_rx, frames_tx, closed_tx)
    }

    fn paths() -> GenerationPaths {
        GenerationPaths {
            head: "HEADHEAD12".to_owned(),
            tail: "TAILTAIL34".to_owned(),
            verbose_path: PathBuf::from("/tmp/t-verbose.tmp"),
            debug_path: PathBuf::from("/tmp/t-debug.tmp"),
        }
    }

    fn empty_result() -> StreamsResult {
        StreamsResult {
            success: SuccessResult::Structured(vec![]),
            error: vec![],
            warning: vec![],
            verbose: vec![],
            debug: vec![],
            info: vec![],
        }
    }

    #[tokio::test]
    async fn single_call_completes_with_frame_result() {
        let (mut child, _writes, frames_tx, _closed_tx) = harness();
        let (submissions_tx, mut submissions_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut queue = std::collections::VecDeque::new();
        let broadcasters = Broadcasters::new(16);

        let (cmd, receiver) = Command::new("Get-Date;".to_owned(), OutputFormat::Json, 0);
        submissions_tx.send(Submission::Call(cmd)).unwrap();
        frames_tx.send(Ok(empty_result())).unwrap();

        let run = tokio::spawn(async move {
            run_generation(
                &mut child,
                &paths(),
                &mut queue,
                &mut submissions_rx,
                &broadcasters,
                0,
                Duration::from_secs(5),
                true,
                true,
            )
            .await
        });

        let result = receiver.await.unwrap();
        assert!(result.unwrap().success.is_empty());
        drop(submissions_tx);
        let _ = run.await;
    }

    #[tokio::test]
    async fn completions_follow_submission_order() {
        let (mut child, _writes, frames_tx, _closed_tx) = harness();
        let (submissions_tx, mut submissions_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut queue = std::collections::VecDeque::new();
        let broadcasters = Broadcasters::new(16);

        let mut receivers = Vec::new();
        for i in 0..4 {
            let (cmd, rx) = Command::new(format!("Call {i};"), OutputFormat::Json, 0);
            submissions_tx.send(Submission::Call(cmd)).unwrap();
            receivers.push(rx);
        }
        // The fake child answers every write with a frame as soon as it sees
        // one; order of frames sent mirrors order of writes since dispatch
        // is strictly one-at-a-time.
        for _ in 0..4 {
            frames_tx.send(Ok(empty_result())).unwrap();
        }

        let run = tokio::spawn(async move {
            run_generation(
                &mut child,
                &paths(),
                &mut queue,
                &mut submissions_rx,
                &broadcasters,
                0,
                Duration::from_secs(5),
                true,
                true,
            )
            .await
        });

        for rx in receivers {
            assert!(rx.await.unwrap().is_ok());
        }
        drop(submissions_tx);
        let _ = run.await;
    }

    #[tokio::test]
    async fn timeout_provokes_restart_and_fails_command() {
        let (mut child, _writes, _frames_tx, _closed_tx) = harness();
        let (submissions_tx, mut submissions_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut queue = std::collections::VecDeque::new();
        let broadcasters = Broadcasters::new(16);

        let (cmd, receiver) = Command::new("Start-Sleep -Seconds 3;".to_owned(), OutputFormat::Json, 0);
        submissions_tx.send(Submission::Call(cmd)).unwrap();

        let (_, outcome, _) = run_generation(
            &mut child,
            &paths(),
            &mut queue,
            &mut submissions_rx,
            &broadcasters,
            0,
            Duration::from_millis(10),
            true,
            true,
        )
        .await;

        assert!(matches!(outcome, GenerationOutcome::Restart(ShellError::Timeout(_))));
        assert!(matches!(receiver.await.unwrap(), Err(ShellError::Timeout(_))));
    }

    #[tokio::test]
    async fn stale_generation_command_fails_closed_without_writing() {
        let (mut child, mut writes_rx, _frames_tx, _closed_tx) = harness();
        let (_submissions_tx, mut submissions_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut queue = std::collections::VecDeque::new();
        let broadcasters = Broadcasters::new(16);

        let (cmd, receiver) = Command::new("1".to_owned(), OutputFormat::Json, 999);
        queue.push_back(cmd);

        let run = tokio::spawn(async move {
            run_generation(
                &mut child,
                &paths(),
                &mut queue,
                &mut submissions_rx,
                &broadcasters,
                0,
                Duration::from_secs(5),
                true,
                true,
            )
            .await
        });

        assert!(matches!(receiver.await.unwrap(), Err(ShellError::Closed)));
        assert!(writes_rx.try_recv().is_err());
        run.abort();
    }

    #[tokio::test]
    async fn destroy_while_idle_yields_shutdown_requested() {
        let (mut child, _writes, _frames_tx, _closed_tx) = harness();
        let (submissions_tx, mut submissions_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut queue = std::collections::VecDeque::new();
        let broadcasters = Broadcasters::new(16);

        let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
        submissions_tx.send(Submission::Destroy(ack_tx)).unwrap();

        let (_, outcome, leftover) = run_generation(
            &mut child,
            &paths(),
            &mut queue,
            &mut submissions_rx,
            &broadcasters,
            0,
            Duration::from_secs(5),
            true,
            true,
        )
        .await;

        assert!(matches!(outcome, GenerationOutcome::ShutdownRequested(_)));
        assert!(leftover.is_none());
        // `outcome` still owns the ack sender since nothing fired it; once
        // it is dropped here, the receiver observes a closed channel.
        drop(outcome);
        assert!(ack_rx.await.is_err());
    }
}

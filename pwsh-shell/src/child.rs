// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Spawns and owns one generation of the PowerShell child process (§4.3).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command as ProcessCommand};
use tokio_util::codec::FramedRead;

use crate::envelope::StreamsResult;
use crate::error::ShellError;
use crate::framed::FrameDecoder;

/// The async seam between the dispatcher and an actual OS process (§8).
///
/// Production code drives [`RealChild`]; tests drive an in-memory fake that
/// never spawns `pwsh`/`powershell`. Uses native AFIT, mirroring the
/// transport trait used elsewhere in this codebase — intentionally not
/// object-safe, since callers hold a concrete `C: ChildHandle`, never a
/// `dyn ChildHandle`. Methods spell out `-> impl Future<..> + Send` rather
/// than `async fn` so that generic callers (the dispatcher runs inside a
/// `tokio::spawn`ed task) can rely on the returned future being `Send`
/// without the compiler needing to prove it per call site.
pub(crate) trait ChildHandle: Send {
    /// Sends one wrapped command's script to the child's stdin.
    fn write(&mut self, script: &str) -> impl Future<Output = Result<(), ShellError>> + Send;

    /// Waits for the next complete envelope frame, or `None` once the
    /// child's stdout has closed with no further frames pending.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<StreamsResult, ShellError>>> + Send;

    /// Resolves once the child has exited, yielding its exit code and (unix
    /// only) the signal that terminated it, if any.
    fn closed(&mut self) -> impl Future<Output = (Option<i32>, Option<i32>)> + Send;

    /// Sends SIGTERM (unix only; a no-op elsewhere, since windows has no
    /// cooperative-shutdown signal) — the first, gentlest rung of the
    /// kill-escalation ladder (§4.5).
    fn request_exit(&self) -> Result<(), ShellError>;

    /// Escalates to SIGINT (unix only; a no-op elsewhere, since windows has
    /// no second rung before a hard kill).
    fn interrupt(&self) -> Result<(), ShellError>;

    /// Escalates to SIGKILL (unix) or a forceful terminate (windows) — the
    /// final rung. Takes `&mut self` (unlike the gentler rungs) since the
    /// non-unix path goes through `Child::start_kill`, which requires it.
    fn force_kill(&mut self) -> Result<(), ShellError>;

    fn pid(&self) -> Option<u32>;
}

/// A live child process plus the two temp files its wrapper script writes
/// verbose/debug output to.
pub(crate) struct RealChild {
    child: Child,
    stdin: ChildStdin,
    frames: FramedRead<tokio::process::ChildStdout, FrameDecoder>,
    verbose_path: PathBuf,
    debug_path: PathBuf,
    #[cfg(unix)]
    pid: Option<nix::unistd::Pid>,
    #[cfg(not(unix))]
    pid: Option<u32>,
}

/// Per-generation state shared by the wrapper-script builder: the head/tail
/// delimiter halves and the two temp file paths, all keyed off one random
/// hex prefix so concurrent generations (across restarts) never collide.
pub(crate) struct GenerationPaths {
    pub head: String,
    pub tail: String,
    pub verbose_path: PathBuf,
    pub debug_path: PathBuf,
}

impl GenerationPaths {
    pub(crate) fn new(tmp_dir: &Path) -> Self {
        let prefix: String = (0..8)
            .map(|_| char::from_digit(fastrand::u32(0..16), 16).unwrap())
            .collect();
        Self {
            head: format!("H{prefix}0"),
            tail: format!("T{prefix}0"),
            verbose_path: tmp_dir.join(format!("pwsh-shell-{prefix}-verbose.tmp")),
            debug_path: tmp_dir.join(format!("pwsh-shell-{prefix}-debug.tmp")),
        }
    }
}

impl RealChild {
    /// Spawns a fresh interpreter process (`-NoLogo -NoExit -Command -`),
    /// reading commands from stdin and writing exactly one envelope per
    /// command to stdout.
    pub(crate) fn spawn(exe_path: &Path, tmp_dir: &Path) -> Result<(Self, GenerationPaths), ShellError> {
        let paths = GenerationPaths::new(tmp_dir);

        let mut command = ProcessCommand::new(exe_path);
        command
            .args(["-NoLogo", "-NoExit", "-Command", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        let mut child = command
            .spawn()
            .map_err(|e| ShellError::WriteFailed(format!("failed to spawn interpreter: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShellError::WriteFailed("child stdin was not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::WriteFailed("child stdout was not piped".into()))?;

        #[cfg(unix)]
        let pid = child.id().map(|raw| nix::unistd::Pid::from_raw(raw as i32));
        #[cfg(not(unix))]
        let pid = child.id();

        let frames = FramedRead::new(stdout, FrameDecoder::new(paths.head.clone(), paths.tail.clone()));

        Ok((
            Self {
                child,
                stdin,
                frames,
                verbose_path: paths.verbose_path.clone(),
                debug_path: paths.debug_path.clone(),
                pid,
            },
            paths,
        ))
    }

}

impl ChildHandle for RealChild {
    async fn write(&mut self, script: &str) -> Result<(), ShellError> {
        self.stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| ShellError::WriteFailed(e.to_string()))?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ShellError::WriteFailed(e.to_string()))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ShellError::WriteFailed(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<StreamsResult, ShellError>> {
        use futures_core::Stream;
        use std::pin::Pin;

        let frames = &mut self.frames;
        std::future::poll_fn(|cx| Pin::new(&mut *frames).poll_next(cx))
            .await
            .map(|item| match item {
                Ok(decoded) => decoded,
                Err(io_err) => Err(ShellError::Decode(io_err.to_string())),
            })
    }

    async fn closed(&mut self) -> (Option<i32>, Option<i32>) {
        match self.child.wait().await {
            Ok(status) => {
                let code = status.code();
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    (code, status.signal())
                }
                #[cfg(not(unix))]
                {
                    (code, None)
                }
            }
            Err(_) => (None, None),
        }
    }

    #[cfg(unix)]
    fn request_exit(&self) -> Result<(), ShellError> {
        self.send_signal(nix::sys::signal::Signal::SIGTERM)
    }
    #[cfg(not(unix))]
    fn request_exit(&self) -> Result<(), ShellError> {
        Ok(())
    }

    #[cfg(unix)]
    fn interrupt(&self) -> Result<(), ShellError> {
        self.send_signal(nix::sys::signal::Signal::SIGINT)
    }
    #[cfg(not(unix))]
    fn interrupt(&self) -> Result<(), ShellError> {
        Ok(())
    }

    #[cfg(unix)]
    fn force_kill(&mut self) -> Result<(), ShellError> {
        self.send_signal(nix::sys::signal::Signal::SIGKILL)
    }
    #[cfg(not(unix))]
    fn force_kill(&mut self) -> Result<(), ShellError> {
        self.child
            .start_kill()
            .map_err(|e| ShellError::WriteFailed(format!("start_kill failed: {e}")))
    }

    fn pid(&self) -> Option<u32> {
        #[cfg(unix)]
        {
            self.pid.map(|p| p.as_raw() as u32)
        }
        #[cfg(not(unix))]
        {
            self.pid
        }
    }
}

#[cfg(unix)]
impl RealChild {
    fn send_signal(&self, signal: nix::sys::signal::Signal) -> Result<(), ShellError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        match nix::sys::signal::kill(pid, signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(ShellError::WriteFailed(format!("signal delivery failed: {e}"))),
        }
    }
}

impl Drop for RealChild {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.verbose_path);
        let _ = std::fs::remove_file(&self.debug_path);
    }
}

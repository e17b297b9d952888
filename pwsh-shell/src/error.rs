// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced to an individual command's result sink.

use std::time::Duration;

use thiserror::Error;

/// Errors that can terminate a single in-flight command.
///
/// These are local to the command that failed — they never propagate to the
/// per-stream broadcasters, which only ever carry PowerShell-level output.
#[derive(Debug, Error, Clone)]
pub enum ShellError {
    /// No envelope was received within the configured timeout. Provokes a
    /// child restart; the command that timed out is not retried.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The child exited — spontaneously, via shutdown, or mid-restart —
    /// before this command completed.
    #[error("shell closed before command completed")]
    Closed,

    /// The write of the wrapped command to the child's stdin failed.
    /// Dispatched identically to [`ShellError::Closed`].
    #[error("failed to write command to shell: {0}")]
    WriteFailed(String),

    /// The envelope bytes extracted by the framed reader were not valid JSON
    /// in the expected shape. Provokes a restart, since the reader's framing
    /// state may itself be corrupt.
    #[error("failed to decode shell envelope: {0}")]
    Decode(String),
}

impl ShellError {
    /// True for errors that should provoke a child restart (§7): `Timeout`
    /// and `Decode`. `Closed`/`WriteFailed` are already terminal for the
    /// child and do not need a second restart triggered on their account.
    pub(crate) fn provokes_restart(&self) -> bool {
        matches!(self, ShellError::Timeout(_) | ShellError::Decode(_))
    }
}

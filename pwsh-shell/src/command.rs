// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit of work the dispatcher queues and the child executes (§3).

use tokio::sync::oneshot;

use crate::envelope::StreamsResult;
use crate::error::ShellError;
use crate::format::OutputFormat;

/// One queued call: a PowerShell fragment plus where its decoded result
/// goes. Queued FIFO (§4.4) and executed one at a time — the dispatcher
/// never reorders or batches commands.
pub(crate) struct Command {
    pub(crate) fragment: String,
    pub(crate) format: OutputFormat,
    pub(crate) reply: oneshot::Sender<Result<StreamsResult, ShellError>>,
    /// The child generation this command was queued against. A command
    /// whose generation no longer matches the live child when it reaches
    /// the head of the queue was queued before a restart and is failed with
    /// [`ShellError::Closed`] rather than replayed (§3, invariant: no
    /// cross-generation replay).
    pub(crate) generation: u64,
}

impl Command {
    pub(crate) fn new(
        fragment: String,
        format: OutputFormat,
        generation: u64,
    ) -> (Self, oneshot::Receiver<Result<StreamsResult, ShellError>>) {
        let (reply, receiver) = oneshot::channel();
        (
            Self {
                fragment,
                format,
                reply,
                generation,
            },
            receiver,
        )
    }

    /// Delivers a result to the caller, ignoring a dropped receiver (the
    /// caller gave up on the `Handle` before the result arrived).
    pub(crate) fn complete(self, result: Result<StreamsResult, ShellError>) {
        let _ = self.reply.send(result);
    }
}

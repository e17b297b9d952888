// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read-only introspection snapshot for embedding layers and tests (§1a).

use crate::dispatcher::DispatcherState;

/// A point-in-time snapshot of the supervisor. Never a second RPC surface
/// — just a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellStats {
    /// Number of commands queued but not yet dispatched.
    pub queue_depth: usize,
    /// The dispatcher's current state.
    pub dispatcher_state: DispatcherState,
    /// Monotonic generation of the currently live (or most recently live) child.
    pub generation: u64,
    /// The live child's OS pid, if one is currently running.
    pub pid: Option<u32>,
}

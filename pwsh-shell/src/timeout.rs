// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Elapsed/remaining duration tracking for per-command timeouts (§4.4) and
//! kill-escalation scheduling (§4.5).

use std::time::{Duration, Instant};

/// Tracks how much of a fixed budget remains since a start point.
pub(crate) struct TimeoutManager {
    start_time: Instant,
    timeout: Duration,
}

impl TimeoutManager {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            timeout,
        }
    }

    /// Time left before `timeout`, or `Duration::ZERO` once it has elapsed.
    pub(crate) fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start_time.elapsed())
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }
}

impl std::fmt::Debug for TimeoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutManager")
            .field("elapsed", &self.elapsed())
            .field("timeout", &self.timeout)
            .field("remaining", &self.remaining())
            .finish()
    }
}

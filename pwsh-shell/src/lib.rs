// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Supervises a long-lived PowerShell interpreter child process behind a
//! structured, in-process RPC.
//!
//! Callers submit PowerShell source fragments through [`PwshShell::call`];
//! the supervisor writes each one, in arrival order, to the interpreter's
//! stdin, demultiplexes its six output streams from the framed reply on
//! stdout, and resolves the caller's [`Handle`] with a [`StreamsResult`].
//! The same six streams are also fanned out to long-lived broadcasters for
//! callers that want a live feed rather than a per-call result.
//!
//! A command that times out or whose reply cannot be decoded provokes a
//! restart: the interpreter is killed (escalating through SIGTERM, SIGINT,
//! SIGKILL on unix) and replaced, failing any other queued work with
//! [`ShellError::Closed`] rather than risk replaying it against
//! inconsistent interpreter state.

mod child;
mod command;
mod config;
mod dispatcher;
mod envelope;
mod error;
mod facade;
mod format;
mod framed;
mod lifecycle;
mod stats;
mod timeout;
mod wrapper;

pub use config::{Config, ConfigBuilder};
pub use dispatcher::DispatcherState;
pub use envelope::{StreamsResult, SuccessResult};
pub use error::ShellError;
pub use facade::{Handle, PwshShell};
pub use format::OutputFormat;
pub use stats::ShellStats;

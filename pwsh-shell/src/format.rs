// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The requested serialization of a call's `success` stream.

/// How a call's `success` stream should be serialized.
///
/// Carried inside the envelope (§3) so the framed reader does not need to
/// track any per-call state to decode a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `ConvertTo-Json -Compress` over the raw success objects. Preserves
    /// structure — the default, and the only format for which round-trip
    /// equality (§8, invariant 4) holds.
    #[default]
    Json,
    /// Each item piped through `Out-String` before JSON-compression. Useful
    /// when the caller wants PowerShell's default display formatting.
    String,
    /// The raw success array, not further serialized by the wrapper.
    None,
}

impl OutputFormat {
    /// The literal written into the wrapper script's `$format` variable, and
    /// into the envelope's `format` field before transport.
    pub(crate) fn as_wrapper_literal(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::String => "string",
            OutputFormat::None => "none",
        }
    }
}

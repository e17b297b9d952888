// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The envelope wire shape (§3, §6) and its decode into a [`StreamsResult`].

use serde::Deserialize;
use serde_json::Value;

use crate::error::ShellError;

/// The outer JSON object written to stdout between the head and tail
/// delimiters: `{ "result": { ... } }`.
#[derive(Debug, Deserialize)]
struct RawEnvelopeWrapper {
    result: RawEnvelope,
}

/// The envelope's inner fields, exactly as they arrive over the wire. Every
/// stream except `success` is always a JSON-encoded string (§4.1 step 5);
/// `success` is a JSON-encoded string for `json`/`string` format, or a raw
/// JSON array for `none`.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    success: Value,
    error: String,
    warning: String,
    verbose: String,
    debug: String,
    info: String,
    format: Option<String>,
}

/// The `success` stream, decoded according to the format the call requested.
#[derive(Debug, Clone, PartialEq)]
pub enum SuccessResult {
    /// `json` or `none` format: structured values, preserved as-is.
    Structured(Vec<Value>),
    /// `string` format: each item already rendered through `Out-String`.
    Text(Vec<String>),
}

impl SuccessResult {
    /// True if this stream produced no items.
    pub fn is_empty(&self) -> bool {
        match self {
            SuccessResult::Structured(v) => v.is_empty(),
            SuccessResult::Text(v) => v.is_empty(),
        }
    }
}

/// The fully decoded form of one envelope (§3): six ordered sequences, one
/// per PowerShell output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamsResult {
    /// The Success stream, shaped by the call's requested [`crate::OutputFormat`].
    pub success: SuccessResult,
    /// The Error stream: each item is the `Out-String` rendering of one error record.
    pub error: Vec<String>,
    /// The Warning stream.
    pub warning: Vec<String>,
    /// The Verbose stream. File-redirected by the wrapper; newline-delimited,
    /// not item-delimited (§4.1 step 3).
    pub verbose: Vec<String>,
    /// The Debug stream. Same caveat as `verbose`.
    pub debug: Vec<String>,
    /// The Information stream.
    pub info: Vec<String>,
}

fn decode_json_array_of_strings(raw: &str, field: &str) -> Result<Vec<String>, ShellError> {
    serde_json::from_str(raw)
        .map_err(|e| ShellError::Decode(format!("{field} stream: {e}")))
}

fn decode_success(value: Value, format: Option<&str>) -> Result<SuccessResult, ShellError> {
    match format {
        Some("json") => {
            let raw = value
                .as_str()
                .ok_or_else(|| ShellError::Decode("success field was not a string for json format".into()))?;
            let items: Vec<Value> = serde_json::from_str(raw)
                .map_err(|e| ShellError::Decode(format!("success stream: {e}")))?;
            Ok(SuccessResult::Structured(items))
        }
        Some("string") => {
            let raw = value
                .as_str()
                .ok_or_else(|| ShellError::Decode("success field was not a string for string format".into()))?;
            let items: Vec<String> = serde_json::from_str(raw)
                .map_err(|e| ShellError::Decode(format!("success stream: {e}")))?;
            Ok(SuccessResult::Text(items))
        }
        None => {
            let items = value
                .as_array()
                .cloned()
                .ok_or_else(|| ShellError::Decode("success field was not an array for none format".into()))?;
            Ok(SuccessResult::Structured(items))
        }
        Some(other) => Err(ShellError::Decode(format!("unrecognized success format {other:?}"))),
    }
}

/// Parse one extracted frame payload (§4.2) into a decoded [`StreamsResult`].
pub(crate) fn decode_envelope(payload: &str) -> Result<StreamsResult, ShellError> {
    let wrapper: RawEnvelopeWrapper =
        serde_json::from_str(payload).map_err(|e| ShellError::Decode(e.to_string()))?;
    let raw = wrapper.result;

    Ok(StreamsResult {
        success: decode_success(raw.success, raw.format.as_deref())?,
        error: decode_json_array_of_strings(&raw.error, "error")?,
        warning: decode_json_array_of_strings(&raw.warning, "warning")?,
        verbose: decode_json_array_of_strings(&raw.verbose, "verbose")?,
        debug: decode_json_array_of_strings(&raw.debug, "debug")?,
        info: decode_json_array_of_strings(&raw.info, "info")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_success_with_object() {
        let payload = r#"{"result":{
            "success":"[{\"DateTime\":\"Tuesday\"}]",
            "error":"[]","warning":"[]","verbose":"[]","debug":"[]","info":"[]",
            "format":"json"
        }}"#;
        let result = decode_envelope(payload).unwrap();
        match result.success {
            SuccessResult::Structured(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0]["DateTime"], "Tuesday");
            }
            _ => panic!("expected structured success"),
        }
        assert!(result.error.is_empty());
    }

    #[test]
    fn decodes_string_success() {
        let payload = r#"{"result":{
            "success":"[\"Testing Write-Output\\n\"]",
            "error":"[]","warning":"[]","verbose":"[]","debug":"[]","info":"[]",
            "format":"string"
        }}"#;
        let result = decode_envelope(payload).unwrap();
        match result.success {
            SuccessResult::Text(items) => {
                assert_eq!(items.len(), 1);
                assert!(items[0].contains("Testing Write-Output"));
            }
            _ => panic!("expected text success"),
        }
    }

    #[test]
    fn decodes_none_format_success_as_raw_array() {
        let payload = r#"{"result":{
            "success":[1,2,3],
            "error":"[]","warning":"[]","verbose":"[]","debug":"[]","info":"[]",
            "format":null
        }}"#;
        let result = decode_envelope(payload).unwrap();
        match result.success {
            SuccessResult::Structured(items) => assert_eq!(items.len(), 3),
            _ => panic!("expected structured success"),
        }
    }

    #[test]
    fn decodes_error_stream() {
        let payload = r#"{"result":{
            "success":"[]",
            "error":"[\"Testing Write-Error\\n\"]",
            "warning":"[]","verbose":"[]","debug":"[]","info":"[]",
            "format":"json"
        }}"#;
        let result = decode_envelope(payload).unwrap();
        assert!(result.success.is_empty());
        assert_eq!(result.error.len(), 1);
        assert!(result.error[0].contains("Testing Write-Error"));
    }

    #[test]
    fn malformed_envelope_is_decode_error() {
        let err = decode_envelope("not json").unwrap_err();
        assert!(matches!(err, ShellError::Decode(_)));
    }

    #[test]
    fn empty_fragment_all_streams_empty() {
        let payload = r#"{"result":{
            "success":"[]","error":"[]","warning":"[]","verbose":"[]","debug":"[]","info":"[]",
            "format":"json"
        }}"#;
        let result = decode_envelope(payload).unwrap();
        assert!(result.success.is_empty());
        assert!(result.error.is_empty());
        assert!(result.warning.is_empty());
        assert!(result.verbose.is_empty());
        assert!(result.debug.is_empty());
        assert!(result.info.is_empty());
    }
}

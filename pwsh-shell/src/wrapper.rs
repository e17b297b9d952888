// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Generates the PowerShell preamble/epilogue that runs a user fragment with
//! every output stream captured, then emits one delimited JSON envelope
//! (§4.1).

use std::path::Path;

use crate::format::OutputFormat;

/// Delimiters are fixed-width ASCII and split into two halves so the
/// generated script text never itself contains the literal sequence — a
/// parse error that echoes the wrapper source back to stdout can't fool the
/// framed reader into treating it as a frame boundary.
pub(crate) const DELIMITER_LEN: usize = 10;
const HALF_LEN: usize = DELIMITER_LEN / 2;

fn split_halves(delimiter: &str) -> (&str, &str) {
    debug_assert_eq!(delimiter.len(), DELIMITER_LEN);
    delimiter.split_at(HALF_LEN)
}

/// Escapes a string for embedding inside a PowerShell single-quoted literal.
fn escape_single_quoted(value: &str) -> String {
    value.replace('\'', "''")
}

fn path_literal(path: &Path) -> String {
    escape_single_quoted(&path.to_string_lossy())
}

/// Builds the complete PowerShell source for one call (§4.1).
///
/// `head`/`tail` must each be exactly [`DELIMITER_LEN`] ASCII bytes, stable
/// for the lifetime of the child they frame.
pub(crate) fn build_wrapper_script(
    fragment: &str,
    head: &str,
    tail: &str,
    verbose_path: &Path,
    debug_path: &Path,
    format: OutputFormat,
    collect_verbose: bool,
    collect_debug: bool,
) -> String {
    let (head_a, head_b) = split_halves(head);
    let (tail_a, tail_b) = split_halves(tail);

    let verbose_redirect = if collect_verbose {
        format!("4> '{}'", path_literal(verbose_path))
    } else {
        "4> $null".to_owned()
    };
    let debug_redirect = if collect_debug {
        format!("5> '{}'", path_literal(debug_path))
    } else {
        "5> $null".to_owned()
    };

    // `ConvertTo-Json` unwraps a single-element pipeline input to a scalar;
    // only `-InputObject @(...)` forces array output even for one item.
    let success_serialization = match format {
        OutputFormat::Json => "ConvertTo-Json -InputObject @($ov) -Compress -Depth 8".to_owned(),
        OutputFormat::String => {
            "ConvertTo-Json -Compress -InputObject @($ov | ForEach-Object { $_ | Out-String })".to_owned()
        }
        OutputFormat::None => "@($ov)".to_owned(),
    };

    format!(
        r#"
$OutputEncoding = [System.Text.Encoding]::UTF8
[Console]::OutputEncoding = [System.Text.Encoding]::UTF8

$__head_a = '{head_a}'
$__head_b = '{head_b}'
$__tail_a = '{tail_a}'
$__tail_b = '{tail_b}'
$__verbose_path = '{verbose_path}'
$__debug_path = '{debug_path}'
$__format = '{format_literal}'
$__collect_verbose = ${collect_verbose}
$__collect_debug = ${collect_debug}

$ev = $null
try {{
    $ov = Invoke-Command -NoNewScope -ScriptBlock {{ {fragment} }} -OutVariable ov -ErrorVariable ev -WarningVariable wv -InformationVariable iv {verbose_redirect} {debug_redirect}
}} catch {{
    $ev = @($ev) + $_
}} finally {{
    $verbose_lines = if ($__collect_verbose -and (Test-Path $__verbose_path)) {{
        @(Get-Content -Path $__verbose_path)
    }} else {{ @() }}
    $debug_lines = if ($__collect_debug -and (Test-Path $__debug_path)) {{
        @(Get-Content -Path $__debug_path)
    }} else {{ @() }}
    Remove-Item -Path $__verbose_path -ErrorAction SilentlyContinue
    Remove-Item -Path $__debug_path -ErrorAction SilentlyContinue

    $envelope = [ordered]@{{
        result = [ordered]@{{
            success = {success_serialization}
            error   = ConvertTo-Json -Compress -InputObject @($ev | ForEach-Object {{ $_ | Out-String }})
            warning = ConvertTo-Json -Compress -InputObject @($wv | ForEach-Object {{ $_ | Out-String }})
            verbose = ConvertTo-Json -Compress -InputObject @($verbose_lines)
            debug   = ConvertTo-Json -Compress -InputObject @($debug_lines)
            info    = ConvertTo-Json -Compress -InputObject @($iv | ForEach-Object {{ $_ | Out-String }})
            format  = {format_field}
        }}
    }}
    $__json = $envelope | ConvertTo-Json -Compress -Depth 2
    Write-Host ($__head_a + $__head_b + $__json + $__tail_a + $__tail_b)
}}
"#,
        head_a = head_a,
        head_b = head_b,
        tail_a = tail_a,
        tail_b = tail_b,
        verbose_path = path_literal(verbose_path),
        debug_path = path_literal(debug_path),
        format_literal = format.as_wrapper_literal(),
        collect_verbose = collect_verbose,
        collect_debug = collect_debug,
        fragment = fragment,
        verbose_redirect = verbose_redirect,
        debug_redirect = debug_redirect,
        success_serialization = success_serialization,
        format_field = match format {
            OutputFormat::None => "$null".to_owned(),
            other => format!("'{}'", other.as_wrapper_literal()),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_paths() -> (PathBuf, PathBuf) {
        (
            PathBuf::from("/tmp/abc123_fps_verbose.tmp"),
            PathBuf::from("/tmp/abc123_fps_debug.tmp"),
        )
    }

    #[test]
    fn script_never_contains_literal_delimiter() {
        let head = "ABCDEFGHIJ";
        let tail = "KLMNOPQRST";
        let (verbose, debug) = sample_paths();
        let script = build_wrapper_script(
            "Write-Output 1",
            head,
            tail,
            &verbose,
            &debug,
            OutputFormat::Json,
            true,
            true,
        );
        assert!(!script.contains(head));
        assert!(!script.contains(tail));
    }

    #[test]
    fn disabled_collection_redirects_to_null() {
        let (verbose, debug) = sample_paths();
        let script = build_wrapper_script(
            "1",
            "ABCDEFGHIJ",
            "KLMNOPQRST",
            &verbose,
            &debug,
            OutputFormat::Json,
            false,
            false,
        );
        assert!(script.contains("4> $null"));
        assert!(script.contains("5> $null"));
    }

    #[test]
    fn none_format_skips_json_encoding_of_success() {
        let (verbose, debug) = sample_paths();
        let script = build_wrapper_script(
            "1",
            "ABCDEFGHIJ",
            "KLMNOPQRST",
            &verbose,
            &debug,
            OutputFormat::None,
            true,
            true,
        );
        assert!(script.contains("success = @($ov)"));
        assert!(script.contains("format  = $null"));
    }

    #[test]
    fn every_stream_field_forces_array_via_input_object() {
        let (verbose, debug) = sample_paths();
        let script = build_wrapper_script(
            "1",
            "ABCDEFGHIJ",
            "KLMNOPQRST",
            &verbose,
            &debug,
            OutputFormat::String,
            true,
            true,
        );
        // Piping a single-element collection into ConvertTo-Json unwraps it
        // to a scalar; -InputObject @(...) is the only form that keeps it an
        // array for every stream, including a one-item success.
        assert!(script.contains("ConvertTo-Json -Compress -InputObject @($ov"));
        assert!(script.contains("ConvertTo-Json -Compress -InputObject @($ev"));
        assert!(script.contains("ConvertTo-Json -Compress -InputObject @($wv"));
        assert!(script.contains("ConvertTo-Json -Compress -InputObject @($verbose_lines)"));
        assert!(script.contains("ConvertTo-Json -Compress -InputObject @($debug_lines)"));
        assert!(script.contains("ConvertTo-Json -Compress -InputObject @($iv"));
        assert!(!script.contains(") | ConvertTo-Json"));
    }

    #[test]
    fn fragment_runs_without_a_new_scope() {
        let (verbose, debug) = sample_paths();
        let script = build_wrapper_script(
            "$XYZ = 'something'",
            "ABCDEFGHIJ",
            "KLMNOPQRST",
            &verbose,
            &debug,
            OutputFormat::Json,
            true,
            true,
        );
        assert!(script.contains("Invoke-Command -NoNewScope"));
    }

    #[test]
    fn embeds_user_fragment_verbatim() {
        let (verbose, debug) = sample_paths();
        let script = build_wrapper_script(
            "Get-Date;",
            "ABCDEFGHIJ",
            "KLMNOPQRST",
            &verbose,
            &debug,
            OutputFormat::Json,
            true,
            true,
        );
        assert!(script.contains("Get-Date;"));
    }
}

// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Construction-time configuration for the façade (§1a, §6).

use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 600_000;

/// Configuration for a shell supervisor instance.
///
/// Every field has a documented default, so unlike builders that require at
/// least one field to be set before they're useful, this one has no
/// required fields and `build()` cannot fail — `Config::default()` is
/// already a valid configuration.
#[derive(Debug, Clone)]
pub struct Config {
    tmp_dir: PathBuf,
    exe_path: PathBuf,
    timeout: Duration,
    verbose: bool,
    debug: bool,
}

impl Config {
    /// The directory the two scratch files are created in.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// The interpreter executable to spawn.
    pub fn exe_path(&self) -> &Path {
        &self.exe_path
    }

    /// Per-command timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the Verbose stream is collected.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Whether the Debug stream is collected.
    pub fn debug(&self) -> bool {
        self.debug
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            exe_path: default_exe_path(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            verbose: true,
            debug: true,
        }
    }
}

#[cfg(windows)]
fn default_exe_path() -> PathBuf {
    PathBuf::from("powershell")
}

#[cfg(not(windows))]
fn default_exe_path() -> PathBuf {
    PathBuf::from("pwsh")
}

/// Builder for [`Config`], mirroring this workspace's builder convention
/// even though every field is optional here.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    tmp_dir: Option<PathBuf>,
    exe_path: Option<PathBuf>,
    timeout: Option<Duration>,
    verbose: Option<bool>,
    debug: Option<bool>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(tmp_dir.into());
        self
    }

    pub fn exe_path(mut self, exe_path: impl Into<PathBuf>) -> Self {
        self.exe_path = Some(exe_path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn build(self) -> Config {
        let defaults = Config::default();
        Config {
            tmp_dir: self.tmp_dir.unwrap_or(defaults.tmp_dir),
            exe_path: self.exe_path.unwrap_or(defaults.exe_path),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            verbose: self.verbose.unwrap_or(defaults.verbose),
            debug: self.debug.unwrap_or(defaults.debug),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.timeout(), Duration::from_millis(600_000));
        assert!(config.verbose());
        assert!(config.debug());
        #[cfg(not(windows))]
        assert_eq!(config.exe_path(), Path::new("pwsh"));
    }

    #[test]
    fn builder_overrides_only_specified_fields() {
        let config = ConfigBuilder::new()
            .timeout(Duration::from_secs(2))
            .build();
        assert_eq!(config.timeout(), Duration::from_secs(2));
        assert!(config.verbose());
    }
}

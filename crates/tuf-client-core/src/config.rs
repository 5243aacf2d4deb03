//! Updater configuration and environment-driven bootstrap settings.
//!
//! [`UpdaterConfig`] holds the knobs of the verification engine (root step
//! policy, rotation ceiling, timeouts, size limits). [`TrustEnv`] derives them,
//! plus the agent's repository location, from `TUF_*` environment variables.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::metadata::RoleName;

/// Environment variable carrying the repository metadata base URL.
const ENV_METADATA_URL: &str = "TUF_METADATA_URL";
/// Environment variable pointing at the bootstrap root file.
const ENV_ROOT_PATH: &str = "TUF_ROOT_PATH";
/// Environment variable naming the cache namespace.
const ENV_NAMESPACE: &str = "TUF_NAMESPACE";
/// Environment variable pointing at the sled cache directory.
const ENV_CACHE_PATH: &str = "TUF_CACHE_PATH";
/// Per-fetch timeout in seconds.
const ENV_FETCH_TIMEOUT: &str = "TUF_FETCH_TIMEOUT_SECS";
/// Whole refresh cycle timeout in seconds.
const ENV_CYCLE_TIMEOUT: &str = "TUF_CYCLE_TIMEOUT_SECS";
/// Maximum root rotations walked per cycle.
const ENV_MAX_ROOT_ROTATIONS: &str = "TUF_MAX_ROOT_ROTATIONS";
/// Root version step policy (`exact` or `monotonic`).
const ENV_ROOT_VERSION_STEP: &str = "TUF_ROOT_VERSION_STEP";
/// Agent refresh interval in seconds.
const ENV_REFRESH_INTERVAL: &str = "TUF_REFRESH_INTERVAL_SECS";
/// Log level for the agent's subscriber.
const ENV_LOG_LEVEL: &str = "TUF_LOG_LEVEL";
/// Allows `http://` repository URLs.
const ENV_ALLOW_PLAINTEXT: &str = "TUF_ALLOW_PLAINTEXT";

/// Default cache namespace.
pub const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ROOT_ROTATIONS: u32 = 32;
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_LOG_LEVEL: &str = "info";

/// How far a rotated root's version may advance past the trusted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootVersionStep {
    /// `N.root.json` must carry exactly version `N`.
    #[default]
    Exact,
    /// Any version greater than the trusted one is accepted.
    Monotonic,
}

impl RootVersionStep {
    /// Returns whether moving from `trusted` to `candidate` is permitted.
    pub fn permits(self, trusted: u64, candidate: u64) -> bool {
        match self {
            RootVersionStep::Exact => trusted.checked_add(1) == Some(candidate),
            RootVersionStep::Monotonic => candidate > trusted,
        }
    }
}

impl fmt::Display for RootVersionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootVersionStep::Exact => f.write_str("exact"),
            RootVersionStep::Monotonic => f.write_str("monotonic"),
        }
    }
}

impl FromStr for RootVersionStep {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(RootVersionStep::Exact),
            "monotonic" => Ok(RootVersionStep::Monotonic),
            other => Err(format!("unknown root version step '{other}'")),
        }
    }
}

/// Upper bounds on metadata sizes used when no pinned length is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxLengths {
    pub root: u64,
    pub timestamp: u64,
    pub snapshot: u64,
    pub targets: u64,
}

impl MaxLengths {
    /// Returns the limit for `role`.
    pub fn for_role(&self, role: RoleName) -> u64 {
        match role {
            RoleName::Root => self.root,
            RoleName::Timestamp => self.timestamp,
            RoleName::Snapshot => self.snapshot,
            RoleName::Targets => self.targets,
        }
    }
}

impl Default for MaxLengths {
    fn default() -> Self {
        Self {
            root: 512 * 1024,
            timestamp: 16 * 1024,
            snapshot: 2 * 1024 * 1024,
            targets: 5 * 1024 * 1024,
        }
    }
}

/// Knobs of the metadata update engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Version step accepted between consecutive roots.
    pub root_version_step: RootVersionStep,
    /// Maximum number of root rotations walked in one cycle.
    pub max_root_rotations: u32,
    /// Timeout applied to each metadata fetch.
    pub fetch_timeout: Duration,
    /// Timeout applied to a whole refresh cycle.
    pub cycle_timeout: Duration,
    /// Size limits for unpinned fetches.
    pub max_lengths: MaxLengths,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            root_version_step: RootVersionStep::default(),
            max_root_rotations: DEFAULT_MAX_ROOT_ROTATIONS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
            max_lengths: MaxLengths::default(),
        }
    }
}

/// Configuration of a [`crate::TrustClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Prefix for every cache key written by the client.
    pub namespace: String,
    pub updater: UpdaterConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            updater: UpdaterConfig::default(),
        }
    }
}

/// Captures environment-derived options used to bootstrap a trust client.
#[derive(Debug, Clone)]
pub struct TrustEnv {
    /// Base URL of the repository's metadata directory.
    pub metadata_url: Option<String>,
    /// Path of the bootstrap root metadata file.
    pub root_path: Option<PathBuf>,
    /// Cache namespace. Defaults to `default`.
    pub namespace: String,
    /// Directory of the persistent cache; `None` keeps metadata in memory.
    pub cache_path: Option<PathBuf>,
    pub fetch_timeout: Duration,
    pub cycle_timeout: Duration,
    pub max_root_rotations: u32,
    pub root_version_step: RootVersionStep,
    /// Interval between agent refresh cycles.
    pub refresh_interval: Duration,
    /// Log level for the agent's subscriber.
    pub log_level: String,
    /// When `true`, `http://` repository URLs are accepted.
    pub allow_plaintext: bool,
}

impl TrustEnv {
    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| map.get(key).and_then(|value| sanitize_non_empty(value));

        Self {
            metadata_url: get(ENV_METADATA_URL),
            root_path: get(ENV_ROOT_PATH).map(PathBuf::from),
            namespace: get(ENV_NAMESPACE).unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            cache_path: get(ENV_CACHE_PATH).map(PathBuf::from),
            fetch_timeout: parse_secs(get(ENV_FETCH_TIMEOUT), DEFAULT_FETCH_TIMEOUT),
            cycle_timeout: parse_secs(get(ENV_CYCLE_TIMEOUT), DEFAULT_CYCLE_TIMEOUT),
            max_root_rotations: get(ENV_MAX_ROOT_ROTATIONS)
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_ROOT_ROTATIONS),
            root_version_step: get(ENV_ROOT_VERSION_STEP)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            refresh_interval: parse_secs(get(ENV_REFRESH_INTERVAL), DEFAULT_REFRESH_INTERVAL),
            log_level: get(ENV_LOG_LEVEL)
                .map(|v| v.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            allow_plaintext: parse_bool(get(ENV_ALLOW_PLAINTEXT).as_deref(), false),
        }
    }

    /// Builds the engine configuration from the captured settings.
    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            root_version_step: self.root_version_step,
            max_root_rotations: self.max_root_rotations,
            fetch_timeout: self.fetch_timeout,
            cycle_timeout: self.cycle_timeout,
            max_lengths: MaxLengths::default(),
        }
    }

    /// Builds the client configuration from the captured settings.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            namespace: self.namespace.clone(),
            updater: self.updater_config(),
        }
    }
}

/// Helper trimming whitespace and discarding empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses a positive number of seconds, falling back to `default`.
fn parse_secs(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Parses boolean values from strings, falling back to the provided default.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Defaults apply when the environment is empty.
    #[test]
    fn trust_env_defaults() {
        let env = TrustEnv::from_env_iter::<Vec<(String, String)>, _, _>(vec![]);
        assert!(env.metadata_url.is_none());
        assert!(env.root_path.is_none());
        assert!(env.cache_path.is_none());
        assert_eq!(env.namespace, DEFAULT_NAMESPACE);
        assert_eq!(env.fetch_timeout, Duration::from_secs(10));
        assert_eq!(env.cycle_timeout, Duration::from_secs(60));
        assert_eq!(env.max_root_rotations, 32);
        assert_eq!(env.root_version_step, RootVersionStep::Exact);
        assert_eq!(env.refresh_interval, Duration::from_secs(300));
        assert_eq!(env.log_level, "info");
        assert!(!env.allow_plaintext);
        assert_eq!(env.updater_config(), UpdaterConfig::default());
    }

    /// Explicit values override defaults after trimming.
    #[test]
    fn trust_env_honours_overrides() {
        let env = TrustEnv::from_env_iter([
            (ENV_METADATA_URL, " https://tuf.example.com/metadata "),
            (ENV_ROOT_PATH, "/etc/tuf/root.json"),
            (ENV_NAMESPACE, "sigstore"),
            (ENV_CACHE_PATH, "/var/cache/tuf"),
            (ENV_FETCH_TIMEOUT, "3"),
            (ENV_CYCLE_TIMEOUT, "30"),
            (ENV_MAX_ROOT_ROTATIONS, "4"),
            (ENV_ROOT_VERSION_STEP, "Monotonic"),
            (ENV_REFRESH_INTERVAL, "60"),
            (ENV_LOG_LEVEL, "DEBUG"),
            (ENV_ALLOW_PLAINTEXT, "yes"),
        ]);
        assert_eq!(env.metadata_url.as_deref(), Some("https://tuf.example.com/metadata"));
        assert_eq!(env.root_path, Some(PathBuf::from("/etc/tuf/root.json")));
        assert_eq!(env.cache_path, Some(PathBuf::from("/var/cache/tuf")));
        assert_eq!(env.log_level, "debug");
        assert!(env.allow_plaintext);

        let config = env.client_config();
        assert_eq!(config.namespace, "sigstore");
        assert_eq!(config.updater.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.updater.cycle_timeout, Duration::from_secs(30));
        assert_eq!(config.updater.max_root_rotations, 4);
        assert_eq!(config.updater.root_version_step, RootVersionStep::Monotonic);
        assert_eq!(env.refresh_interval, Duration::from_secs(60));
    }

    /// Unparseable or blank values fall back to defaults.
    #[test]
    fn trust_env_ignores_invalid_values() {
        let env = TrustEnv::from_env_iter([
            (ENV_NAMESPACE, "   "),
            (ENV_FETCH_TIMEOUT, "soon"),
            (ENV_CYCLE_TIMEOUT, "0"),
            (ENV_MAX_ROOT_ROTATIONS, "-1"),
            (ENV_ROOT_VERSION_STEP, "sometimes"),
        ]);
        assert_eq!(env.namespace, DEFAULT_NAMESPACE);
        assert_eq!(env.fetch_timeout, DEFAULT_FETCH_TIMEOUT);
        assert_eq!(env.cycle_timeout, DEFAULT_CYCLE_TIMEOUT);
        assert_eq!(env.max_root_rotations, DEFAULT_MAX_ROOT_ROTATIONS);
        assert_eq!(env.root_version_step, RootVersionStep::Exact);
    }

    /// The exact policy only allows +1 while monotonic allows any increase.
    #[test]
    fn root_version_step_policies() {
        assert!(RootVersionStep::Exact.permits(1, 2));
        assert!(!RootVersionStep::Exact.permits(1, 3));
        assert!(!RootVersionStep::Exact.permits(2, 2));
        assert!(!RootVersionStep::Exact.permits(u64::MAX, 0));
        assert!(RootVersionStep::Monotonic.permits(1, 5));
        assert!(!RootVersionStep::Monotonic.permits(3, 3));
    }

    /// Boolean parsing honours common truthy/falsy spellings.
    #[test]
    fn parse_bool_permits_common_variants() {
        assert!(parse_bool(Some("true"), false));
        assert!(parse_bool(Some("Y"), false));
        assert!(!parse_bool(Some("0"), true));
        assert!(parse_bool(Some("maybe"), true));
    }

    /// Each role has its own unpinned size limit.
    #[test]
    fn max_lengths_per_role() {
        let limits = MaxLengths::default();
        assert_eq!(limits.for_role(RoleName::Timestamp), 16 * 1024);
        assert_eq!(limits.for_role(RoleName::Targets), 5 * 1024 * 1024);
    }
}

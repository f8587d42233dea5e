//! Plugin configuration.
//!
//! Loaded from a YAML file. Cache location and lifetime fall back to the
//! command line values when the file leaves them out.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/opkssh-plugin-google-workspace/config.yaml";
/// Default cache file location.
pub const DEFAULT_CACHE_PATH: &str = "/var/cache/opkssh-plugin-google-workspace/cache.json";
/// Default log sink.
pub const DEFAULT_LOG_PATH: &str = "/var/log/opkssh-plugin-google-workspace.log";
/// Default cache lifetime.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(15 * 60);

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for this schema
    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        /// Config file path
        path: PathBuf,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl {
        /// Offending field
        field: String,
        /// Parser message
        reason: String,
    },

    /// Invalid duration value
    #[error("Invalid duration for {field}: {reason}")]
    InvalidDuration {
        /// Offending field
        field: String,
        /// Parser message
        reason: String,
    },

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// OAuth application the identity tokens are issued for.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Expected audience of incoming identities
    pub client_id: String,
}

/// Service account used for directory lookups.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceAccountConfig {
    /// Service account email, informational
    pub email: String,
    /// JSON key file; relative paths resolve against the config directory
    pub key_file: PathBuf,
}

/// Google Workspace tenant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory customer id, the cache namespace
    pub customer_id: String,
}

/// Google section of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// OAuth application
    pub oauth: OAuthConfig,
    /// Service account
    pub service_account: ServiceAccountConfig,
    /// Workspace tenant
    pub workspace: WorkspaceConfig,
    /// Admin SDK base URL override
    pub directory_url: Option<String>,
}

/// Access rules for one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrincipalPolicy {
    /// Emails allowed directly
    pub users: Vec<String>,
    /// Groups whose members are allowed, checked in order
    pub groups: Vec<String>,
}

/// Principal (local account) to its access rules.
pub type Policy = BTreeMap<String, PrincipalPolicy>;

/// Resolved cache location and lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Cache file path
    pub path: PathBuf,
    /// Entries older than this are refetched
    pub ttl: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheSection {
    path: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_duration")]
    duration: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    google: GoogleConfig,
    #[serde(default)]
    policy: Policy,
    #[serde(default)]
    cache: CacheSection,
}

/// Fully resolved plugin configuration.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Absolute path the configuration was read from
    pub path: PathBuf,
    /// Google settings with `key_file` made absolute
    pub google: GoogleConfig,
    /// Access policy
    pub policy: Policy,
    /// Cache settings after defaults
    pub cache: CacheSettings,
    /// Admin SDK base URL
    pub directory_url: Url,
}

impl PluginConfig {
    /// Loads the configuration file, filling cache settings from the given
    /// defaults when the file omits them.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(
        path: impl AsRef<Path>,
        default_cache_path: impl Into<PathBuf>,
        default_cache_duration: Duration,
    ) -> Result<Self, ConfigError> {
        let path = std::path::absolute(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "read config file");
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        Self::from_yaml(&raw, path, default_cache_path.into(), default_cache_duration)
    }

    /// Builds a configuration from YAML text as if read from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or validated.
    pub fn from_yaml(
        raw: &str,
        path: PathBuf,
        default_cache_path: PathBuf,
        default_cache_duration: Duration,
    ) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "parse config file");
        let RawConfig {
            mut google,
            policy,
            cache,
        } = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        if google.service_account.key_file.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired(
                "google.service_account.key_file".to_string(),
            ));
        }
        if google.service_account.key_file.is_relative() {
            if let Some(dir) = path.parent() {
                google.service_account.key_file = dir.join(&google.service_account.key_file);
            }
        }

        let url = google
            .directory_url
            .as_deref()
            .unwrap_or(crate::directory::google::DEFAULT_DIRECTORY_URL);
        let directory_url = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
            field: "google.directory_url".to_string(),
            reason: e.to_string(),
        })?;

        let config = Self {
            path,
            google,
            policy,
            cache: CacheSettings {
                path: cache.path.unwrap_or(default_cache_path),
                ttl: cache.duration.unwrap_or(default_cache_duration),
            },
            directory_url,
        };
        config.validate()?;

        debug!(principals = config.policy.len(), "load config file completed");
        Ok(config)
    }

    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.google.oauth.client_id.is_empty() {
            return Err(ConfigError::MissingRequired("google.oauth.client_id".to_string()));
        }
        if self.google.workspace.customer_id.is_empty() {
            return Err(ConfigError::MissingRequired(
                "google.workspace.customer_id".to_string(),
            ));
        }
        if self.cache.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired("cache.path".to_string()));
        }
        Ok(())
    }

    /// Service account key file location.
    #[must_use]
    pub fn key_file(&self) -> &Path {
        &self.google.service_account.key_file
    }
}

/// Parses a Go-style duration such as `90s`, `15m`, `1h30m` or `1.5h`.
///
/// # Errors
///
/// Returns a message describing the first malformed component.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    const NANOS_PER_SEC: u128 = 1_000_000_000;

    let text = input.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total: u128 = 0;
    let mut rest = text;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        let (number, tail) = rest.split_at(number_end);
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            other => return Err(format!("unknown unit {other:?} in duration {input:?}")),
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(format!("invalid duration {input:?}"));
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| format!("invalid duration {input:?}"))?
        };

        let mut nanos = whole
            .checked_mul(unit_nanos)
            .ok_or_else(|| format!("duration {input:?} overflows"))?;
        let mut scale = unit_nanos;
        for digit in fraction.chars() {
            let digit = digit
                .to_digit(10)
                .ok_or_else(|| format!("invalid duration {input:?}"))?;
            scale /= 10;
            nanos += u128::from(digit) * scale;
        }

        total = total
            .checked_add(nanos)
            .ok_or_else(|| format!("duration {input:?} overflows"))?;
        rest = next;
    }

    u64::try_from(total)
        .map(Duration::from_nanos)
        .map_err(|_| format!("duration {input:?} overflows"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|text| parse_duration(&text).map_err(serde::de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
google:
  oauth:
    client_id: 1234.apps.googleusercontent.com
  service_account:
    email: authz@project.iam.gserviceaccount.com
    key_file: key.json
  workspace:
    customer_id: C0123
policy:
  alice:
    users: [z@example.com, a@example.com]
    groups: [eng@example.com]
";

    fn load(raw: &str) -> Result<PluginConfig, ConfigError> {
        PluginConfig::from_yaml(
            raw,
            PathBuf::from("/etc/plugin/config.yaml"),
            PathBuf::from(DEFAULT_CACHE_PATH),
            DEFAULT_CACHE_DURATION,
        )
    }

    #[test]
    fn test_relative_key_file_resolves_against_config_dir() {
        let config = load(MINIMAL).unwrap();
        assert_eq!(config.key_file(), Path::new("/etc/plugin/key.json"));
    }

    #[test]
    fn test_absolute_key_file_kept() {
        let raw = MINIMAL.replace("key_file: key.json", "key_file: /secrets/key.json");
        let config = load(&raw).unwrap();
        assert_eq!(config.key_file(), Path::new("/secrets/key.json"));
    }

    #[test]
    fn test_cache_defaults_apply() {
        let config = load(MINIMAL).unwrap();
        assert_eq!(config.cache.path, PathBuf::from(DEFAULT_CACHE_PATH));
        assert_eq!(config.cache.ttl, DEFAULT_CACHE_DURATION);
        assert_eq!(config.directory_url.as_str(), "https://admin.googleapis.com/");
    }

    #[test]
    fn test_cache_section_overrides_defaults() {
        let raw = format!("{MINIMAL}cache:\n  path: /tmp/cache.json\n  duration: 1h30m\n");
        let config = load(&raw).unwrap();
        assert_eq!(config.cache.path, PathBuf::from("/tmp/cache.json"));
        assert_eq!(config.cache.ttl, Duration::from_secs(5400));
    }

    #[test]
    fn test_policy_lists_keep_file_order() {
        let config = load(MINIMAL).unwrap();
        let alice = &config.policy["alice"];
        assert_eq!(alice.users, vec!["z@example.com", "a@example.com"]);
        assert_eq!(alice.groups, vec!["eng@example.com"]);
    }

    #[test]
    fn test_missing_client_id_rejected() {
        let raw = MINIMAL.replace("client_id: 1234.apps.googleusercontent.com", "client_id: ''");
        assert!(matches!(load(&raw), Err(ConfigError::MissingRequired(field)) if field == "google.oauth.client_id"));
    }

    #[test]
    fn test_missing_google_section_is_parse_error() {
        assert!(matches!(load("policy: {}\n"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_directory_url() {
        let raw = MINIMAL.replace("  workspace:", "  directory_url: not a url\n  workspace:");
        assert!(matches!(load(&raw), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_invalid_cache_duration() {
        let raw = format!("{MINIMAL}cache:\n  duration: fortnight\n");
        assert!(matches!(load(&raw), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("-5m").is_err());
        assert!(parse_duration("1.2.3s").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = PluginConfig::load(
            "/nonexistent/config.yaml",
            DEFAULT_CACHE_PATH,
            DEFAULT_CACHE_DURATION,
        );
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}

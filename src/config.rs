//! Backup configuration: defaults, INI file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Section read from the config file.
pub const CONFIG_SECTION: &str = "sharepoint_backup";

/// Config file used when no path is given and it exists.
pub const DEFAULT_CONFIG_FILE: &str = "config.ini";

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SHAREPOINT_BACKUP_CONFIG";

/// Name of the sample written by `init`.
pub const SAMPLE_CONFIG_FILE: &str = "config.ini.sample";

/// Keys accepted for compatibility but no longer used.
const IGNORED_KEYS: [&str; 2] = ["MAX_FILES_PER_SESSION", "PROGRESS_SAVE_INTERVAL"];

/// Sample configuration with every key at its default.
pub const SAMPLE_CONFIG: &str = "[sharepoint_backup]
# Output directory for downloaded files
OUTPUT_DIR = ./sharepoint_backup

# CSV file listing SharePoint sites (SiteName,SiteURL)
CSV_PATH = ./sharepoint_sites.csv

# Credentials file (CLIENT_ID, CLIENT_SECRET, TENANT_ID)
CREDENTIALS_PATH = ./credentials.txt

# Directory for log files
LOG_DIR = ./logs

# SQLite progress database
DB_PATH = ./progress.db

# Concurrent download workers per library
NUM_THREADS = 5

# Attempts per file before it is marked failed
MAX_RETRY = 3

# Work queue holds twice this many files
BATCH_SIZE = 1000

# Base delay in seconds after API, throttling or auth errors
API_RETRY_DELAY = 30

# Base delay in seconds after other transient errors
RETRY_DELAY = 2

# Token refresh interval in seconds (45 minutes)
TOKEN_REFRESH_INTERVAL = 2700

# Database backup interval in seconds
DB_BACKUP_INTERVAL = 600

# Full re-authentication after this many sites (0 disables)
REAUTH_EVERY_SITES = 5

# Items requested per folder listing page
PAGE_SIZE = 100

# Logging level (DEBUG, INFO, WARNING, ERROR)
LOG_LEVEL = INFO

# Enable debug logging
DEBUG_MODE = false
";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly named config file does not exist.
    #[error("config file not found: {path}")]
    MissingFile {
        /// Path that was named.
        path: PathBuf,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A line is neither a section, a comment nor `KEY = value`.
    #[error("invalid config syntax on line {line}: expected KEY = value")]
    Syntax {
        /// 1-based line number.
        line: usize,
    },

    /// The key is not recognised.
    #[error("unknown configuration key '{key}' on line {line}")]
    UnknownKey {
        /// Key as written.
        key: String,
        /// 1-based line number.
        line: usize,
    },

    /// A value does not parse or is out of range.
    #[error("invalid value for {key}: '{value}'. Expected {expected}")]
    InvalidValue {
        /// Key or environment variable name.
        key: String,
        /// Raw value.
        value: String,
        /// What was expected.
        expected: &'static str,
    },
}

/// Resolved backup configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupConfig {
    pub output_dir: PathBuf,
    pub csv_path: PathBuf,
    pub credentials_path: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    /// Download workers per library (1..=64).
    pub num_threads: usize,
    /// Attempts per file (1..=20).
    pub max_retry: u32,
    /// Queue capacity is twice this.
    pub batch_size: usize,
    pub api_retry_delay: Duration,
    pub retry_delay: Duration,
    pub token_refresh_interval: Duration,
    pub db_backup_interval: Duration,
    /// 0 disables periodic re-authentication.
    pub reauth_every_sites: usize,
    pub page_size: u32,
    pub log_level: String,
    pub debug_mode: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./sharepoint_backup"),
            csv_path: PathBuf::from("./sharepoint_sites.csv"),
            credentials_path: PathBuf::from("./credentials.txt"),
            log_dir: PathBuf::from("./logs"),
            db_path: PathBuf::from("./progress.db"),
            num_threads: 5,
            max_retry: 3,
            batch_size: 1000,
            api_retry_delay: Duration::from_secs(30),
            retry_delay: Duration::from_secs(2),
            token_refresh_interval: Duration::from_secs(2700),
            db_backup_interval: Duration::from_secs(600),
            reauth_every_sites: 5,
            page_size: 100,
            log_level: "INFO".to_string(),
            debug_mode: false,
        }
    }
}

/// Config keys with their environment variable.
const ENV_KEYS: [(&str, &str); 16] = [
    ("OUTPUT_DIR", "SHAREPOINT_OUTPUT_DIR"),
    ("CSV_PATH", "SHAREPOINT_CSV_PATH"),
    ("CREDENTIALS_PATH", "SHAREPOINT_CREDS_PATH"),
    ("LOG_DIR", "SHAREPOINT_LOG_DIR"),
    ("DB_PATH", "SHAREPOINT_DB_PATH"),
    ("NUM_THREADS", "SHAREPOINT_THREADS"),
    ("MAX_RETRY", "SHAREPOINT_MAX_RETRY"),
    ("BATCH_SIZE", "SHAREPOINT_BATCH_SIZE"),
    ("API_RETRY_DELAY", "SHAREPOINT_API_DELAY"),
    ("RETRY_DELAY", "SHAREPOINT_RETRY_DELAY"),
    ("TOKEN_REFRESH_INTERVAL", "SHAREPOINT_TOKEN_REFRESH"),
    ("DB_BACKUP_INTERVAL", "SHAREPOINT_DB_BACKUP_INTERVAL"),
    ("REAUTH_EVERY_SITES", "SHAREPOINT_REAUTH_SITES"),
    ("PAGE_SIZE", "SHAREPOINT_PAGE_SIZE"),
    ("LOG_LEVEL", "SHAREPOINT_LOG_LEVEL"),
    ("DEBUG_MODE", "SHAREPOINT_DEBUG"),
];

fn invalid(key: &str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected,
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| invalid(key, value, "a non-negative integer"))
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_number::<u64>(key, value).map(Duration::from_secs)
}

fn parse_boolean(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(invalid(key, value, "true or false")),
    }
}

fn strip_inline_comment(line: &str) -> &str {
    // Only ` #` and ` ;` start an inline comment so paths keep their characters.
    [" #", " ;"]
        .iter()
        .filter_map(|marker| line.find(marker))
        .min()
        .map_or(line, |index| &line[..index])
}

impl BackupConfig {
    /// Loads configuration.
    ///
    /// Path priority: `explicit`, then `SHAREPOINT_BACKUP_CONFIG`, then
    /// `./config.ini` when it exists. Environment variables override file
    /// values. Returns the config and the file that was read, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing named file, bad syntax, an
    /// unknown key or an invalid value.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let path = match named {
            Some(path) if !path.exists() => return Err(ConfigError::MissingFile { path }),
            Some(path) => Some(path),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            }
        };

        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        debug!(?path, "configuration loaded");
        Ok((config, path))
    }

    /// Reads a config file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if reading or parsing fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Parses INI text over the defaults.
    ///
    /// Keys before any section header or under `[sharepoint_backup]` apply;
    /// other sections are ignored. Keys are case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for bad syntax, unknown keys or bad values.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut in_section = true;

        for (index, raw_line) in raw.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                in_section = section.trim().eq_ignore_ascii_case(CONFIG_SECTION);
                continue;
            }
            if !in_section {
                continue;
            }

            let line = strip_inline_comment(line);
            let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
                return Err(ConfigError::Syntax { line: line_no });
            };
            let key = key.trim().to_ascii_uppercase();
            if IGNORED_KEYS.contains(&key.as_str()) {
                continue;
            }
            if !config.set(&key, value.trim())? {
                return Err(ConfigError::UnknownKey { key, line: line_no });
            }
        }
        Ok(config)
    }

    /// Applies environment overrides through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the variable.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        for (key, env_name) in ENV_KEYS {
            let Some(value) = lookup(env_name) else {
                continue;
            };
            self.set(key, value.trim()).map_err(|e| match e {
                ConfigError::InvalidValue {
                    value, expected, ..
                } => ConfigError::InvalidValue {
                    key: env_name.to_string(),
                    value,
                    expected,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    /// Sets one key; returns false for an unknown key.
    fn set(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "OUTPUT_DIR" => self.output_dir = PathBuf::from(value),
            "CSV_PATH" => self.csv_path = PathBuf::from(value),
            "CREDENTIALS_PATH" => self.credentials_path = PathBuf::from(value),
            "LOG_DIR" => self.log_dir = PathBuf::from(value),
            "DB_PATH" => self.db_path = PathBuf::from(value),
            "NUM_THREADS" => self.num_threads = parse_number(key, value)?,
            "MAX_RETRY" => self.max_retry = parse_number(key, value)?,
            "BATCH_SIZE" => self.batch_size = parse_number(key, value)?,
            "API_RETRY_DELAY" => self.api_retry_delay = parse_seconds(key, value)?,
            "RETRY_DELAY" => self.retry_delay = parse_seconds(key, value)?,
            "TOKEN_REFRESH_INTERVAL" => self.token_refresh_interval = parse_seconds(key, value)?,
            "DB_BACKUP_INTERVAL" => self.db_backup_interval = parse_seconds(key, value)?,
            "REAUTH_EVERY_SITES" => self.reauth_every_sites = parse_number(key, value)?,
            "PAGE_SIZE" => self.page_size = parse_number(key, value)?,
            "LOG_LEVEL" => self.log_level = value.to_ascii_uppercase(),
            "DEBUG_MODE" => self.debug_mode = parse_boolean(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=64).contains(&self.num_threads) {
            return Err(invalid("NUM_THREADS", &self.num_threads.to_string(), "1..=64"));
        }
        if !(1..=20).contains(&self.max_retry) {
            return Err(invalid("MAX_RETRY", &self.max_retry.to_string(), "1..=20"));
        }
        if !(1..=100_000).contains(&self.batch_size) {
            return Err(invalid("BATCH_SIZE", &self.batch_size.to_string(), "1..=100000"));
        }
        if !(1..=999).contains(&self.page_size) {
            return Err(invalid("PAGE_SIZE", &self.page_size.to_string(), "1..=999"));
        }
        if self.token_refresh_interval.is_zero() {
            return Err(invalid("TOKEN_REFRESH_INTERVAL", "0", "at least 1 second"));
        }
        if !matches!(
            self.log_level.as_str(),
            "TRACE" | "DEBUG" | "INFO" | "WARNING" | "WARN" | "ERROR" | "CRITICAL"
        ) {
            return Err(invalid(
                "LOG_LEVEL",
                &self.log_level,
                "one of DEBUG, INFO, WARNING, ERROR, CRITICAL",
            ));
        }
        Ok(())
    }

    /// Work queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.batch_size.saturating_mul(2)
    }

    /// Config log level as a `tracing` filter directive.
    #[must_use]
    pub fn log_directive(&self) -> &'static str {
        if self.debug_mode {
            return "debug";
        }
        match self.log_level.as_str() {
            "TRACE" => "trace",
            "DEBUG" => "debug",
            "WARNING" | "WARN" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }
}

/// Writes [`SAMPLE_CONFIG`] into `dir`.
///
/// # Errors
///
/// Returns the IO error if the file cannot be written.
pub fn write_sample_config(dir: &Path) -> std::io::Result<PathBuf> {
    let path = dir.join(SAMPLE_CONFIG_FILE);
    std::fs::write(&path, SAMPLE_CONFIG)?;
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_sample_config_parses_to_defaults() {
        let parsed = BackupConfig::parse(SAMPLE_CONFIG).unwrap();
        assert_eq!(parsed, BackupConfig::default());
    }

    #[test]
    fn test_parse_overrides_and_ignores_other_sections() {
        let raw = "[other]\nNUM_THREADS = 99\n\n[sharepoint_backup]\nnum_threads = 8\nMAX_RETRY: 4\nDEBUG_MODE = False\nOUTPUT_DIR = /mnt/backup # mirror\n";
        let config = BackupConfig::parse(raw).unwrap();
        assert_eq!(config.num_threads, 8);
        assert_eq!(config.max_retry, 4);
        assert!(!config.debug_mode);
        assert_eq!(config.output_dir, PathBuf::from("/mnt/backup"));
    }

    #[test]
    fn test_parse_accepts_legacy_keys() {
        let raw = "[sharepoint_backup]\nMAX_FILES_PER_SESSION = 5000\nPROGRESS_SAVE_INTERVAL = 300\n";
        assert!(BackupConfig::parse(raw).is_ok());
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        let err = BackupConfig::parse("[sharepoint_backup]\nTHREADZ = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_bad_number() {
        let err = BackupConfig::parse("[sharepoint_backup]\nMAX_RETRY = many\n").unwrap_err();
        assert!(err.to_string().contains("MAX_RETRY"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = BackupConfig::parse("[sharepoint_backup]\nNUM_THREADS = 8\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("SHAREPOINT_THREADS", "12"),
            ("SHAREPOINT_API_DELAY", "5"),
            ("SHAREPOINT_DEBUG", "yes"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env(|name| env.get(name).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.num_threads, 12);
        assert_eq!(config.api_retry_delay, Duration::from_secs(5));
        assert!(config.debug_mode);
        assert_eq!(config.log_directive(), "debug");
    }

    #[test]
    fn test_env_error_names_variable() {
        let mut config = BackupConfig::default();
        let err = config
            .apply_env(|name| (name == "SHAREPOINT_MAX_RETRY").then(|| "x".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SHAREPOINT_MAX_RETRY"));
    }

    #[test]
    fn test_validate_ranges() {
        let config = BackupConfig {
            num_threads: 0,
            ..BackupConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("NUM_THREADS"));

        let config = BackupConfig {
            max_retry: 21,
            ..BackupConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("MAX_RETRY"));
    }

    #[test]
    fn test_queue_capacity_is_twice_batch() {
        assert_eq!(BackupConfig::default().queue_capacity(), 2000);
    }

    #[test]
    fn test_log_directive_mapping() {
        let config = BackupConfig {
            log_level: "WARNING".to_string(),
            ..BackupConfig::default()
        };
        assert_eq!(config.log_directive(), "warn");
    }
}

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as number: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Destination
    pub pds_url: String,
    pub handle: String,
    pub password: String,

    // Archive
    pub archive_root: Option<PathBuf>,

    // Resume state
    pub checkpoint_path: PathBuf,
    pub ledger_path: PathBuf,

    // Pacing and retries
    pub post_interval: Duration,
    pub max_retries: u32,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
    pub video_timeout: Duration,

    // Content policy
    pub media_policy: MediaPolicy,
    pub max_quote_depth: usize,
    pub timestamp_addendum: bool,
    pub backdate_posts: bool,
}

/// What to do with a post whose media cannot be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPolicy {
    /// Drop the failing attachment and publish the rest
    Degrade,
    /// Skip the whole post
    Skip,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Destination
            pds_url: env_or_default("BLUESKY_PDS_URL", "https://bsky.social")
                .trim_end_matches('/')
                .to_string(),
            handle: required_env("BLUESKY_HANDLE")?,
            password: required_env("BLUESKY_PASSWORD")?,

            // Archive
            archive_root: optional_env("TWITTER_DATA_ROOT_FOLDER").map(PathBuf::from),

            // Resume state
            checkpoint_path: PathBuf::from(env_or_default(
                "CHECKPOINT_PATH",
                "last_processed_timestamp.txt",
            )),
            ledger_path: PathBuf::from(env_or_default("LEDGER_PATH", "published_posts.jsonl")),

            // Pacing and retries
            post_interval: parse_env_secs_f64("SLEEP_INTERVAL_SECONDS", 60.0)?,
            max_retries: parse_env_u32("MAX_RETRIES", 3)?,
            max_backoff: Duration::from_secs(parse_env_u64("MAX_BACKOFF_SECS", 900)?),
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),
            video_timeout: Duration::from_secs(parse_env_u64("VIDEO_TIMEOUT_SECS", 300)?),

            // Content policy
            media_policy: parse_media_policy(&env_or_default("MEDIA_POLICY", "degrade"))?,
            max_quote_depth: usize::try_from(parse_env_u32("MAX_QUOTE_DEPTH", 4)?).unwrap_or(4),
            timestamp_addendum: parse_env_bool("TIMESTAMP_ADDENDUM", true)?,
            backdate_posts: parse_env_bool("BACKDATE_POSTS", false)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pds_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "BLUESKY_PDS_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if url::Url::parse(&self.pds_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "BLUESKY_PDS_URL".to_string(),
                message: format!("'{}' is not a valid URL", self.pds_url),
            });
        }
        if self.handle.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "BLUESKY_HANDLE".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Hermetic configuration for tests: no delays, local files, fake credentials.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            pds_url: "http://127.0.0.1:1".to_string(),
            handle: "tester.bsky.social".to_string(),
            password: "app-password".to_string(),
            archive_root: None,
            checkpoint_path: PathBuf::from("last_processed_timestamp.txt"),
            ledger_path: PathBuf::from("published_posts.jsonl"),
            post_interval: Duration::ZERO,
            max_retries: 3,
            max_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            video_timeout: Duration::from_secs(5),
            media_policy: MediaPolicy::Degrade,
            max_quote_depth: 4,
            timestamp_addendum: false,
            backdate_posts: false,
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_secs_f64(name: &str, default: f64) -> Result<Duration, ConfigError> {
    let secs = match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse::<f64>().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        })?,
        _ => default,
    };
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("{secs} is not a valid number of seconds"),
    })
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_media_policy(value: &str) -> Result<MediaPolicy, ConfigError> {
    match value.to_lowercase().as_str() {
        "degrade" => Ok(MediaPolicy::Degrade),
        "skip" => Ok(MediaPolicy::Skip),
        _ => Err(ConfigError::InvalidValue {
            name: "MEDIA_POLICY".to_string(),
            message: format!("must be 'degrade' or 'skip', got '{value}'"),
        }),
    }
}

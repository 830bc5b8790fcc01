use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::config::settings::ConfigError;

pub enum EnvKey {
    ServerPort,
    StorageRoot,
    DatabaseUrl,
    BlobBackend,
    MinioUrl,
    MinioBucket,
    MinioAccessKey,
    MinioSecretKey,
    FfmpegPath,
    FfmpegGlobalArgs,
    WorkerCount,
    MaxAttempts,
    JobTimeoutSecs,
    LeaseTtlSecs,
    ReaperIntervalSecs,
    RetryBackoffMs,
    MaxUploadBytes,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::StorageRoot => "STORAGE_ROOT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::BlobBackend => "BLOB_BACKEND",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfmpegGlobalArgs => "FFMPEG_GLOBAL_ARGS",
            EnvKey::WorkerCount => "WORKER_COUNT",
            EnvKey::MaxAttempts => "MAX_ATTEMPTS",
            EnvKey::JobTimeoutSecs => "JOB_TIMEOUT_SECS",
            EnvKey::LeaseTtlSecs => "LEASE_TTL_SECS",
            EnvKey::ReaperIntervalSecs => "REAPER_INTERVAL_SECS",
            EnvKey::RetryBackoffMs => "RETRY_BACKOFF_MS",
            EnvKey::MaxUploadBytes => "MAX_UPLOAD_BYTES",
        }
    }
}

/// Empty values count as unset.
pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

/// `default` when unset, an error when set to something that does not parse.
pub fn get_parsed<T>(key: EnvKey, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let name = key.as_str();
    parse_value(name, get_opt(key), default)
}

fn parse_value<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    let raw = raw.trim();
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key: name,
        reason: format!("'{}': {}", raw, e),
    })
}

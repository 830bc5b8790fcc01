use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::config::env::{self, EnvKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobBackend {
    Local,
    S3,
}

impl FromStr for BlobBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(BlobBackend::Local),
            "s3" | "minio" => Ok(BlobBackend::S3),
            other => Err(format!("unknown blob backend '{}'", other)),
        }
    }
}

/// Connection settings for the S3/MinIO blob backend.
#[derive(Clone, Debug)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub storage_root: PathBuf,
    pub database_url: Option<String>,
    pub blob_backend: BlobBackend,
    pub s3: Option<S3Config>,
    pub ffmpeg_path: String,
    /// Extra arguments placed before the generated ones, e.g. `-loglevel error`.
    pub ffmpeg_global_args: Vec<String>,
    pub worker_count: usize,
    pub max_attempts: u32,
    pub job_timeout: Duration,
    pub lease_ttl: Duration,
    pub reaper_interval: Duration,
    pub retry_backoff: Duration,
    pub max_upload_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let blob_backend = env::get_or(EnvKey::BlobBackend, "local")
            .parse::<BlobBackend>()
            .map_err(|reason| ConfigError::Invalid {
                key: EnvKey::BlobBackend.as_str(),
                reason,
            })?;

        let s3 = match blob_backend {
            BlobBackend::Local => None,
            BlobBackend::S3 => Some(S3Config {
                endpoint: required(EnvKey::MinioUrl)?,
                bucket: required(EnvKey::MinioBucket)?,
                access_key: required(EnvKey::MinioAccessKey)?,
                secret_key: required(EnvKey::MinioSecretKey)?,
            }),
        };

        let config = Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 8000)?,
            storage_root: PathBuf::from(env::get_or(EnvKey::StorageRoot, "/app/data")),
            database_url: env::get_opt(EnvKey::DatabaseUrl),
            blob_backend,
            s3,
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            ffmpeg_global_args: env::get_or(EnvKey::FfmpegGlobalArgs, "")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            worker_count: env::get_parsed(EnvKey::WorkerCount, 2)?,
            max_attempts: env::get_parsed(EnvKey::MaxAttempts, 3)?,
            job_timeout: Duration::from_secs(env::get_parsed(EnvKey::JobTimeoutSecs, 600)?),
            lease_ttl: Duration::from_secs(env::get_parsed(EnvKey::LeaseTtlSecs, 60)?),
            reaper_interval: Duration::from_secs(env::get_parsed(EnvKey::ReaperIntervalSecs, 15)?),
            retry_backoff: Duration::from_millis(env::get_parsed(EnvKey::RetryBackoffMs, 1000)?),
            max_upload_bytes: env::get_parsed(EnvKey::MaxUploadBytes, 512 * 1024 * 1024)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            (EnvKey::WorkerCount, self.worker_count == 0),
            (EnvKey::MaxAttempts, self.max_attempts == 0),
            (EnvKey::JobTimeoutSecs, self.job_timeout.is_zero()),
            (EnvKey::LeaseTtlSecs, self.lease_ttl.is_zero()),
            (EnvKey::ReaperIntervalSecs, self.reaper_interval.is_zero()),
            (EnvKey::MaxUploadBytes, self.max_upload_bytes == 0),
        ];

        for (key, is_zero) in positive {
            if is_zero {
                return Err(ConfigError::Invalid {
                    key: key.as_str(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Scratch space for tool invocations.
    pub fn scratch_dir(&self) -> PathBuf {
        self.storage_root.join("scratch")
    }

    /// Local-only configuration rooted at `storage_root`, with short timings.
    #[cfg(test)]
    pub fn for_tests(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            server_port: 0,
            storage_root: storage_root.into(),
            database_url: None,
            blob_backend: BlobBackend::Local,
            s3: None,
            ffmpeg_path: "ffmpeg".to_string(),
            ffmpeg_global_args: Vec::new(),
            worker_count: 2,
            max_attempts: 3,
            job_timeout: Duration::from_secs(10),
            lease_ttl: Duration::from_secs(30),
            reaper_interval: Duration::from_millis(50),
            retry_backoff: Duration::from_millis(1),
            max_upload_bytes: 1024 * 1024,
        }
    }
}

fn required(key: EnvKey) -> Result<String, ConfigError> {
    let name = key.as_str();
    env::get_opt(key).ok_or(ConfigError::Missing(name))
}

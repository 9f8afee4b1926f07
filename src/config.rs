//! Application settings loaded from environment variables.

use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Settings for the worker process.
///
/// `max_retries` is surfaced as explicit policy; the worker itself never
/// re-enqueues a failed job.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,

    pub upstash_redis_rest_url: String,
    pub upstash_redis_rest_token: String,

    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub aws_region: String,
    pub aws_s3_bucket: String,

    pub poll_interval_seconds: f64,
    pub max_retries: u32,

    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            upstash_redis_rest_url: required("UPSTASH_REDIS_REST_URL")?,
            upstash_redis_rest_token: required("UPSTASH_REDIS_REST_TOKEN")?,
            aws_access_key_id: required("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
            aws_region: optional("AWS_REGION").unwrap_or_else(|| "us-west-1".to_string()),
            aws_s3_bucket: required("AWS_S3_BUCKET")?,
            poll_interval_seconds: parsed("POLL_INTERVAL_SECONDS", 1.0)?,
            max_retries: parsed("MAX_RETRIES", 3)?,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

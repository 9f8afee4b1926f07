//! Queue broker client and the cooperative poll loop.
//!
//! Jobs are consumed from the right of `jobs:default` over the Upstash
//! Redis REST protocol; only the pop contract is implemented here. The
//! poller is a single long-lived task: transient failures back off and
//! continue, and cancellation between iterations is the shutdown path.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::runner::{run_extract_job, ExtractJobPayload, WorkerContext};

/// Queue holding extraction jobs, popped from the right (FIFO).
pub const JOBS_QUEUE: &str = "jobs:default";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("queue protocol error: {0}")]
    Protocol(String),
}

/// `RPOP` response envelope: `{"result": <element|null>}` on success,
/// `{"error": <text>}` otherwise.
#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct QueueClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl QueueClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings
                .upstash_redis_rest_url
                .trim_end_matches('/')
                .to_string(),
            token: settings.upstash_redis_rest_token.clone(),
        }
    }

    /// Non-blocking pop from the right of `queue`; `None` when empty.
    pub async fn rpop(&self, queue: &str) -> Result<Option<String>, QueueError> {
        let url = format!("{}/rpop/{}", self.base_url, queue);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        let body: CommandResponse = response
            .json()
            .await
            .map_err(|e| QueueError::Protocol(format!("undecodable response: {e}")))?;

        if let Some(error) = body.error {
            return Err(QueueError::Protocol(error));
        }
        if !status.is_success() {
            return Err(QueueError::Protocol(format!(
                "unexpected status {status}"
            )));
        }
        Ok(body.result)
    }
}

/// Run the queue poller until the task is cancelled.
///
/// One message is processed at a time, preserving dequeue order. An empty
/// queue sleeps `poll_interval`; an escaping error logs, sleeps twice the
/// interval, and continues — transient failure never terminates the loop.
pub async fn run_poller(ctx: WorkerContext, queue: QueueClient, poll_interval: Duration) {
    info!(
        queue = JOBS_QUEUE,
        poll_interval_secs = poll_interval.as_secs_f64(),
        "starting queue poller"
    );

    loop {
        match poll_once(&ctx, &queue).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(poll_interval).await,
            Err(err) => {
                error!("poller iteration failed: {err:#}");
                tokio::time::sleep(poll_interval * 2).await;
            }
        }
    }
}

/// One poller iteration; `Ok(true)` when a message was consumed.
async fn poll_once(ctx: &WorkerContext, queue: &QueueClient) -> anyhow::Result<bool> {
    let Some(raw) = queue.rpop(JOBS_QUEUE).await? else {
        return Ok(false);
    };
    dispatch(ctx, &raw).await?;
    Ok(true)
}

async fn dispatch(ctx: &WorkerContext, raw: &str) -> anyhow::Result<()> {
    let message: Value =
        serde_json::from_str(raw).context("failed to decode queue message")?;
    let job_type = message
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);

    match job_type.as_deref() {
        Some("extract_features") => {
            let payload: ExtractJobPayload = serde_json::from_value(message)
                .context("malformed extract_features payload")?;
            info!(job_id = %payload.job_id, "received job");
            run_extract_job(ctx, &payload).await;
        }
        other => {
            warn!(job_type = ?other, "unknown job type, dropping message");
        }
    }
    Ok(())
}
